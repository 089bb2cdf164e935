use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::CapabilityKind;

/// Settings loaded from `~/.permission-monitor.toml`
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Per-display recheck loop
    pub polling: PollingConfig,
    /// Foreground recheck
    pub lifecycle: LifecycleConfig,
    /// Follow-up checks after an OS prompt
    pub request: RequestConfig,
    /// Global shortcut binding tracked as `InputShortcut`
    pub shortcut: ShortcutConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// Polling cadence for displayed, ungranted capabilities
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed tick interval in milliseconds
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl PollingConfig {
    /// Tick interval
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Foreground transition handling
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Settle delay before the coalesced full recheck, in milliseconds
    pub recheck_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            recheck_delay_ms: 500,
        }
    }
}

impl LifecycleConfig {
    /// Settle delay
    pub const fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }
}

/// Delays before re-checking a capability whose prompt was just raised
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RequestConfig {
    /// Microphone follow-up delay in milliseconds
    pub microphone_follow_up_ms: u64,
    /// Screen capture follow-up delay in milliseconds (the grant often lands
    /// only after the user leaves System Settings)
    pub screen_capture_follow_up_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            microphone_follow_up_ms: 500,
            screen_capture_follow_up_ms: 3000,
        }
    }
}

impl RequestConfig {
    /// Follow-up delay for `kind`, `None` if it cannot be requested
    pub const fn follow_up(&self, kind: CapabilityKind) -> Option<Duration> {
        match kind {
            CapabilityKind::MicrophoneAccess => {
                Some(Duration::from_millis(self.microphone_follow_up_ms))
            }
            CapabilityKind::ScreenCaptureAccess => {
                Some(Duration::from_millis(self.screen_capture_follow_up_ms))
            }
            CapabilityKind::InputShortcut | CapabilityKind::AccessibilityAccess => None,
        }
    }
}

/// Global shortcut binding
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShortcutConfig {
    /// Modifier names (`Control`, `Option`, `Command`, `Shift`)
    pub modifiers: Vec<String>,
    /// Key name; empty means no binding
    pub key: String,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            modifiers: vec!["Control".to_owned(), "Option".to_owned()],
            key: "Z".to_owned(),
        }
    }
}

/// Logging destination
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log to file instead of stdout
    pub enabled: bool,
    /// Log file path (`~/` is expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.permission-monitor/monitor.log".to_owned(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[polling]
interval_ms = 2000

[lifecycle]
recheck_delay_ms = 500

[request]
microphone_follow_up_ms = 500
screen_capture_follow_up_ms = 3000

[shortcut]
modifiers = ["Control", "Option"]
key = "Z"

[telemetry]
enabled = false
log_path = "~/.permission-monitor/monitor.log"
"#;

impl Config {
    /// Load config from ~/.permission-monitor.toml, creating it if missing
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be written, read or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&contents)
    }

    /// Parse TOML; missing sections and fields take their defaults
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or a value is out of range
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // A zero interval would turn every poll entry into a busy loop
        if self.polling.interval_ms == 0 {
            bail!("polling.interval_ms must be greater than 0");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".permission-monitor.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_matches_defaults() {
        let parsed = Config::parse(DEFAULT_CONFIG).unwrap();
        let defaults = Config::default();

        assert_eq!(parsed.polling.interval_ms, defaults.polling.interval_ms);
        assert_eq!(
            parsed.lifecycle.recheck_delay_ms,
            defaults.lifecycle.recheck_delay_ms
        );
        assert_eq!(
            parsed.request.screen_capture_follow_up_ms,
            defaults.request.screen_capture_follow_up_ms
        );
        assert_eq!(parsed.shortcut.modifiers, defaults.shortcut.modifiers);
        assert_eq!(parsed.shortcut.key, defaults.shortcut.key);
        assert_eq!(parsed.telemetry.log_path, defaults.telemetry.log_path);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::parse("[polling]\ninterval_ms = 250\n").unwrap();
        assert_eq!(config.polling.interval(), Duration::from_millis(250));
        assert_eq!(config.lifecycle.recheck_delay(), Duration::from_millis(500));
        assert_eq!(config.shortcut.key, "Z");
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.polling.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_malformed_config_fails() {
        assert!(Config::parse("[polling\ninterval_ms = ").is_err());
        assert!(Config::parse("[polling]\ninterval_ms = \"fast\"\n").is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Config::parse("[polling]\ninterval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn test_follow_up_delays() {
        let request = RequestConfig::default();
        assert_eq!(
            request.follow_up(CapabilityKind::MicrophoneAccess),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            request.follow_up(CapabilityKind::ScreenCaptureAccess),
            Some(Duration::from_secs(3))
        );
        assert_eq!(request.follow_up(CapabilityKind::InputShortcut), None);
        assert_eq!(request.follow_up(CapabilityKind::AccessibilityAccess), None);
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = Config::expand_path("/var/log/monitor.log").unwrap();
        assert_eq!(path, PathBuf::from("/var/log/monitor.log"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let home = std::env::var("HOME").expect("HOME not set");
        let path = Config::expand_path("~/logs/monitor.log").unwrap();
        assert_eq!(path, PathBuf::from(home).join("logs/monitor.log"));
    }
}
