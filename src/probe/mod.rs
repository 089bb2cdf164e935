/// macOS probes (TCC-backed)
#[cfg(target_os = "macos")]
pub mod macos;
/// Locally configured shortcut binding
pub mod shortcut;
/// Fallback probes for platforms without a permission database
#[cfg(not(target_os = "macos"))]
pub mod unsupported;

use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{CapabilityKind, CapabilityState};
use crate::config::Config;
use crate::error::CapabilityError;

pub use shortcut::ShortcutProbe;

/// Platform query for a single capability
///
/// Implementations may block on platform calls; the monitor always runs them
/// on a blocking worker. Use `MockCapabilityProbe` (via `mockall`) in unit tests.
#[cfg_attr(test, mockall::automock)]
pub trait CapabilityProbe: Send + Sync {
    /// Ask the platform for the current state
    ///
    /// # Errors
    /// Returns [`CapabilityError::ProbeUnavailable`] if the platform could not answer
    fn query(&self) -> Result<CapabilityState, CapabilityError>;

    /// Trigger the OS grant prompt without waiting for the user's answer
    ///
    /// # Errors
    /// Returns error if the kind has no prompt or the prompt could not be raised
    fn request(&self) -> Result<(), CapabilityError>;
}

/// One probe per capability kind
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: HashMap<CapabilityKind, Arc<dyn CapabilityProbe>>,
}

impl ProbeSet {
    /// Empty set; unregistered kinds are reported as `Undetermined`
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `probe` for `kind`, replacing any previous one
    #[must_use]
    pub fn with(mut self, kind: CapabilityKind, probe: impl CapabilityProbe + 'static) -> Self {
        self.probes.insert(kind, Arc::new(probe));
        self
    }

    /// Register an already shared probe
    #[must_use]
    pub fn with_shared(mut self, kind: CapabilityKind, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probes.insert(kind, probe);
        self
    }

    /// Probe registered for `kind`
    pub fn get(&self, kind: CapabilityKind) -> Option<Arc<dyn CapabilityProbe>> {
        self.probes.get(&kind).cloned()
    }

    /// Probes for the running platform plus the configured shortcut
    pub fn platform(config: &Config) -> Self {
        let set = Self::new().with(
            CapabilityKind::InputShortcut,
            ShortcutProbe::from_config(&config.shortcut),
        );

        #[cfg(target_os = "macos")]
        let set = set
            .with(CapabilityKind::MicrophoneAccess, macos::MicrophoneProbe)
            .with(CapabilityKind::AccessibilityAccess, macos::AccessibilityProbe)
            .with(CapabilityKind::ScreenCaptureAccess, macos::ScreenCaptureProbe);

        #[cfg(not(target_os = "macos"))]
        let set = [
            CapabilityKind::MicrophoneAccess,
            CapabilityKind::AccessibilityAccess,
            CapabilityKind::ScreenCaptureAccess,
        ]
        .into_iter()
        .fold(set, |set, kind| {
            set.with(kind, unsupported::UnsupportedProbe::new(kind))
        });

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_has_no_probes() {
        let set = ProbeSet::new();
        for kind in CapabilityKind::ALL {
            assert!(set.get(kind).is_none());
        }
    }

    #[test]
    fn test_with_registers_probe() {
        let mut probe = MockCapabilityProbe::new();
        probe
            .expect_query()
            .returning(|| Ok(CapabilityState::Granted));

        let set = ProbeSet::new().with(CapabilityKind::MicrophoneAccess, probe);
        let registered = set.get(CapabilityKind::MicrophoneAccess).unwrap();
        assert_eq!(registered.query().unwrap(), CapabilityState::Granted);
        assert!(set.get(CapabilityKind::ScreenCaptureAccess).is_none());
    }

    #[test]
    fn test_platform_covers_every_kind() {
        let set = ProbeSet::platform(&Config::default());
        for kind in CapabilityKind::ALL {
            assert!(set.get(kind).is_some(), "missing probe for {kind}");
        }
    }
}
