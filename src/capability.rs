use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};

/// A permission the host application depends on.
///
/// Each variant is answered by exactly one [`CapabilityProbe`](crate::probe::CapabilityProbe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityKind {
    /// Locally configured global shortcut binding
    InputShortcut,
    /// Microphone capture grant
    MicrophoneAccess,
    /// Accessibility automation grant (synthetic input)
    AccessibilityAccess,
    /// Screen recording grant
    ScreenCaptureAccess,
}

impl CapabilityKind {
    /// Every tracked kind, in display order
    pub const ALL: [Self; 4] = [
        Self::InputShortcut,
        Self::MicrophoneAccess,
        Self::AccessibilityAccess,
        Self::ScreenCaptureAccess,
    ];

    /// Whether the platform offers a prompt-based grant flow for this kind
    ///
    /// Accessibility can only be granted from the settings surface and the
    /// shortcut is local configuration, so neither can be requested.
    pub const fn supports_request(self) -> bool {
        matches!(self, Self::MicrophoneAccess | Self::ScreenCaptureAccess)
    }

    /// Human readable label
    pub const fn label(self) -> &'static str {
        match self {
            Self::InputShortcut => "input shortcut",
            Self::MicrophoneAccess => "microphone",
            Self::AccessibilityAccess => "accessibility",
            Self::ScreenCaptureAccess => "screen capture",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tri-state answer for a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityState {
    /// Permission is held
    Granted,
    /// Permission was explicitly denied or is not configured
    NotGranted,
    /// The platform has not answered (never asked, or the query failed)
    Undetermined,
}

impl CapabilityState {
    /// Collapse a binary answer (used by locally determined kinds)
    pub const fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::NotGranted
        }
    }

    /// True only for [`CapabilityState::Granted`]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Granted => "granted",
            Self::NotGranted => "not granted",
            Self::Undetermined => "undetermined",
        };
        f.write_str(text)
    }
}

/// Immutable, timestamped view of every tracked capability
///
/// Kinds that have never completed a probe are absent; [`Snapshot::state`]
/// reports them as `Undetermined`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    states: BTreeMap<CapabilityKind, CapabilityState>,
    taken_at: SystemTime,
}

impl Snapshot {
    /// Snapshot with no probe results yet
    pub fn empty() -> Self {
        Self {
            states: BTreeMap::new(),
            taken_at: SystemTime::now(),
        }
    }

    pub(crate) fn with_state(&self, kind: CapabilityKind, state: CapabilityState) -> Self {
        let mut states = self.states.clone();
        states.insert(kind, state);
        Self {
            states,
            taken_at: SystemTime::now(),
        }
    }

    /// State of `kind`, `Undetermined` if it was never probed
    pub fn state(&self, kind: CapabilityKind) -> CapabilityState {
        self.states
            .get(&kind)
            .copied()
            .unwrap_or(CapabilityState::Undetermined)
    }

    /// Published state of `kind`, `None` if it was never probed
    pub fn published(&self, kind: CapabilityKind) -> Option<CapabilityState> {
        self.states.get(&kind).copied()
    }

    /// When this snapshot was produced
    pub const fn taken_at(&self) -> SystemTime {
        self.taken_at
    }

    /// True when every kind reports `Granted`
    pub fn all_granted(&self) -> bool {
        CapabilityKind::ALL
            .iter()
            .all(|kind| self.state(*kind).is_granted())
    }

    /// Kinds not currently granted, in display order
    pub fn missing(&self) -> Vec<CapabilityKind> {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| !self.state(*kind).is_granted())
            .collect()
    }

    /// Iterate over every kind with its state
    pub fn iter(&self) -> impl Iterator<Item = (CapabilityKind, CapabilityState)> + '_ {
        CapabilityKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.state(kind)))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// System Settings pane for a capability, if one exists
pub const fn settings_url(kind: CapabilityKind) -> Option<&'static str> {
    match kind {
        CapabilityKind::InputShortcut => None,
        CapabilityKind::MicrophoneAccess => Some(
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone",
        ),
        CapabilityKind::AccessibilityAccess => Some(
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility",
        ),
        CapabilityKind::ScreenCaptureAccess => Some(
            "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture",
        ),
    }
}

/// Open the settings pane for `kind` with the platform opener
///
/// # Errors
/// Returns error if the kind has no settings pane or the opener fails to launch
pub fn open_settings(kind: CapabilityKind) -> Result<()> {
    let url = settings_url(kind).ok_or_else(|| anyhow!("{kind} has no settings pane"))?;
    tracing::info!(kind = ?kind, url, "opening settings pane");

    let status = std::process::Command::new(opener())
        .arg(url)
        .status()
        .with_context(|| format!("failed to launch settings for {kind}"))?;

    if !status.success() {
        return Err(anyhow!("settings opener exited with {status}"));
    }
    Ok(())
}

const fn opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}
