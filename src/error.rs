use thiserror::Error;

use crate::capability::CapabilityKind;
use crate::polling::DisplayHandle;

/// Errors raised by the monitoring subsystem
///
/// None of these are fatal: a missing capability is a normal operating
/// condition, so probe failures are folded into `Undetermined` state and
/// structural violations are logged and repaired in place.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The platform could not answer a query
    #[error("{kind} probe unavailable: {reason}")]
    ProbeUnavailable {
        /// Capability that was queried
        kind: CapabilityKind,
        /// Platform-specific failure description
        reason: String,
    },

    /// `request` called for a kind without an OS prompt
    #[error("{0} cannot be requested; grant it from the settings surface")]
    RequestNotSupported(CapabilityKind),

    /// A poll entry already existed for this (kind, display) pair
    #[error("poll entry for {kind} on display {display} already existed")]
    DuplicateEntry {
        /// Capability being polled
        kind: CapabilityKind,
        /// Owning display
        display: DisplayHandle,
    },

    /// The monitor's owner task has stopped
    #[error("permission monitor has shut down")]
    MonitorClosed,
}

impl CapabilityError {
    /// Convenience constructor for probe failures
    pub fn unavailable(kind: CapabilityKind, reason: impl Into<String>) -> Self {
        Self::ProbeUnavailable {
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CapabilityError::unavailable(CapabilityKind::MicrophoneAccess, "no device");
        assert_eq!(err.to_string(), "microphone probe unavailable: no device");

        let err = CapabilityError::RequestNotSupported(CapabilityKind::InputShortcut);
        assert!(err.to_string().starts_with("input shortcut cannot be requested"));

        let err = CapabilityError::DuplicateEntry {
            kind: CapabilityKind::ScreenCaptureAccess,
            display: DisplayHandle::from_raw(7),
        };
        assert_eq!(
            err.to_string(),
            "poll entry for screen capture on display #7 already existed"
        );
    }
}
