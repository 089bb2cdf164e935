use crate::capability::{CapabilityKind, CapabilityState};
use crate::error::CapabilityError;

use super::CapabilityProbe;

/// Probe for platforms without a permission database for `kind`
///
/// Always reports `Undetermined` so the capability is never shown as granted.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedProbe {
    kind: CapabilityKind,
}

impl UnsupportedProbe {
    /// Fallback probe for `kind`
    pub const fn new(kind: CapabilityKind) -> Self {
        Self { kind }
    }
}

impl CapabilityProbe for UnsupportedProbe {
    fn query(&self) -> Result<CapabilityState, CapabilityError> {
        tracing::debug!(kind = ?self.kind, "no permission database on this platform");
        Ok(CapabilityState::Undetermined)
    }

    fn request(&self) -> Result<(), CapabilityError> {
        tracing::warn!(kind = ?self.kind, "permission prompts are not available on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_reports_granted() {
        for kind in CapabilityKind::ALL {
            let probe = UnsupportedProbe::new(kind);
            assert_eq!(probe.query().unwrap(), CapabilityState::Undetermined);
        }
    }

    #[test]
    fn test_request_is_noop() {
        let probe = UnsupportedProbe::new(CapabilityKind::ScreenCaptureAccess);
        assert!(probe.request().is_ok());
    }
}
