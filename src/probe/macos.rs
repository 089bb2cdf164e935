#![allow(unsafe_code)] // TCC queries are only reachable through FFI

use core_graphics::access::ScreenCaptureAccess;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use objc2::msg_send;
use objc2::runtime::AnyClass;
use objc2_foundation::NSString;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityKind, CapabilityState};
use crate::error::CapabilityError;

use super::CapabilityProbe;

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

#[link(name = "AVFoundation", kind = "framework")]
extern "C" {}

/// `AVMediaTypeAudio`
const MEDIA_TYPE_AUDIO: &str = "soun";

/// Microphone grant via `AVCaptureDevice` authorization status
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneProbe;

impl CapabilityProbe for MicrophoneProbe {
    fn query(&self) -> Result<CapabilityState, CapabilityError> {
        debug!("checking microphone permission");

        let class = AnyClass::get(c"AVCaptureDevice").ok_or_else(|| {
            CapabilityError::unavailable(
                CapabilityKind::MicrophoneAccess,
                "AVCaptureDevice class not available",
            )
        })?;
        let media_type = NSString::from_str(MEDIA_TYPE_AUDIO);
        let status: isize =
            unsafe { msg_send![class, authorizationStatusForMediaType: &*media_type] };

        // AVAuthorizationStatus: 0 notDetermined, 1 restricted, 2 denied, 3 authorized
        match status {
            0 => Ok(CapabilityState::Undetermined),
            1 | 2 => Ok(CapabilityState::NotGranted),
            3 => Ok(CapabilityState::Granted),
            other => Err(CapabilityError::unavailable(
                CapabilityKind::MicrophoneAccess,
                format!("unknown authorization status {other}"),
            )),
        }
    }

    /// Opening the default input device raises the system prompt on first use
    fn request(&self) -> Result<(), CapabilityError> {
        info!("requesting microphone permission");

        let unavailable =
            |reason: String| CapabilityError::unavailable(CapabilityKind::MicrophoneAccess, reason);

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| unavailable("no input device available".to_owned()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| unavailable(format!("failed to get default input config: {e}")))?;

        let stream = device
            .build_input_stream(
                &supported.config(),
                |_data: &[f32], _: &cpal::InputCallbackInfo| {},
                |err| warn!("microphone prompt stream error: {}", err),
                None,
            )
            .map_err(|e| unavailable(format!("failed to open input stream: {e}")))?;
        stream
            .play()
            .map_err(|e| unavailable(format!("failed to start input stream: {e}")))?;
        drop(stream);

        Ok(())
    }
}

/// Accessibility grant via `AXIsProcessTrusted`
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessibilityProbe;

impl CapabilityProbe for AccessibilityProbe {
    fn query(&self) -> Result<CapabilityState, CapabilityError> {
        debug!("checking accessibility permission");
        let trusted = unsafe { AXIsProcessTrusted() };
        Ok(CapabilityState::from_granted(trusted))
    }

    fn request(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::RequestNotSupported(
            CapabilityKind::AccessibilityAccess,
        ))
    }
}

/// Screen recording grant via `CGPreflightScreenCaptureAccess`
///
/// The preflight call cannot tell "never asked" from "denied", so both map
/// to `NotGranted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenCaptureProbe;

impl CapabilityProbe for ScreenCaptureProbe {
    fn query(&self) -> Result<CapabilityState, CapabilityError> {
        debug!("checking screen capture permission");
        Ok(CapabilityState::from_granted(
            ScreenCaptureAccess.preflight(),
        ))
    }

    fn request(&self) -> Result<(), CapabilityError> {
        info!("requesting screen capture permission");
        // Returns the pre-prompt answer; the real grant lands after the user
        // toggles the setting, so the result is only logged.
        let granted = ScreenCaptureAccess.request();
        debug!(granted, "screen capture request issued");
        Ok(())
    }
}
