use anyhow::{anyhow, bail, Result};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};

use crate::capability::{CapabilityKind, CapabilityState};
use crate::config::ShortcutConfig;
use crate::error::CapabilityError;

use super::CapabilityProbe;

/// Reports `Granted` iff a usable global shortcut is configured
///
/// Locally determined: the binding must parse into a registrable
/// [`HotKey`] with at least one modifier.
#[derive(Debug, Clone)]
pub struct ShortcutProbe {
    modifiers: Vec<String>,
    key: String,
}

impl ShortcutProbe {
    /// Probe for the given binding
    pub fn new(modifiers: Vec<String>, key: impl Into<String>) -> Self {
        Self {
            modifiers,
            key: key.into(),
        }
    }

    /// Probe for the binding in `[shortcut]`
    pub fn from_config(config: &ShortcutConfig) -> Self {
        Self::new(config.modifiers.clone(), config.key.clone())
    }

    /// Parse the binding into a hotkey
    ///
    /// # Errors
    /// Returns error describing the first invalid part of the binding
    pub fn binding(&self) -> Result<HotKey> {
        if self.key.trim().is_empty() {
            bail!("no key configured");
        }
        let modifiers = parse_modifiers(&self.modifiers)?;
        if modifiers.is_empty() {
            bail!("shortcut needs at least one modifier");
        }
        let code = parse_key(self.key.trim())?;
        Ok(HotKey::new(Some(modifiers), code))
    }
}

impl CapabilityProbe for ShortcutProbe {
    fn query(&self) -> Result<CapabilityState, CapabilityError> {
        match self.binding() {
            Ok(hotkey) => {
                tracing::debug!(id = hotkey.id(), "shortcut binding configured");
                Ok(CapabilityState::Granted)
            }
            Err(err) => {
                tracing::debug!(error = %err, "shortcut binding not usable");
                Ok(CapabilityState::NotGranted)
            }
        }
    }

    fn request(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::RequestNotSupported(
            CapabilityKind::InputShortcut,
        ))
    }
}

fn parse_modifiers(modifiers: &[String]) -> Result<Modifiers> {
    let mut result = Modifiers::empty();
    for modifier in modifiers {
        match modifier.as_str() {
            "Control" | "Ctrl" => result |= Modifiers::CONTROL,
            "Option" | "Alt" => result |= Modifiers::ALT,
            "Command" | "Super" => result |= Modifiers::SUPER,
            "Shift" => result |= Modifiers::SHIFT,
            _ => return Err(anyhow!("unknown modifier: {}", modifier)),
        }
    }
    Ok(result)
}

fn parse_key(key: &str) -> Result<Code> {
    match key {
        "A" => Ok(Code::KeyA),
        "B" => Ok(Code::KeyB),
        "C" => Ok(Code::KeyC),
        "D" => Ok(Code::KeyD),
        "E" => Ok(Code::KeyE),
        "F" => Ok(Code::KeyF),
        "G" => Ok(Code::KeyG),
        "H" => Ok(Code::KeyH),
        "I" => Ok(Code::KeyI),
        "J" => Ok(Code::KeyJ),
        "K" => Ok(Code::KeyK),
        "L" => Ok(Code::KeyL),
        "M" => Ok(Code::KeyM),
        "N" => Ok(Code::KeyN),
        "O" => Ok(Code::KeyO),
        "P" => Ok(Code::KeyP),
        "Q" => Ok(Code::KeyQ),
        "R" => Ok(Code::KeyR),
        "S" => Ok(Code::KeyS),
        "T" => Ok(Code::KeyT),
        "U" => Ok(Code::KeyU),
        "V" => Ok(Code::KeyV),
        "W" => Ok(Code::KeyW),
        "X" => Ok(Code::KeyX),
        "Y" => Ok(Code::KeyY),
        "Z" => Ok(Code::KeyZ),
        "0" => Ok(Code::Digit0),
        "1" => Ok(Code::Digit1),
        "2" => Ok(Code::Digit2),
        "3" => Ok(Code::Digit3),
        "4" => Ok(Code::Digit4),
        "5" => Ok(Code::Digit5),
        "6" => Ok(Code::Digit6),
        "7" => Ok(Code::Digit7),
        "8" => Ok(Code::Digit8),
        "9" => Ok(Code::Digit9),
        "F1" => Ok(Code::F1),
        "F2" => Ok(Code::F2),
        "F3" => Ok(Code::F3),
        "F4" => Ok(Code::F4),
        "F5" => Ok(Code::F5),
        "F6" => Ok(Code::F6),
        "F7" => Ok(Code::F7),
        "F8" => Ok(Code::F8),
        "F9" => Ok(Code::F9),
        "F10" => Ok(Code::F10),
        "F11" => Ok(Code::F11),
        "F12" => Ok(Code::F12),
        "Space" => Ok(Code::Space),
        _ => Err(anyhow!("unsupported key: {}", key)),
    }
}
