//! Visibility hotkey
//!
//! Parses bindings like `shift+f9` and turns key messages into toggle edges.
//! Holding the key, or the keyboard's auto-repeat, never toggles twice.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use super::chain::{msg, WindowMessage};

/// Virtual-key codes
pub mod vk {
    pub const SHIFT: u32 = 0x10;
    pub const CONTROL: u32 = 0x11;
    pub const MENU: u32 = 0x12;
    pub const PRIOR: u32 = 0x21;
    pub const NEXT: u32 = 0x22;
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const INSERT: u32 = 0x2D;
    pub const DELETE: u32 = 0x2E;
    pub const F1: u32 = 0x70;
    pub const F9: u32 = 0x78;
    pub const F24: u32 = 0x87;
}

bitflags! {
    /// Modifier keys that must be held
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid hotkey '{0}'")]
pub struct InvalidHotkey(pub String);

/// A key plus required modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    /// Virtual-key code
    pub key: u32,
}

impl Hotkey {
    pub const fn new(modifiers: Modifiers, key: u32) -> Self {
        Self { modifiers, key }
    }
}

impl Default for Hotkey {
    /// Shift+F9
    fn default() -> Self {
        Self::new(Modifiers::SHIFT, vk::F9)
    }
}

fn key_from_name(name: &str) -> Option<u32> {
    let named = match name {
        "insert" => Some(vk::INSERT),
        "delete" => Some(vk::DELETE),
        "home" => Some(vk::HOME),
        "end" => Some(vk::END),
        "pageup" => Some(vk::PRIOR),
        "pagedown" => Some(vk::NEXT),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        return (1..=24).contains(&n).then(|| vk::F1 + n - 1);
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() || c.is_ascii_digit() => {
            Some(c.to_ascii_uppercase() as u32)
        }
        _ => None,
    }
}

fn key_name(key: u32) -> String {
    match key {
        vk::INSERT => "insert".into(),
        vk::DELETE => "delete".into(),
        vk::HOME => "home".into(),
        vk::END => "end".into(),
        vk::PRIOR => "pageup".into(),
        vk::NEXT => "pagedown".into(),
        vk::F1..=vk::F24 => format!("f{}", key - vk::F1 + 1),
        _ => char::from_u32(key)
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| format!("{:#x}", key)),
    }
}

impl FromStr for Hotkey {
    type Err = InvalidHotkey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidHotkey(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let mut parts: Vec<&str> = lower.split('+').map(str::trim).collect();

        let key = parts.pop().and_then(key_from_name).ok_or_else(invalid)?;

        let mut modifiers = Modifiers::empty();
        for part in parts {
            let modifier = match part {
                "shift" => Modifiers::SHIFT,
                "ctrl" | "control" => Modifiers::CTRL,
                "alt" => Modifiers::ALT,
                _ => return Err(invalid()),
            };
            modifiers |= modifier;
        }

        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, flag) in [
            ("ctrl", Modifiers::CTRL),
            ("alt", Modifiers::ALT),
            ("shift", Modifiers::SHIFT),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{}+", name)?;
            }
        }
        f.write_str(&key_name(self.key))
    }
}

/// Edge detector for a [`Hotkey`]
#[derive(Debug, Clone)]
pub struct HotkeyTracker {
    hotkey: Hotkey,
    held: bool,
}

impl HotkeyTracker {
    pub fn new(hotkey: Hotkey) -> Self {
        Self {
            hotkey,
            held: false,
        }
    }

    pub fn hotkey(&self) -> Hotkey {
        self.hotkey
    }

    /// Feed one message; returns true on a toggle edge
    ///
    /// `modifiers` is the modifier state at the time of the message.
    pub fn on_message(&mut self, message: &WindowMessage, modifiers: Modifiers) -> bool {
        if message.wparam as u32 != self.hotkey.key {
            return false;
        }

        match message.msg {
            msg::WM_KEYDOWN | msg::WM_SYSKEYDOWN => {
                // Bit 30: key was already down before this message
                let repeat = (message.lparam >> 30) & 1 != 0;
                let edge = !repeat && !self.held && modifiers.contains(self.hotkey.modifiers);
                self.held = true;
                edge
            }
            msg::WM_KEYUP | msg::WM_SYSKEYUP => {
                self.held = false;
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framehook_sdk::WindowHandle;

    fn key(msg: u32, key: u32, repeat: bool) -> WindowMessage {
        let lparam = if repeat { 1 << 30 } else { 0 };
        WindowMessage::new(WindowHandle(1), msg, key as usize, lparam)
    }

    #[test]
    fn test_parse_hotkeys() {
        assert_eq!("shift+f9".parse::<Hotkey>().unwrap(), Hotkey::default());
        assert_eq!(
            "Ctrl+Alt+Insert".parse::<Hotkey>().unwrap(),
            Hotkey::new(Modifiers::CTRL | Modifiers::ALT, vk::INSERT)
        );
        assert_eq!("f24".parse::<Hotkey>().unwrap().key, vk::F24);
        assert_eq!("ctrl+k".parse::<Hotkey>().unwrap().key, 'K' as u32);
        assert_eq!("7".parse::<Hotkey>().unwrap().key, '7' as u32);

        assert!("".parse::<Hotkey>().is_err());
        assert!("f25".parse::<Hotkey>().is_err());
        assert!("hyper+f1".parse::<Hotkey>().is_err());
        assert!("shift+".parse::<Hotkey>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let hotkey = Hotkey::new(Modifiers::CTRL | Modifiers::SHIFT, vk::F1 + 11);
        assert_eq!(hotkey.to_string(), "ctrl+shift+f12");
        assert_eq!(hotkey.to_string().parse::<Hotkey>().unwrap(), hotkey);
    }

    #[test]
    fn test_toggle_only_on_edge() {
        let mut tracker = HotkeyTracker::new(Hotkey::default());

        assert!(tracker.on_message(&key(msg::WM_KEYDOWN, vk::F9, false), Modifiers::SHIFT));
        // Auto-repeat while held
        assert!(!tracker.on_message(&key(msg::WM_KEYDOWN, vk::F9, true), Modifiers::SHIFT));
        // Repeat without the repeat bit still counts as held
        assert!(!tracker.on_message(&key(msg::WM_KEYDOWN, vk::F9, false), Modifiers::SHIFT));

        assert!(!tracker.on_message(&key(msg::WM_KEYUP, vk::F9, false), Modifiers::SHIFT));
        assert!(tracker.on_message(&key(msg::WM_KEYDOWN, vk::F9, false), Modifiers::SHIFT));
    }

    #[test]
    fn test_requires_modifiers() {
        let mut tracker = HotkeyTracker::new(Hotkey::default());

        assert!(!tracker.on_message(&key(msg::WM_KEYDOWN, vk::F9, false), Modifiers::empty()));
        tracker.on_message(&key(msg::WM_KEYUP, vk::F9, false), Modifiers::empty());

        assert!(!tracker.on_message(&key(msg::WM_KEYDOWN, vk::F1, false), Modifiers::SHIFT));
        assert!(tracker.on_message(
            &key(msg::WM_KEYDOWN, vk::F9, false),
            Modifiers::SHIFT | Modifiers::CTRL
        ));
    }
}
