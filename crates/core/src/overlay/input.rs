//! Input state captured from window messages
//!
//! The overlay reads input by watching the host window's messages. Nothing
//! here claims a message; the host still sees all of them.

use std::collections::VecDeque;

use super::chain::{msg, WindowMessage};
use super::hotkey::{vk, Modifiers};

/// Typed characters kept until taken; older ones are dropped first
pub const MAX_PENDING_CHARS: usize = 256;

/// Wheel notches kept in either direction until taken
pub const MAX_PENDING_WHEEL: f32 = 64.0;

/// Mouse buttons in capture order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left = 0,
    Right = 1,
    Middle = 2,
}

/// Mouse and keyboard state as of the last message seen
#[derive(Debug, Clone)]
pub struct InputState {
    mouse_pos: (i32, i32),
    mouse_down: [bool; 3],
    /// Accumulated wheel notches since the last [`InputState::take_wheel`]
    wheel: f32,
    keys_down: [bool; 256],
    /// Typed characters since the last [`InputState::take_chars`], at most
    /// [`MAX_PENDING_CHARS`]
    chars: VecDeque<char>,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            mouse_pos: (0, 0),
            mouse_down: [false; 3],
            wheel: 0.0,
            keys_down: [false; 256],
            chars: VecDeque::with_capacity(MAX_PENDING_CHARS),
        }
    }
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from one message; returns true if it was an input message
    pub fn handle(&mut self, message: &WindowMessage) -> bool {
        match message.msg {
            msg::WM_LBUTTONDOWN => self.mouse_down[MouseButton::Left as usize] = true,
            msg::WM_LBUTTONUP => self.mouse_down[MouseButton::Left as usize] = false,
            msg::WM_RBUTTONDOWN => self.mouse_down[MouseButton::Right as usize] = true,
            msg::WM_RBUTTONUP => self.mouse_down[MouseButton::Right as usize] = false,
            msg::WM_MBUTTONDOWN => self.mouse_down[MouseButton::Middle as usize] = true,
            msg::WM_MBUTTONUP => self.mouse_down[MouseButton::Middle as usize] = false,
            msg::WM_MOUSEWHEEL => {
                let delta = (message.wparam >> 16) as u16 as i16;
                let notch = if delta > 0 { 1.0 } else { -1.0 };
                self.wheel = (self.wheel + notch).clamp(-MAX_PENDING_WHEEL, MAX_PENDING_WHEEL);
            }
            msg::WM_MOUSEMOVE => {
                let x = message.lparam as u16 as i16;
                let y = (message.lparam >> 16) as u16 as i16;
                self.mouse_pos = (x as i32, y as i32);
            }
            msg::WM_KEYDOWN | msg::WM_SYSKEYDOWN => {
                if message.wparam < 256 {
                    self.keys_down[message.wparam] = true;
                }
            }
            msg::WM_KEYUP | msg::WM_SYSKEYUP => {
                if message.wparam < 256 {
                    self.keys_down[message.wparam] = false;
                }
            }
            msg::WM_CHAR => {
                if message.wparam > 0 && message.wparam < 0x10000 {
                    if let Some(c) = char::from_u32(message.wparam as u32) {
                        if self.chars.len() == MAX_PENDING_CHARS {
                            self.chars.pop_front();
                        }
                        self.chars.push_back(c);
                    }
                }
            }
            _ => return false,
        }
        true
    }

    pub fn mouse_pos(&self) -> (i32, i32) {
        self.mouse_pos
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.mouse_down[button as usize]
    }

    pub fn is_key_down(&self, key: u32) -> bool {
        self.keys_down.get(key as usize).copied().unwrap_or(false)
    }

    /// Modifiers as seen through this window's key messages
    pub fn modifiers(&self) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        modifiers.set(Modifiers::SHIFT, self.is_key_down(vk::SHIFT));
        modifiers.set(Modifiers::CTRL, self.is_key_down(vk::CONTROL));
        modifiers.set(Modifiers::ALT, self.is_key_down(vk::MENU));
        modifiers
    }

    pub fn take_wheel(&mut self) -> f32 {
        std::mem::take(&mut self.wheel)
    }

    pub fn take_chars(&mut self) -> Vec<char> {
        self.chars.drain(..).collect()
    }

    /// Forget held keys and buttons, e.g. after the window lost focus
    pub fn release_all(&mut self) {
        self.mouse_down = [false; 3];
        self.keys_down = [false; 256];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framehook_sdk::WindowHandle;

    fn message(msg: u32, wparam: usize, lparam: isize) -> WindowMessage {
        WindowMessage::new(WindowHandle(1), msg, wparam, lparam)
    }

    #[test]
    fn test_mouse_messages() {
        let mut input = InputState::new();

        // x = -5, y = 300
        let lparam = ((300isize) << 16) | (0xFFFB as isize);
        assert!(input.handle(&message(msg::WM_MOUSEMOVE, 0, lparam)));
        assert_eq!(input.mouse_pos(), (-5, 300));

        input.handle(&message(msg::WM_RBUTTONDOWN, 0, 0));
        assert!(input.is_mouse_down(MouseButton::Right));
        input.handle(&message(msg::WM_RBUTTONUP, 0, 0));
        assert!(!input.is_mouse_down(MouseButton::Right));

        input.handle(&message(msg::WM_MOUSEWHEEL, 120 << 16, 0));
        input.handle(&message(msg::WM_MOUSEWHEEL, 120 << 16, 0));
        input.handle(&message(msg::WM_MOUSEWHEEL, 0xFF88 << 16, 0));
        assert_eq!(input.take_wheel(), 1.0);
        assert_eq!(input.take_wheel(), 0.0);
    }

    #[test]
    fn test_keys_and_chars() {
        let mut input = InputState::new();

        input.handle(&message(msg::WM_KEYDOWN, vk::SHIFT as usize, 0));
        assert!(input.is_key_down(vk::SHIFT));
        assert_eq!(input.modifiers(), Modifiers::SHIFT);

        input.handle(&message(msg::WM_KEYUP, vk::SHIFT as usize, 0));
        assert!(input.modifiers().is_empty());

        input.handle(&message(msg::WM_CHAR, 'h' as usize, 0));
        input.handle(&message(msg::WM_CHAR, 'é' as usize, 0));
        input.handle(&message(msg::WM_CHAR, 0, 0));
        assert_eq!(input.take_chars(), vec!['h', 'é']);

        // Out-of-range key codes are ignored
        assert!(input.handle(&message(msg::WM_KEYDOWN, 300, 0)));
        assert!(!input.is_key_down(300));
    }

    #[test]
    fn test_pending_input_is_bounded() {
        let mut input = InputState::new();

        let letters: Vec<char> = ('a'..='z').cycle().take(MAX_PENDING_CHARS + 10).collect();
        for &c in &letters {
            input.handle(&message(msg::WM_CHAR, c as usize, 0));
        }
        for _ in 0..1000 {
            input.handle(&message(msg::WM_MOUSEWHEEL, 120 << 16, 0));
        }

        let chars = input.take_chars();
        assert_eq!(chars.len(), MAX_PENDING_CHARS);
        assert_eq!(chars[..], letters[10..]);
        assert!(input.take_chars().is_empty());
        assert_eq!(input.take_wheel(), MAX_PENDING_WHEEL);
    }

    #[test]
    fn test_ignores_other_messages() {
        let mut input = InputState::new();
        assert!(!input.handle(&message(0x0010, 0, 0)));
    }
}
