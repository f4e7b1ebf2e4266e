//! Keyboard state fed from winit window events.

use std::collections::HashSet;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Debug, Default)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from a `WindowEvent::KeyboardInput`.
    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(key) = event.physical_key else {
            return;
        };

        match event.state {
            ElementState::Pressed => self.press(key),
            ElementState::Released => self.release(key),
        }
    }

    pub fn press(&mut self, key: KeyCode) {
        self.pressed.insert(key);
    }

    pub fn release(&mut self, key: KeyCode) {
        self.pressed.remove(&key);
    }

    /// Forget every held key, e.g. when the window loses focus and the
    /// release events will never arrive.
    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }
}

/// Key name as written in config.toml ("F11", "Escape", "Q", "5", ...)
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let name = name.trim();
    let key = match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        _ => {
            let mut chars = name.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) => single_char_key(c.to_ascii_uppercase()),
                _ => None,
            };
        }
    };
    Some(key)
}

fn single_char_key(c: char) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0,
        KeyCode::Digit1,
        KeyCode::Digit2,
        KeyCode::Digit3,
        KeyCode::Digit4,
        KeyCode::Digit5,
        KeyCode::Digit6,
        KeyCode::Digit7,
        KeyCode::Digit8,
        KeyCode::Digit9,
    ];

    match c {
        'A'..='Z' => Some(LETTERS[(c as u8 - b'A') as usize]),
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_and_release() {
        let mut input = InputState::new();
        assert!(!input.is_key_pressed(KeyCode::KeyW));

        input.press(KeyCode::KeyW);
        input.press(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));

        input.release(KeyCode::KeyW);
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn clear_drops_held_keys() {
        let mut input = InputState::new();
        input.press(KeyCode::KeyA);
        input.press(KeyCode::ArrowLeft);
        input.clear();
        assert!(!input.is_key_pressed(KeyCode::KeyA));
        assert!(!input.is_key_pressed(KeyCode::ArrowLeft));
    }

    #[test]
    fn key_names_from_config() {
        assert_eq!(parse_key_code("F11"), Some(KeyCode::F11));
        assert_eq!(parse_key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code(" esc "), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("q"), Some(KeyCode::KeyQ));
        assert_eq!(parse_key_code("Z"), Some(KeyCode::KeyZ));
        assert_eq!(parse_key_code("7"), Some(KeyCode::Digit7));
    }

    #[test]
    fn unknown_key_names() {
        assert_eq!(parse_key_code(""), None);
        assert_eq!(parse_key_code("F13"), None);
        assert_eq!(parse_key_code("?"), None);
        assert_eq!(parse_key_code("Hyper"), None);
    }
}
