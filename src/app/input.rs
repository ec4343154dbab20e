use std::path::Path;

use bitflags::bitflags;
use rhai::INT;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};

use crate::config::WindowConfig;

/// Event kinds passed as the first argument of `on_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum EventKind {
    KeyDown = 1,
    KeyUp = 2,
    Char = 3,
    MouseDown = 4,
    MouseUp = 5,
    MouseScroll = 6,
    MouseMove = 7,
    MouseEnter = 8,
    MouseLeave = 9,
    Resized = 10,
    Focused = 11,
    Unfocused = 12,
    FilesDropped = 13,
    QuitRequested = 14,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifiers: u32 {
        const SHIFT = 0x1;
        const CTRL = 0x2;
        const ALT = 0x4;
        const SUPER = 0x8;
        const LMB = 0x100;
        const RMB = 0x200;
        const MMB = 0x400;
    }
}

impl KeyModifiers {
    fn from_winit(state: ModifiersState) -> Self {
        let mut mods = KeyModifiers::empty();
        mods.set(KeyModifiers::SHIFT, state.shift_key());
        mods.set(KeyModifiers::CTRL, state.control_key());
        mods.set(KeyModifiers::ALT, state.alt_key());
        mods.set(KeyModifiers::SUPER, state.super_key());
        mods
    }

    fn button(button: MouseButton) -> Self {
        match button {
            MouseButton::Left => KeyModifiers::LMB,
            MouseButton::Right => KeyModifiers::RMB,
            MouseButton::Middle => KeyModifiers::MMB,
            _ => KeyModifiers::empty(),
        }
    }
}

pub const KEY_Q: INT = 81;
pub const KEY_TAB: INT = 258;
pub const KEY_RIGHT: INT = 262;
pub const KEY_LEFT: INT = 263;
pub const KEY_DOWN: INT = 264;
pub const KEY_UP: INT = 265;

/// Numeric key code handed to the script. Printable keys use their ASCII upper-case value,
/// named keys use codes from 256 upwards. Unmapped keys give 0.
pub fn key_code(code: KeyCode) -> INT {
    use KeyCode::*;
    let letter = |offset: u8| INT::from(b'A' + offset);
    let digit = |offset: u8| INT::from(b'0' + offset);
    match code {
        Space => 32,
        Quote => 39,
        Comma => 44,
        Minus => 45,
        Period => 46,
        Slash => 47,
        Digit0 => digit(0),
        Digit1 => digit(1),
        Digit2 => digit(2),
        Digit3 => digit(3),
        Digit4 => digit(4),
        Digit5 => digit(5),
        Digit6 => digit(6),
        Digit7 => digit(7),
        Digit8 => digit(8),
        Digit9 => digit(9),
        Semicolon => 59,
        Equal => 61,
        KeyA => letter(0),
        KeyB => letter(1),
        KeyC => letter(2),
        KeyD => letter(3),
        KeyE => letter(4),
        KeyF => letter(5),
        KeyG => letter(6),
        KeyH => letter(7),
        KeyI => letter(8),
        KeyJ => letter(9),
        KeyK => letter(10),
        KeyL => letter(11),
        KeyM => letter(12),
        KeyN => letter(13),
        KeyO => letter(14),
        KeyP => letter(15),
        KeyQ => letter(16),
        KeyR => letter(17),
        KeyS => letter(18),
        KeyT => letter(19),
        KeyU => letter(20),
        KeyV => letter(21),
        KeyW => letter(22),
        KeyX => letter(23),
        KeyY => letter(24),
        KeyZ => letter(25),
        BracketLeft => 91,
        Backslash => 92,
        BracketRight => 93,
        Backquote => 96,
        Escape => 256,
        Enter => 257,
        Tab => KEY_TAB,
        Backspace => 259,
        Insert => 260,
        Delete => 261,
        ArrowRight => KEY_RIGHT,
        ArrowLeft => KEY_LEFT,
        ArrowDown => KEY_DOWN,
        ArrowUp => KEY_UP,
        PageUp => 266,
        PageDown => 267,
        Home => 268,
        End => 269,
        F1 => 290,
        F2 => 291,
        F3 => 292,
        F4 => 293,
        F5 => 294,
        F6 => 295,
        F7 => 296,
        F8 => 297,
        F9 => 298,
        F10 => 299,
        F11 => 300,
        F12 => 301,
        ShiftLeft => 340,
        ControlLeft => 341,
        AltLeft => 342,
        SuperLeft => 343,
        ShiftRight => 344,
        ControlRight => 345,
        AltRight => 346,
        SuperRight => 347,
        _ => 0,
    }
}

/// Keys that move UI focus; they only reach the script while keyboard navigation is enabled.
pub fn is_navigation_key(key: INT) -> bool {
    matches!(key, KEY_TAB | KEY_RIGHT | KEY_LEFT | KEY_DOWN | KEY_UP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptEvent {
    pub kind: EventKind,
    pub key: INT,
    pub modifiers: KeyModifiers,
}

impl ScriptEvent {
    pub(crate) fn new(kind: EventKind, key: INT, modifiers: KeyModifiers) -> Self {
        Self { kind, key, modifiers }
    }

    pub fn args(&self) -> (INT, INT, INT) {
        (self.kind as INT, self.key, INT::from(self.modifiers.bits()))
    }

    /// Super+Q or Ctrl+Q pressed.
    pub fn is_quit_shortcut(&self) -> bool {
        self.kind == EventKind::KeyDown
            && self.key == KEY_Q
            && self.modifiers.intersects(KeyModifiers::SUPER | KeyModifiers::CTRL)
    }
}

/// Which dropped files reach the script. winit reports a multi-file drop as consecutive
/// `DroppedFile` events; any other event ends the drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropPolicy {
    pub enabled: bool,
    pub max_files: u32,
    pub max_path_length: u32,
}

impl DropPolicy {
    pub fn from_window(config: &WindowConfig) -> Self {
        Self {
            enabled: config.enable_dragndrop,
            max_files: config.max_dropped_files,
            max_path_length: config.max_dropped_file_path_length,
        }
    }
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self::from_window(&WindowConfig::default())
    }
}

/// Turns winit window events into `on_event` arguments, tracking modifier and button state.
#[derive(Debug, Default)]
pub struct InputTranslator {
    keys: KeyModifiers,
    buttons: KeyModifiers,
    drops: DropPolicy,
    dropped_in_batch: u32,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drop_policy(drops: DropPolicy) -> Self {
        Self { drops, ..Self::default() }
    }

    pub fn modifiers(&self) -> KeyModifiers {
        self.keys | self.buttons
    }

    pub fn translate(&mut self, event: &WindowEvent) -> Vec<ScriptEvent> {
        if !matches!(event, WindowEvent::DroppedFile(_)) {
            self.dropped_in_batch = 0;
        }
        match event {
            WindowEvent::ModifiersChanged(modifiers) => {
                self.keys = KeyModifiers::from_winit(modifiers.state());
                Vec::new()
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let code = match event.physical_key {
                    PhysicalKey::Code(code) => code,
                    PhysicalKey::Unidentified(_) => return Vec::new(),
                };
                self.translate_key(code, event.state == ElementState::Pressed, event.text.as_deref())
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.translate_button(*button, *state == ElementState::Pressed)
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y as f64,
                    MouseScrollDelta::PixelDelta(pos) => pos.y / 40.0,
                };
                vec![ScriptEvent::new(EventKind::MouseScroll, lines.round() as INT, self.modifiers())]
            }
            WindowEvent::CursorMoved { .. } => vec![ScriptEvent::new(EventKind::MouseMove, 0, self.modifiers())],
            WindowEvent::CursorEntered { .. } => vec![ScriptEvent::new(EventKind::MouseEnter, 0, self.modifiers())],
            WindowEvent::CursorLeft { .. } => vec![ScriptEvent::new(EventKind::MouseLeave, 0, self.modifiers())],
            WindowEvent::Resized(_) => vec![ScriptEvent::new(EventKind::Resized, 0, self.modifiers())],
            WindowEvent::Focused(true) => vec![ScriptEvent::new(EventKind::Focused, 0, self.modifiers())],
            WindowEvent::Focused(false) => {
                self.buttons = KeyModifiers::empty();
                vec![ScriptEvent::new(EventKind::Unfocused, 0, self.modifiers())]
            }
            WindowEvent::DroppedFile(path) => self.translate_drop(path),
            WindowEvent::CloseRequested => vec![ScriptEvent::new(EventKind::QuitRequested, 0, self.modifiers())],
            _ => Vec::new(),
        }
    }

    /// A key press yields `KeyDown` plus one `Char` per typed character; a release yields `KeyUp`.
    pub fn translate_key(&mut self, code: KeyCode, pressed: bool, text: Option<&str>) -> Vec<ScriptEvent> {
        let modifiers = self.modifiers();
        let kind = if pressed { EventKind::KeyDown } else { EventKind::KeyUp };
        let mut events = vec![ScriptEvent::new(kind, key_code(code), modifiers)];
        if pressed {
            let typed = text.unwrap_or_default().chars().filter(|ch| !ch.is_control());
            events.extend(typed.map(|ch| ScriptEvent::new(EventKind::Char, INT::from(u32::from(ch)), modifiers)));
        }
        events
    }

    /// Accepted files yield `FilesDropped` with their 1-based position in the current drop.
    fn translate_drop(&mut self, path: &Path) -> Vec<ScriptEvent> {
        if !self.drops.enabled {
            return Vec::new();
        }
        let length = path.as_os_str().len();
        if length > self.drops.max_path_length as usize {
            let limit = self.drops.max_path_length;
            log::warn!("[input] ignoring dropped file with a {length}-byte path (limit {limit})");
            return Vec::new();
        }
        if self.dropped_in_batch >= self.drops.max_files {
            return Vec::new();
        }
        self.dropped_in_batch += 1;
        vec![ScriptEvent::new(EventKind::FilesDropped, INT::from(self.dropped_in_batch), self.modifiers())]
    }

    pub fn translate_button(&mut self, button: MouseButton, pressed: bool) -> Vec<ScriptEvent> {
        let flag = KeyModifiers::button(button);
        let modifiers = self.modifiers();
        self.buttons.set(flag, pressed);
        let code = match button {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::Back => 3,
            MouseButton::Forward => 4,
            MouseButton::Other(other) => INT::from(other),
        };
        let kind = if pressed { EventKind::MouseDown } else { EventKind::MouseUp };
        vec![ScriptEvent::new(kind, code, modifiers)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn key_press_emits_key_down_and_chars() {
        let mut input = InputTranslator::new();
        let events = input.translate_key(KeyCode::KeyA, true, Some("a"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].args(), (EventKind::KeyDown as INT, 65, 0));
        assert_eq!(events[1].args(), (EventKind::Char as INT, 'a' as INT, 0));

        let released = input.translate_key(KeyCode::KeyA, false, None);
        assert_eq!(released[0].kind, EventKind::KeyUp);
        assert_eq!(released.len(), 1);
    }

    #[test]
    fn quit_shortcut_needs_super_or_ctrl() {
        let mut input = InputTranslator::new();
        assert!(!input.translate_key(KeyCode::KeyQ, true, Some("q"))[0].is_quit_shortcut());
        input.keys = KeyModifiers::SUPER;
        assert!(input.translate_key(KeyCode::KeyQ, true, None)[0].is_quit_shortcut());
        input.keys = KeyModifiers::CTRL | KeyModifiers::SHIFT;
        assert!(input.translate_key(KeyCode::KeyQ, true, None)[0].is_quit_shortcut());
        assert!(!input.translate_key(KeyCode::KeyQ, false, None)[0].is_quit_shortcut());
    }

    #[test]
    fn mouse_buttons_are_tracked_as_modifiers() {
        let mut input = InputTranslator::new();
        let down = input.translate_button(MouseButton::Left, true);
        assert_eq!(down[0].args(), (EventKind::MouseDown as INT, 0, 0));
        assert_eq!(input.modifiers(), KeyModifiers::LMB);
        let up = input.translate_button(MouseButton::Left, false);
        assert_eq!(up[0].modifiers, KeyModifiers::LMB);
        assert_eq!(input.modifiers(), KeyModifiers::empty());
    }

    #[test]
    fn dropped_files_are_ignored_unless_enabled() {
        let mut input = InputTranslator::new();
        assert!(input.translate(&WindowEvent::DroppedFile("/tmp/a.txt".into())).is_empty());
    }

    #[test]
    fn each_drop_is_capped_at_max_files() {
        let policy = DropPolicy { enabled: true, max_files: 2, max_path_length: 16 };
        let mut input = InputTranslator::with_drop_policy(policy);
        let keys: Vec<INT> = ["/a", "/b", "/c"]
            .iter()
            .flat_map(|path| input.translate(&WindowEvent::DroppedFile(PathBuf::from(*path))))
            .map(|event| {
                assert_eq!(event.kind, EventKind::FilesDropped);
                event.key
            })
            .collect();
        assert_eq!(keys, [1, 2]);

        input.translate(&WindowEvent::HoveredFileCancelled);
        let next = input.translate(&WindowEvent::DroppedFile("/d".into()));
        assert_eq!(next.iter().map(|event| event.key).collect::<Vec<_>>(), [1]);

        input.translate(&WindowEvent::HoveredFileCancelled);
        assert!(input.translate(&WindowEvent::DroppedFile("/a/path/longer/than/sixteen".into())).is_empty());
    }

    #[test]
    fn arrows_and_tab_are_navigation_keys() {
        assert!(is_navigation_key(key_code(KeyCode::ArrowUp)));
        assert!(is_navigation_key(key_code(KeyCode::Tab)));
        assert!(!is_navigation_key(key_code(KeyCode::KeyW)));
        assert_eq!(key_code(KeyCode::F12), 301);
    }
}
