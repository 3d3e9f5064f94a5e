//! Raw input events forwarded from the presentation layer to the active
//! algorithm. They travel on the event bus; the tracking worker relays them
//! to the plugin on its own thread.

use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Char(char),
    Left,
    Right,
    Up,
    Down,
    Space,
    Enter,
    Escape,
    Delete,
    Backspace,
    Tab,
    F(u8),
}

/// Keys an algorithm wants to receive
pub type KeySet = BTreeSet<Key>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyEvent {
    pub key: Key,
    pub pressed: bool,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn press(key: Key) -> Self {
        Self { key, pressed: true, modifiers: Modifiers::default() }
    }

    pub fn release(key: Key) -> Self {
        Self { key, pressed: false, modifiers: Modifiers::default() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerKind {
    Press(PointerButton),
    Release(PointerButton),
    Move,
    Wheel { delta: f32 },
}

/// Pointer event in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f32,
    pub y: f32,
}

impl PointerEvent {
    pub fn press(x: f32, y: f32) -> Self {
        Self { kind: PointerKind::Press(PointerButton::Primary), x, y }
    }
}
