//! Linux input event codes, the US-QWERTY character map, and accelerator
//! key names.

use std::fmt;

/// Linux `EV_KEY` event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

#[allow(missing_docs)]
impl KeyCode {
    pub const ESC: Self = Self(1);
    pub const KEY_1: Self = Self(2);
    pub const KEY_2: Self = Self(3);
    pub const KEY_3: Self = Self(4);
    pub const KEY_4: Self = Self(5);
    pub const KEY_5: Self = Self(6);
    pub const KEY_6: Self = Self(7);
    pub const KEY_7: Self = Self(8);
    pub const KEY_8: Self = Self(9);
    pub const KEY_9: Self = Self(10);
    pub const KEY_0: Self = Self(11);
    pub const MINUS: Self = Self(12);
    pub const EQUAL: Self = Self(13);
    pub const BACKSPACE: Self = Self(14);
    pub const TAB: Self = Self(15);
    pub const Q: Self = Self(16);
    pub const W: Self = Self(17);
    pub const E: Self = Self(18);
    pub const R: Self = Self(19);
    pub const T: Self = Self(20);
    pub const Y: Self = Self(21);
    pub const U: Self = Self(22);
    pub const I: Self = Self(23);
    pub const O: Self = Self(24);
    pub const P: Self = Self(25);
    pub const LEFTBRACE: Self = Self(26);
    pub const RIGHTBRACE: Self = Self(27);
    pub const ENTER: Self = Self(28);
    pub const LEFTCTRL: Self = Self(29);
    pub const A: Self = Self(30);
    pub const S: Self = Self(31);
    pub const D: Self = Self(32);
    pub const F: Self = Self(33);
    pub const G: Self = Self(34);
    pub const H: Self = Self(35);
    pub const J: Self = Self(36);
    pub const K: Self = Self(37);
    pub const L: Self = Self(38);
    pub const SEMICOLON: Self = Self(39);
    pub const APOSTROPHE: Self = Self(40);
    pub const GRAVE: Self = Self(41);
    pub const LEFTSHIFT: Self = Self(42);
    pub const BACKSLASH: Self = Self(43);
    pub const Z: Self = Self(44);
    pub const X: Self = Self(45);
    pub const C: Self = Self(46);
    pub const V: Self = Self(47);
    pub const B: Self = Self(48);
    pub const N: Self = Self(49);
    pub const M: Self = Self(50);
    pub const COMMA: Self = Self(51);
    pub const DOT: Self = Self(52);
    pub const SLASH: Self = Self(53);
    pub const RIGHTSHIFT: Self = Self(54);
    pub const KPASTERISK: Self = Self(55);
    pub const LEFTALT: Self = Self(56);
    pub const SPACE: Self = Self(57);
    pub const CAPSLOCK: Self = Self(58);
    pub const F1: Self = Self(59);
    pub const F2: Self = Self(60);
    pub const F3: Self = Self(61);
    pub const F4: Self = Self(62);
    pub const F5: Self = Self(63);
    pub const F6: Self = Self(64);
    pub const F7: Self = Self(65);
    pub const F8: Self = Self(66);
    pub const F9: Self = Self(67);
    pub const F10: Self = Self(68);
    pub const NUMLOCK: Self = Self(69);
    pub const KP7: Self = Self(71);
    pub const KP8: Self = Self(72);
    pub const KP9: Self = Self(73);
    pub const KPMINUS: Self = Self(74);
    pub const KP4: Self = Self(75);
    pub const KP5: Self = Self(76);
    pub const KP6: Self = Self(77);
    pub const KPPLUS: Self = Self(78);
    pub const KP1: Self = Self(79);
    pub const KP2: Self = Self(80);
    pub const KP3: Self = Self(81);
    pub const KP0: Self = Self(82);
    pub const KPDOT: Self = Self(83);
    pub const F11: Self = Self(87);
    pub const F12: Self = Self(88);
    pub const KPENTER: Self = Self(96);
    pub const RIGHTCTRL: Self = Self(97);
    pub const KPSLASH: Self = Self(98);
    pub const RIGHTALT: Self = Self(100);
    pub const HOME: Self = Self(102);
    pub const UP: Self = Self(103);
    pub const PAGEUP: Self = Self(104);
    pub const LEFT: Self = Self(105);
    pub const RIGHT: Self = Self(106);
    pub const END: Self = Self(107);
    pub const DOWN: Self = Self(108);
    pub const PAGEDOWN: Self = Self(109);
    pub const INSERT: Self = Self(110);
    pub const DELETE: Self = Self(111);
    pub const KPEQUAL: Self = Self(117);
    pub const LEFTMETA: Self = Self(125);
    pub const RIGHTMETA: Self = Self(126);
    pub const BACK: Self = Self(158);
    pub const FORWARD: Self = Self(159);
    pub const REFRESH: Self = Self(173);

    /// Whether the code is one of the modifier keys.
    pub const fn is_modifier(self) -> bool {
        matches!(self.0, 29 | 42 | 54 | 56 | 97 | 100 | 125 | 126)
    }

    /// Whether the code is on the numeric keypad.
    pub const fn is_keypad(self) -> bool {
        matches!(self.0, 55 | 71..=83 | 96 | 98 | 117)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KEY_NAMES.iter().find(|(_, code)| code == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "code {}", self.0),
        }
    }
}

/// Accelerator names, matched case-insensitively. Aliases follow the first
/// spelling so `Display` picks the canonical one.
const KEY_NAMES: &[(&str, KeyCode)] = &[
    ("ctrl", KeyCode::LEFTCTRL),
    ("control", KeyCode::LEFTCTRL),
    ("shift", KeyCode::LEFTSHIFT),
    ("alt", KeyCode::LEFTALT),
    ("search", KeyCode::LEFTMETA),
    ("launcher", KeyCode::LEFTMETA),
    ("meta", KeyCode::LEFTMETA),
    ("enter", KeyCode::ENTER),
    ("return", KeyCode::ENTER),
    ("space", KeyCode::SPACE),
    ("tab", KeyCode::TAB),
    ("backspace", KeyCode::BACKSPACE),
    ("esc", KeyCode::ESC),
    ("escape", KeyCode::ESC),
    ("delete", KeyCode::DELETE),
    ("insert", KeyCode::INSERT),
    ("capslock", KeyCode::CAPSLOCK),
    ("left", KeyCode::LEFT),
    ("right", KeyCode::RIGHT),
    ("up", KeyCode::UP),
    ("down", KeyCode::DOWN),
    ("home", KeyCode::HOME),
    ("end", KeyCode::END),
    ("pageup", KeyCode::PAGEUP),
    ("pagedown", KeyCode::PAGEDOWN),
    ("back", KeyCode::BACK),
    ("forward", KeyCode::FORWARD),
    ("refresh", KeyCode::REFRESH),
    ("f1", KeyCode::F1),
    ("f2", KeyCode::F2),
    ("f3", KeyCode::F3),
    ("f4", KeyCode::F4),
    ("f5", KeyCode::F5),
    ("f6", KeyCode::F6),
    ("f7", KeyCode::F7),
    ("f8", KeyCode::F8),
    ("f9", KeyCode::F9),
    ("f10", KeyCode::F10),
    ("f11", KeyCode::F11),
    ("f12", KeyCode::F12),
];

/// Key and shift state producing `ch` on a US-QWERTY layout.
pub fn qwerty(ch: char) -> Option<(KeyCode, bool)> {
    let plain = |code| Some((code, false));
    let shifted = |code| Some((code, true));
    match ch {
        'a'..='z' => plain(letter(ch)),
        'A'..='Z' => shifted(letter(ch.to_ascii_lowercase())),
        '1'..='9' => plain(KeyCode(u16::from(ch as u8 - b'1') + 2)),
        '0' => plain(KeyCode::KEY_0),
        '!' => shifted(KeyCode::KEY_1),
        '@' => shifted(KeyCode::KEY_2),
        '#' => shifted(KeyCode::KEY_3),
        '$' => shifted(KeyCode::KEY_4),
        '%' => shifted(KeyCode::KEY_5),
        '^' => shifted(KeyCode::KEY_6),
        '&' => shifted(KeyCode::KEY_7),
        '*' => shifted(KeyCode::KEY_8),
        '(' => shifted(KeyCode::KEY_9),
        ')' => shifted(KeyCode::KEY_0),
        '-' => plain(KeyCode::MINUS),
        '_' => shifted(KeyCode::MINUS),
        '=' => plain(KeyCode::EQUAL),
        '+' => shifted(KeyCode::EQUAL),
        '[' => plain(KeyCode::LEFTBRACE),
        '{' => shifted(KeyCode::LEFTBRACE),
        ']' => plain(KeyCode::RIGHTBRACE),
        '}' => shifted(KeyCode::RIGHTBRACE),
        ';' => plain(KeyCode::SEMICOLON),
        ':' => shifted(KeyCode::SEMICOLON),
        '\'' => plain(KeyCode::APOSTROPHE),
        '"' => shifted(KeyCode::APOSTROPHE),
        '`' => plain(KeyCode::GRAVE),
        '~' => shifted(KeyCode::GRAVE),
        '\\' => plain(KeyCode::BACKSLASH),
        '|' => shifted(KeyCode::BACKSLASH),
        ',' => plain(KeyCode::COMMA),
        '<' => shifted(KeyCode::COMMA),
        '.' => plain(KeyCode::DOT),
        '>' => shifted(KeyCode::DOT),
        '/' => plain(KeyCode::SLASH),
        '?' => shifted(KeyCode::SLASH),
        ' ' => plain(KeyCode::SPACE),
        '\n' => plain(KeyCode::ENTER),
        '\t' => plain(KeyCode::TAB),
        _ => None,
    }
}

const LETTERS: [KeyCode; 26] = [
    KeyCode::A,
    KeyCode::B,
    KeyCode::C,
    KeyCode::D,
    KeyCode::E,
    KeyCode::F,
    KeyCode::G,
    KeyCode::H,
    KeyCode::I,
    KeyCode::J,
    KeyCode::K,
    KeyCode::L,
    KeyCode::M,
    KeyCode::N,
    KeyCode::O,
    KeyCode::P,
    KeyCode::Q,
    KeyCode::R,
    KeyCode::S,
    KeyCode::T,
    KeyCode::U,
    KeyCode::V,
    KeyCode::W,
    KeyCode::X,
    KeyCode::Y,
    KeyCode::Z,
];

fn letter(lower: char) -> KeyCode {
    LETTERS[usize::from(lower as u8 - b'a')]
}

/// Unshifted character a key produces, if any. Inverse of [`qwerty`] for
/// plain keys.
pub fn plain_char(code: KeyCode) -> Option<char> {
    (' '..='~')
        .chain(['\n', '\t'])
        .find(|&ch| qwerty(ch) == Some((code, false)))
}

/// Character a key produces with shift held, if any.
pub fn shifted_char(code: KeyCode) -> Option<char> {
    (' '..='~').find(|&ch| qwerty(ch) == Some((code, true)))
}

/// Resolve an accelerator key name (case-insensitive).
///
/// Besides the named keys, a single character typeable without shift
/// (`"a"`, `"1"`, `"/"`) names its own key.
pub fn key_by_name(name: &str) -> Option<KeyCode> {
    let lower = name.trim().to_lowercase();
    if let Some((_, code)) = KEY_NAMES.iter().find(|(n, _)| *n == lower) {
        return Some(*code);
    }
    let mut chars = lower.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => qwerty(ch).map(|(code, _)| code),
        _ => None,
    }
}
