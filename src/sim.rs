//! In-process simulated device under test.
//!
//! [`SimDut`] stands in for every external collaborator the harness drives:
//! the automation surface, the keyboard, touch and pointer devices, the
//! audio loopback, the browser launcher and the policy server. All of them
//! share one [`SimState`] behind a mutex, so a key injected through the
//! keyboard device shows up in the next accessibility snapshot.
//!
//! The model is small but faithful where the harness looks: pages served by
//! the test server are fetched and their fields parsed from the HTML, the
//! Japanese engine converts romaji to kana, pinyin commits through its
//! candidate, Alt+Search toggles caps lock, the virtual keyboard has a
//! suggestion bar, voice and handwriting layouts, and OS settings can add
//! and remove input methods.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Value, json};

use crate::core::config::HarnessConfig;
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::fixture::browser::{
    self, Browser, BrowserOption, BrowserType, Launcher, TABLET_MODE_FLAG, VK_ENABLED_FLAG,
};
use crate::fixture::kiosk::{AccountType, DmsEmulator, PolicyBlob};
use crate::fixture::{DmsFactory, Environment};
use crate::ime::{DEFAULT_INPUT_METHOD, INPUT_SETTINGS_URL, InputMethod};
use crate::input::devices::{
    AudioDevice, Contact, DeviceHub, KeyboardDevice, PointerDevice, TouchDevice,
};
use crate::input::keycodes::{self, KeyCode};
use crate::surface::{AutomationConn, MouseButton, NodeAction, Request};
use crate::testserver::EMOJI_PICKER_NAME;
use crate::testserver::page::http_get;
use crate::uiauto::node::{NodeState, Point, Rect, Role, UiNode};
use crate::uiauto::vkb::{A11Y_VK_PREF, VK_ROOT_NAME};

/// Component prefix of every installed engine id.
pub const IME_PREFIX: &str = "_comp_ime_jkghodnilhceideoidjikpgommlajknk";

const SCREEN: Rect = Rect::new(0, 0, 1280, 800);
const PAGE_AREA: Rect = Rect::new(0, 0, 1280, 480);
const VK_AREA: Rect = Rect::new(0, 500, 1280, 300);
const CANVAS: Rect = Rect::new(100, 540, 1000, 190);
const FIELD_ID_BASE: u64 = 100;

const VOICE_KEY: &str = "switch to voice input";
const HANDWRITING_KEY: &str = "switch to handwriting, not compatible with ChromeVox";
const KEYBOARD_KEY: &str = "switch to keyboard";
const KEY_ROWS: [&str; 4] = ["1234567890", "qwertyuiop", "asdfghjkl", "zxcvbnm"];
const SPECIAL_KEYS: [&str; 9] = [
    "shift",
    VOICE_KEY,
    "space",
    HANDWRITING_KEY,
    "backspace",
    "enter",
    "@",
    ".",
    ".com",
];

/// Emoji and the keywords the picker search matches.
const EMOJIS: [(&str, &str); 8] = [
    ("😂", "face with tears of joy laugh"),
    ("😀", "grinning face smile"),
    ("😍", "smiling face with heart eyes love"),
    ("👍", "thumbs up yes"),
    ("❤️", "red heart love"),
    ("🎉", "party popper celebrate"),
    ("🔥", "fire hot"),
    ("🙏", "folded hands please thanks"),
];

/// Words the glide decoder resolves collapsed key paths to.
const GLIDE_WORDS: [&str; 8] = [
    "hello", "hola", "bonjour", "hej", "password", "test", "world", "keyboard",
];

const PINYIN: [(&str, &str); 3] = [("nihao", "你好"), ("zhongguo", "中国"), ("xiexie", "谢谢")];

const ROMAJI: &[(&str, &str)] = &[
    ("a", "あ"), ("i", "い"), ("u", "う"), ("e", "え"), ("o", "お"),
    ("ka", "か"), ("ki", "き"), ("ku", "く"), ("ke", "け"), ("ko", "こ"),
    ("ga", "が"), ("gi", "ぎ"), ("gu", "ぐ"), ("ge", "げ"), ("go", "ご"),
    ("sa", "さ"), ("shi", "し"), ("si", "し"), ("su", "す"), ("se", "せ"), ("so", "そ"),
    ("za", "ざ"), ("ji", "じ"), ("zu", "ず"), ("ze", "ぜ"), ("zo", "ぞ"),
    ("ta", "た"), ("chi", "ち"), ("ti", "ち"), ("tsu", "つ"), ("tu", "つ"), ("te", "て"), ("to", "と"),
    ("da", "だ"), ("de", "で"), ("do", "ど"),
    ("na", "な"), ("ni", "に"), ("nu", "ぬ"), ("ne", "ね"), ("no", "の"),
    ("ha", "は"), ("hi", "ひ"), ("fu", "ふ"), ("hu", "ふ"), ("he", "へ"), ("ho", "ほ"),
    ("ba", "ば"), ("bi", "び"), ("bu", "ぶ"), ("be", "べ"), ("bo", "ぼ"),
    ("pa", "ぱ"), ("pi", "ぴ"), ("pu", "ぷ"), ("pe", "ぺ"), ("po", "ぽ"),
    ("ma", "ま"), ("mi", "み"), ("mu", "む"), ("me", "め"), ("mo", "も"),
    ("ya", "や"), ("yu", "ゆ"), ("yo", "よ"),
    ("ra", "ら"), ("ri", "り"), ("ru", "る"), ("re", "れ"), ("ro", "ろ"),
    ("wa", "わ"), ("wo", "を"), ("nn", "ん"),
];

static TAG_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<(textarea|input)\b([^>]*)>").ok());
static ATTR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z-]+)(?:="([^"]*)")?"#).ok());
static TITLE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<title>([^<]*)</title>").ok());
static MIRROR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"getElementById\('([^']+)'\)\.value\s*=\s*this\.value").ok()
});

fn sim_error(details: impl Into<String>) -> IthError {
    IthError::automation(format!("sim: {}", details.into()))
}

// ──────────────────── page model ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimField {
    name: String,
    html_id: String,
    input_type: String,
    multiline: bool,
    readonly: bool,
    /// Html id of the field this one copies its value into on input.
    mirror_to: Option<String>,
    text: Vec<char>,
    cursor: usize,
}

impl SimField {
    fn value(&self) -> String {
        self.text.iter().collect()
    }

    fn is_password(&self) -> bool {
        self.input_type == "password"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Page {
    title: String,
    fields: Vec<SimField>,
}

fn parse_page(html: &str) -> Result<Page> {
    let (Some(tag_re), Some(attr_re), Some(title_re), Some(mirror_re)) = (
        TAG_RE.as_ref(),
        ATTR_RE.as_ref(),
        TITLE_RE.as_ref(),
        MIRROR_RE.as_ref(),
    ) else {
        return Err(sim_error("page patterns failed to compile"));
    };
    let title = title_re
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let mut fields = Vec::new();
    for tag in tag_re.captures_iter(html) {
        let kind = tag.get(1).map_or("", |m| m.as_str());
        let mut attrs: BTreeMap<String, String> = BTreeMap::new();
        for attr in attr_re.captures_iter(tag.get(2).map_or("", |m| m.as_str())) {
            if let Some(key) = attr.get(1) {
                let value = attr.get(2).map_or("", |m| m.as_str());
                attrs.insert(key.as_str().to_lowercase(), value.to_string());
            }
        }
        let Some(name) = attrs.get("aria-label").cloned() else {
            continue;
        };
        let multiline = kind == "textarea";
        fields.push(SimField {
            name,
            html_id: attrs.get("id").cloned().unwrap_or_default(),
            input_type: if multiline {
                "textarea".to_string()
            } else {
                attrs.get("type").cloned().unwrap_or_else(|| "text".to_string())
            },
            multiline,
            readonly: attrs.contains_key("readonly"),
            mirror_to: attrs
                .get("oninput")
                .and_then(|js| mirror_re.captures(js))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            text: Vec::new(),
            cursor: 0,
        });
    }
    if title.is_empty() {
        return Err(sim_error("page has no title"));
    }
    Ok(Page { title, fields })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TabKind {
    Page(Page),
    Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tab {
    url: String,
    incognito: bool,
    kind: TabKind,
}

// ──────────────────── input-method model ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImeMode {
    Direct,
    Romaji,
    Pinyin,
}

fn is_vowel(ch: char) -> bool {
    matches!(ch, 'a' | 'i' | 'u' | 'e' | 'o')
}

fn romaji_lookup(s: &str) -> Option<&'static str> {
    ROMAJI.iter().find(|(r, _)| *r == s).map(|(_, k)| *k)
}

fn pinyin_candidate(s: &str) -> Option<&'static str> {
    PINYIN.iter().find(|(p, _)| *p == s).map(|(_, c)| *c)
}

fn collapse(s: &str) -> String {
    let mut out = String::new();
    for ch in s.chars() {
        if !out.ends_with(ch) {
            out.push(ch);
        }
    }
    out
}

/// Word for a glide path: a known word whose collapsed spelling matches,
/// else the path itself.
fn decode_glide(path: &str) -> String {
    GLIDE_WORDS
        .iter()
        .find(|w| collapse(w) == path)
        .map_or_else(|| path.to_string(), |w| (*w).to_string())
}

fn keypad_char(code: KeyCode) -> Option<char> {
    Some(match code {
        KeyCode::KP0 => '0',
        KeyCode::KP1 => '1',
        KeyCode::KP2 => '2',
        KeyCode::KP3 => '3',
        KeyCode::KP4 => '4',
        KeyCode::KP5 => '5',
        KeyCode::KP6 => '6',
        KeyCode::KP7 => '7',
        KeyCode::KP8 => '8',
        KeyCode::KP9 => '9',
        KeyCode::KPASTERISK => '*',
        KeyCode::KPPLUS => '+',
        KeyCode::KPMINUS => '-',
        KeyCode::KPSLASH => '/',
        KeyCode::KPEQUAL => '=',
        KeyCode::KPDOT => '.',
        KeyCode::KPENTER => '\n',
        _ => return None,
    })
}

// ──────────────────── screen model ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Keys,
    Voice,
    Handwriting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Vk {
    layout: Layout,
    shift: bool,
    /// Handwriting recognised since the layout was opened.
    handwriting_done: bool,
}

impl Vk {
    const fn new() -> Self {
        Self {
            layout: Layout::Keys,
            shift: false,
            handwriting_done: false,
        }
    }
}

/// What a point on screen activates.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Field(usize),
    MenuEmoji,
    Emoji(String),
    Key(String),
    Suggestion(String),
    SettingsAdd,
    SettingsOption(InputMethod),
    SettingsConfirm,
    SettingsRemove(InputMethod),
    GotIt,
}

struct Scene {
    root: UiNode,
    /// Hit targets in paint order; the last one containing a point wins.
    targets: Vec<(Rect, Target)>,
}

impl Scene {
    fn hit(&self, p: Point) -> Option<Target> {
        self.targets
            .iter()
            .rev()
            .find(|(rect, _)| rect.contains(p))
            .map(|(_, t)| t.clone())
    }

    /// Keys whose centre lies on `p`.
    fn key_centred_at(&self, p: Point) -> Option<&str> {
        self.targets.iter().find_map(|(rect, t)| match t {
            Target::Key(name) => {
                let c = rect.center();
                ((c.x - p.x).abs() < 1.5 && (c.y - p.y).abs() < 1.5).then_some(name.as_str())
            }
            _ => None,
        })
    }
}

struct Ids(u64);

impl Ids {
    fn node(&mut self, role: Role, name: impl Into<String>, location: Rect) -> UiNode {
        self.0 += 1;
        UiNode {
            id: self.0,
            role,
            name: name.into(),
            location,
            ..UiNode::default()
        }
    }
}

fn at(x: i32, y: i32, w: i32, h: i32) -> Rect {
    Rect::new(x, y, w, h)
}

fn index_i32(i: usize) -> i32 {
    i32::try_from(i).unwrap_or(i32::MAX)
}

// ──────────────────── shared state ────────────────────

/// One recorded browser launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub browser_type: BrowserType,
    pub args: Vec<String>,
    pub login: &'static str,
    pub kiosk: bool,
}

#[derive(Debug)]
struct SimState {
    running: bool,
    tablet: bool,
    vk_flag: bool,
    launches: Vec<Launch>,
    fail_launches: usize,
    prefs: BTreeMap<String, Value>,
    installed: Vec<String>,
    current: String,
    ime_settings_resets: usize,
    tabs: BTreeMap<u64, Tab>,
    next_tab: u64,
    focus: Option<(u64, usize)>,
    pending: String,
    suggestions: Vec<String>,
    caps_lock: bool,
    shift: bool,
    shift_alone: bool,
    alt: bool,
    ctrl: bool,
    context_menu: bool,
    emoji_search: Option<String>,
    settings_dialog: Option<Option<InputMethod>>,
    vk: Option<Vk>,
    handwriting_intro: bool,
    mouse: Point,
    touch_path: Vec<Point>,
    aloop: bool,
    transcripts: BTreeMap<String, String>,
    handwriting_text: Option<String>,
    recording: Option<PathBuf>,
    policy: Option<PolicyBlob>,
    dms_started: u64,
    ops: Vec<&'static str>,
}

impl SimState {
    fn new() -> Self {
        let default = format!("{IME_PREFIX}{}", DEFAULT_INPUT_METHOD.id());
        Self {
            running: false,
            tablet: false,
            vk_flag: false,
            launches: Vec::new(),
            fail_launches: 0,
            prefs: BTreeMap::new(),
            installed: vec![default.clone()],
            current: default,
            ime_settings_resets: 0,
            tabs: BTreeMap::new(),
            next_tab: 1,
            focus: None,
            pending: String::new(),
            suggestions: Vec::new(),
            caps_lock: false,
            shift: false,
            shift_alone: false,
            alt: false,
            ctrl: false,
            context_menu: false,
            emoji_search: None,
            settings_dialog: None,
            vk: None,
            handwriting_intro: true,
            mouse: Point::default(),
            touch_path: Vec::new(),
            aloop: false,
            transcripts: BTreeMap::new(),
            handwriting_text: None,
            recording: None,
            policy: None,
            dms_started: 0,
            ops: Vec::new(),
        }
    }

    /// Clear transient UI state, as a browser reset does.
    fn clear_session(&mut self) {
        self.tabs.clear();
        self.focus = None;
        self.pending.clear();
        self.suggestions.clear();
        self.caps_lock = false;
        self.shift = false;
        self.shift_alone = false;
        self.alt = false;
        self.ctrl = false;
        self.context_menu = false;
        self.emoji_search = None;
        self.settings_dialog = None;
        self.vk = None;
        self.touch_path.clear();
    }

    fn active_tab_id(&self) -> Option<u64> {
        self.tabs.keys().next_back().copied()
    }

    fn active_page(&self) -> Option<(u64, &Page)> {
        let id = self.active_tab_id()?;
        match &self.tabs.get(&id)?.kind {
            TabKind::Page(page) => Some((id, page)),
            TabKind::Settings => None,
        }
    }

    fn focused_field(&self) -> Option<&SimField> {
        let (tab, idx) = self.focus?;
        match &self.tabs.get(&tab)?.kind {
            TabKind::Page(page) => page.fields.get(idx),
            TabKind::Settings => None,
        }
    }

    fn focused_field_mut(&mut self) -> Option<&mut SimField> {
        let (tab, idx) = self.focus?;
        match &mut self.tabs.get_mut(&tab)?.kind {
            TabKind::Page(page) => page.fields.get_mut(idx),
            TabKind::Settings => None,
        }
    }

    fn auto_vk(&self) -> bool {
        self.vk_flag || self.prefs.get(A11Y_VK_PREF) == Some(&Value::Bool(true))
    }

    fn ime_mode(&self) -> ImeMode {
        let bare = self.current.strip_prefix(IME_PREFIX).unwrap_or(&self.current);
        match InputMethod::find_by_id(bare) {
            Some(InputMethod::Japanese | InputMethod::JapaneseWithUSKeyboard) => ImeMode::Romaji,
            Some(InputMethod::ChinesePinyin | InputMethod::ChineseTraditionalPinyin) => {
                ImeMode::Pinyin
            }
            _ => ImeMode::Direct,
        }
    }

    // ──────────────────── editing ────────────────────

    /// Copy the focused field's value into its mirror, if it has one.
    fn sync_mirror(&mut self) {
        let Some((tab, idx)) = self.focus else { return };
        let Some(Tab {
            kind: TabKind::Page(page),
            ..
        }) = self.tabs.get_mut(&tab)
        else {
            return;
        };
        let Some(source) = page.fields.get(idx) else { return };
        let Some(target_id) = source.mirror_to.clone() else { return };
        let text = source.text.clone();
        if let Some(mirror) = page.fields.iter_mut().find(|f| f.html_id == target_id) {
            mirror.cursor = text.len();
            mirror.text = text;
        }
    }

    fn edit(&mut self, f: impl FnOnce(&mut SimField)) {
        let Some(field) = self.focused_field_mut() else {
            tracing::debug!("[ITH-SIM] input dropped: no focused field");
            return;
        };
        if field.readonly {
            return;
        }
        f(field);
        self.sync_mirror();
    }

    fn insert_str(&mut self, s: &str) {
        if let Some(search) = self.emoji_search.as_mut() {
            search.push_str(s);
            return;
        }
        let chars: Vec<char> = s.chars().collect();
        self.edit(|field| {
            let at = field.cursor.min(field.text.len());
            field.text.splice(at..at, chars.iter().copied());
            field.cursor = at + chars.len();
        });
    }

    fn backspace(&mut self) {
        if let Some(search) = self.emoji_search.as_mut() {
            search.pop();
            return;
        }
        if self.pending.pop().is_some() {
            return;
        }
        self.edit(|field| {
            let at = field.cursor.min(field.text.len());
            if at > 0 {
                field.text.remove(at - 1);
                field.cursor = at - 1;
            }
        });
    }

    fn move_cursor(&mut self, code: KeyCode) {
        self.commit_pending();
        self.edit(|field| {
            field.cursor = match code {
                KeyCode::LEFT => field.cursor.saturating_sub(1),
                KeyCode::RIGHT => (field.cursor + 1).min(field.text.len()),
                KeyCode::HOME => 0,
                _ => field.text.len(),
            };
        });
    }

    fn commit_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let text = match self.ime_mode() {
            ImeMode::Pinyin => pinyin_candidate(&pending).map_or(pending.clone(), str::to_string),
            ImeMode::Romaji if pending == "n" => "ん".to_string(),
            _ => pending,
        };
        self.insert_str(&text);
    }

    fn convert_romaji(&mut self) {
        while !self.pending.is_empty() {
            if let Some(kana) = romaji_lookup(&self.pending) {
                self.pending.clear();
                self.insert_str(kana);
                return;
            }
            let mut chars = self.pending.chars();
            let (first, second) = (chars.next(), chars.next());
            match (first, second) {
                (Some('n'), Some(c)) if !is_vowel(c) && c != 'y' && c != 'n' => {
                    self.pending.remove(0);
                    self.insert_str("ん");
                    continue;
                }
                (Some(a), Some(b)) if a == b && !is_vowel(a) => {
                    self.pending.remove(0);
                    self.insert_str("っ");
                    continue;
                }
                _ => {}
            }
            if ROMAJI.iter().any(|(r, _)| r.starts_with(self.pending.as_str())) {
                return;
            }
            let raw = self.pending.remove(0);
            self.insert_str(&raw.to_string());
        }
    }

    /// Route one typed character through the active input method.
    fn type_char(&mut self, ch: char) {
        if self.emoji_search.is_some() {
            self.insert_str(&ch.to_string());
            return;
        }
        match self.ime_mode() {
            ImeMode::Romaji if ch.is_ascii_alphabetic() => {
                self.pending.push(ch.to_ascii_lowercase());
                self.convert_romaji();
            }
            ImeMode::Pinyin if ch.is_ascii_alphabetic() => {
                self.pending.push(ch.to_ascii_lowercase());
            }
            _ => {
                self.commit_pending();
                self.insert_str(&ch.to_string());
            }
        }
        self.refresh_suggestions();
    }

    fn space(&mut self) {
        if self.pending.is_empty() {
            self.insert_str(" ");
        } else {
            self.commit_pending();
        }
        self.refresh_suggestions();
    }

    fn enter(&mut self) {
        if !self.pending.is_empty() {
            self.commit_pending();
        } else if self.focused_field().is_some_and(|f| f.multiline) {
            self.insert_str("\n");
        }
        self.refresh_suggestions();
    }

    fn refresh_suggestions(&mut self) {
        self.suggestions = if self.pending.is_empty() {
            self.focused_field()
                .filter(|f| !f.is_password())
                .map(|f| {
                    let before: String = f.text[..f.cursor.min(f.text.len())].iter().collect();
                    before
                        .rsplit(char::is_whitespace)
                        .next()
                        .unwrap_or_default()
                        .to_string()
                })
                .filter(|w| !w.is_empty())
                .into_iter()
                .collect()
        } else if self.ime_mode() == ImeMode::Pinyin {
            pinyin_candidate(&self.pending)
                .map(str::to_string)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };
    }

    fn select_suggestion(&mut self, candidate: &str) {
        if self.pending.is_empty() {
            self.edit(|field| {
                let at = field.cursor.min(field.text.len());
                let start = field.text[..at]
                    .iter()
                    .rposition(|c| c.is_whitespace())
                    .map_or(0, |p| p + 1);
                field.text.drain(start..at);
                field.cursor = start;
            });
        } else {
            self.pending.clear();
        }
        self.insert_str(candidate);
        self.suggestions.clear();
    }

    // ──────────────────── physical keyboard ────────────────────

    fn key(&mut self, code: KeyCode, pressed: bool) {
        match code {
            KeyCode::LEFTSHIFT | KeyCode::RIGHTSHIFT => {
                self.shift = pressed;
                if pressed {
                    self.shift_alone = true;
                } else if self.shift_alone && self.caps_lock {
                    self.caps_lock = false;
                    tracing::debug!("[ITH-SIM] caps lock off");
                }
            }
            KeyCode::LEFTALT | KeyCode::RIGHTALT => {
                self.alt = pressed;
                self.shift_alone = false;
            }
            KeyCode::LEFTCTRL | KeyCode::RIGHTCTRL => {
                self.ctrl = pressed;
                self.shift_alone = false;
            }
            KeyCode::LEFTMETA | KeyCode::RIGHTMETA => {
                self.shift_alone = false;
                if pressed && self.alt {
                    self.caps_lock = !self.caps_lock;
                    tracing::debug!(on = self.caps_lock, "[ITH-SIM] caps lock toggled");
                }
            }
            KeyCode::CAPSLOCK if pressed => self.caps_lock = !self.caps_lock,
            _ if pressed => {
                self.shift_alone = false;
                self.press(code);
            }
            _ => {}
        }
    }

    fn press(&mut self, code: KeyCode) {
        if self.ctrl || self.alt {
            return;
        }
        if let Some(ch) = keypad_char(code) {
            if ch == '\n' {
                self.enter();
            } else {
                self.type_char(ch);
            }
            return;
        }
        match code {
            KeyCode::BACKSPACE => {
                self.backspace();
                self.refresh_suggestions();
            }
            KeyCode::LEFT | KeyCode::RIGHT | KeyCode::HOME | KeyCode::END => self.move_cursor(code),
            KeyCode::ENTER => self.enter(),
            KeyCode::SPACE => self.space(),
            KeyCode::ESC => {
                self.context_menu = false;
                self.emoji_search = None;
            }
            _ => {
                let Some(plain) = keycodes::plain_char(code) else {
                    return;
                };
                let ch = if plain.is_ascii_alphabetic() {
                    if self.shift != self.caps_lock {
                        plain.to_ascii_uppercase()
                    } else {
                        plain
                    }
                } else if self.shift {
                    keycodes::shifted_char(code).unwrap_or(plain)
                } else {
                    plain
                };
                if ch != '\t' {
                    self.type_char(ch);
                }
            }
        }
    }

    // ──────────────────── pointer and touch ────────────────────

    fn focus_field(&mut self, tab: u64, idx: usize) {
        if self.focus != Some((tab, idx)) {
            self.commit_pending();
        }
        self.focus = Some((tab, idx));
        self.refresh_suggestions();
        if self.auto_vk() && self.vk.is_none() {
            self.vk = Some(Vk::new());
        }
    }

    fn activate(&mut self, target: Option<Target>) {
        if !matches!(target, Some(Target::MenuEmoji)) {
            self.context_menu = false;
        }
        let Some(target) = target else { return };
        match target {
            Target::Field(idx) => {
                self.emoji_search = None;
                if let Some(tab) = self.active_tab_id() {
                    self.focus_field(tab, idx);
                }
            }
            Target::MenuEmoji => {
                self.context_menu = false;
                self.emoji_search = Some(String::new());
            }
            Target::Emoji(emoji) => {
                self.emoji_search = None;
                self.insert_str(&emoji);
            }
            Target::Key(name) => self.vk_key(&name),
            Target::Suggestion(s) => self.select_suggestion(&s),
            Target::SettingsAdd => self.settings_dialog = Some(None),
            Target::SettingsOption(im) => self.settings_dialog = Some(Some(im)),
            Target::SettingsConfirm => {
                if let Some(Some(im)) = self.settings_dialog.take() {
                    self.add_input_method(format!("{IME_PREFIX}{}", im.id()));
                }
            }
            Target::SettingsRemove(im) => {
                if let Err(err) = self.remove_input_method(&format!("{IME_PREFIX}{}", im.id())) {
                    tracing::debug!(error = %err, "[ITH-SIM] remove from settings ignored");
                }
            }
            Target::GotIt => self.handwriting_intro = false,
        }
    }

    fn click(&mut self, point: Point, button: MouseButton) {
        self.mouse = point;
        let target = self.scene().hit(point);
        match button {
            MouseButton::Left => self.activate(target),
            MouseButton::Right => {
                if let Some(Target::Field(idx)) = target {
                    self.activate(Some(Target::Field(idx)));
                    self.context_menu = true;
                } else {
                    self.context_menu = false;
                }
            }
            MouseButton::Middle => {}
        }
    }

    fn vk_key(&mut self, name: &str) {
        let Some(vk) = self.vk.as_mut() else { return };
        match name {
            "shift" => vk.shift = !vk.shift,
            VOICE_KEY => vk.layout = Layout::Voice,
            HANDWRITING_KEY => {
                vk.layout = Layout::Handwriting;
                vk.handwriting_done = false;
            }
            KEYBOARD_KEY => vk.layout = Layout::Keys,
            "space" => self.space(),
            "enter" => self.enter(),
            "backspace" => {
                self.backspace();
                self.refresh_suggestions();
            }
            ".com" => {
                self.commit_pending();
                self.insert_str(".com");
                self.refresh_suggestions();
            }
            other => {
                let mut chars = other.chars();
                if let (Some(ch), None) = (chars.next(), chars.next()) {
                    let ch = if vk.shift { ch.to_ascii_uppercase() } else { ch };
                    vk.shift = false;
                    self.type_char(ch);
                }
            }
        }
    }

    fn touch(&mut self, contacts: &[Contact]) {
        if let Some(first) = contacts.first() {
            self.touch_path.push(first.point);
            return;
        }
        let path = std::mem::take(&mut self.touch_path);
        let Some(&last) = path.last() else { return };
        let scene = self.scene();
        match self.vk.map(|vk| vk.layout) {
            Some(Layout::Handwriting) if CANVAS.contains(path[0]) => {
                if self.handwriting_intro {
                    return;
                }
                let done = self.vk.is_some_and(|vk| vk.handwriting_done);
                if !done && let Some(text) = self.handwriting_text.clone() {
                    if let Some(vk) = self.vk.as_mut() {
                        vk.handwriting_done = true;
                    }
                    self.insert_str(&text);
                    self.refresh_suggestions();
                }
            }
            Some(Layout::Keys) => {
                let mut keys: Vec<String> = Vec::new();
                for p in &path {
                    if let Some(k) = scene.key_centred_at(*p)
                        && keys.last().map(String::as_str) != Some(k)
                    {
                        keys.push(k.to_string());
                    }
                }
                let password = self.focused_field().is_some_and(SimField::is_password);
                if keys.len() <= 1 || password {
                    if let Some(Target::Key(k)) = scene.hit(last) {
                        self.vk_key(&k);
                    }
                } else {
                    let word = decode_glide(&keys.concat());
                    self.commit_pending();
                    self.insert_str(&word);
                    self.suggestions = vec![word];
                }
            }
            _ => self.activate(scene.hit(path[0])),
        }
    }

    // ──────────────────── input methods ────────────────────

    fn add_input_method(&mut self, id: String) {
        if !self.installed.contains(&id) {
            tracing::debug!(%id, "[ITH-SIM] input method added");
            self.installed.push(id);
        }
    }

    fn remove_input_method(&mut self, id: &str) -> Result<()> {
        if !self.installed.iter().any(|i| i == id) {
            return Ok(());
        }
        if self.installed.len() == 1 {
            return Err(IthError::InputMethod {
                details: "cannot remove the last input method".to_string(),
            });
        }
        self.installed.retain(|i| i != id);
        if self.current == id
            && let Some(first) = self.installed.first()
        {
            self.current = first.clone();
        }
        Ok(())
    }

    // ──────────────────── accessibility tree ────────────────────

    fn scene(&self) -> Scene {
        let mut ids = Ids(10_000);
        let mut targets = Vec::new();
        let mut root = ids.node(Role::Window, "Desktop", SCREEN);
        if let Some(id) = self.active_tab_id()
            && let Some(tab) = self.tabs.get(&id)
        {
            match &tab.kind {
                TabKind::Page(page) => root.children.push(self.page_node(id, page, &mut targets)),
                TabKind::Settings => root.children.push(self.settings_node(&mut ids, &mut targets)),
            }
        }
        if self.context_menu {
            let mut menu = ids.node(Role::Menu, "", at(700, 100, 200, 60));
            let rect = at(700, 110, 200, 30);
            menu.children.push(ids.node(Role::MenuItem, "Emoji", rect));
            targets.push((rect, Target::MenuEmoji));
            root.children.push(menu);
        }
        if let Some(search) = &self.emoji_search {
            root.children.push(Self::emoji_node(&mut ids, search, &mut targets));
        }
        if let Some(vk) = &self.vk {
            root.children.push(self.vk_node(&mut ids, vk, &mut targets));
        }
        Scene { root, targets }
    }

    fn page_node(&self, tab: u64, page: &Page, targets: &mut Vec<(Rect, Target)>) -> UiNode {
        let mut root = UiNode {
            id: 10,
            role: Role::RootWebArea,
            name: page.title.clone(),
            location: PAGE_AREA,
            ..UiNode::default()
        };
        for (i, field) in page.fields.iter().enumerate() {
            let rect = at(10, 40 + index_i32(i) * 22, 600, 20);
            let mut value = field.value();
            if self.focus == Some((tab, i)) && !self.pending.is_empty() {
                let (head, tail) = field.text.split_at(field.cursor.min(field.text.len()));
                value = head
                    .iter()
                    .copied()
                    .chain(self.pending.chars())
                    .chain(tail.iter().copied())
                    .collect();
            }
            if field.is_password() {
                value = "•".repeat(value.chars().count());
            }
            let mut node = UiNode {
                id: FIELD_ID_BASE + u64::try_from(i).unwrap_or(0),
                role: Role::TextField,
                name: field.name.clone(),
                value,
                location: rect,
                ..UiNode::default()
            };
            if field.input_type != "textarea" {
                node.html_attributes
                    .insert("type".to_string(), field.input_type.clone());
            }
            node.state.insert(NodeState::Focusable);
            if field.readonly {
                node.state.insert(NodeState::Readonly);
            } else {
                node.state.insert(NodeState::Editable);
            }
            if field.multiline {
                node.state.insert(NodeState::Multiline);
            }
            if field.is_password() {
                node.state.insert(NodeState::Protected);
            }
            if self.focus == Some((tab, i)) {
                node.state.insert(NodeState::Focused);
            }
            targets.push((rect, Target::Field(i)));
            root.children.push(node);
        }
        root
    }

    fn settings_node(&self, ids: &mut Ids, targets: &mut Vec<(Rect, Target)>) -> UiNode {
        let mut root = ids.node(Role::RootWebArea, "Settings - Inputs", PAGE_AREA);
        root.children
            .push(ids.node(Role::Heading, "Inputs", at(20, 5, 300, 30)));
        let add = at(20, 40, 200, 30);
        root.children
            .push(ids.node(Role::Button, "Add input methods", add));
        targets.push((add, Target::SettingsAdd));
        let installed: Vec<InputMethod> = self
            .installed
            .iter()
            .filter_map(|id| InputMethod::find_by_id(id.strip_prefix(IME_PREFIX).unwrap_or(id)))
            .collect();
        for (i, im) in installed.iter().enumerate() {
            let top = 80 + index_i32(i) * 40;
            root.children
                .push(ids.node(Role::StaticText, im.name(), at(340, top, 300, 30)));
            let rect = at(20, top, 300, 30);
            root.children
                .push(ids.node(Role::Button, format!("Remove {}", im.name()), rect));
            targets.push((rect, Target::SettingsRemove(*im)));
        }
        if let Some(selected) = self.settings_dialog {
            let mut dialog = ids.node(Role::Dialog, "Add input methods", at(400, 100, 420, 400));
            let available = InputMethod::ALL
                .into_iter()
                .filter(|im| !installed.contains(im));
            for (i, im) in available.enumerate() {
                let rect = at(410, 130 + index_i32(i) * 18, 380, 16);
                let mut option = ids.node(Role::ListBoxOption, im.name(), rect);
                if selected == Some(im) {
                    option.state.insert(NodeState::Focused);
                }
                dialog.children.push(option);
                targets.push((rect, Target::SettingsOption(im)));
            }
            let confirm = at(720, 460, 80, 30);
            dialog.children.push(ids.node(Role::Button, "Add", confirm));
            targets.push((confirm, Target::SettingsConfirm));
            root.children.push(dialog);
        }
        root
    }

    fn emoji_node(ids: &mut Ids, search: &str, targets: &mut Vec<(Rect, Target)>) -> UiNode {
        let mut root = ids.node(Role::RootWebArea, EMOJI_PICKER_NAME, at(700, 50, 500, 300));
        let mut search_box = ids.node(Role::SearchBox, "Search", at(710, 60, 480, 30));
        search_box.value = search.to_string();
        root.children.push(search_box);
        let needle = search.to_lowercase();
        let shown = EMOJIS
            .iter()
            .filter(|(_, keywords)| needle.is_empty() || keywords.contains(needle.as_str()));
        for (i, (emoji, _)) in shown.enumerate() {
            let i = index_i32(i);
            let rect = at(710 + (i % 8) * 55, 110 + (i / 8) * 55, 50, 50);
            root.children.push(ids.node(Role::Button, *emoji, rect));
            targets.push((rect, Target::Emoji((*emoji).to_string())));
        }
        root
    }

    fn vk_node(&self, ids: &mut Ids, vk: &Vk, targets: &mut Vec<(Rect, Target)>) -> UiNode {
        fn key(
            ids: &mut Ids,
            root: &mut UiNode,
            targets: &mut Vec<(Rect, Target)>,
            name: &str,
            rect: Rect,
        ) {
            root.children.push(ids.node(Role::Button, name, rect));
            targets.push((rect, Target::Key(name.to_string())));
        }

        let mut root = ids.node(Role::RootWebArea, VK_ROOT_NAME, VK_AREA);
        match vk.layout {
            Layout::Keys => {
                for (i, s) in self.suggestions.iter().enumerate() {
                    let rect = at(20 + index_i32(i) * 150, 505, 140, 30);
                    let mut node = ids.node(Role::Button, s.clone(), rect);
                    node.class_name = "sk".to_string();
                    root.children.push(node);
                    targets.push((rect, Target::Suggestion(s.clone())));
                }
                for (r, row) in (0_i32..).zip(KEY_ROWS) {
                    for (c, ch) in (0_i32..).zip(row.chars()) {
                        let rect = at(20 + r * 20 + c * 70, 540 + r * 50, 60, 40);
                        key(ids, &mut root, targets, &ch.to_string(), rect);
                    }
                }
                for (i, name) in (0_i32..).zip(SPECIAL_KEYS) {
                    key(ids, &mut root, targets, name, at(20 + i * 110, 740, 100, 40));
                }
            }
            Layout::Voice => {
                let mut mic = ids.node(Role::Image, "Voice input", at(600, 600, 80, 80));
                mic.class_name = "voice-mic-img".to_string();
                root.children.push(mic);
                key(ids, &mut root, targets, KEYBOARD_KEY, at(20, 740, 100, 40));
            }
            Layout::Handwriting => {
                root.children
                    .push(ids.node(Role::Canvas, "handwriting canvas", CANVAS));
                if self.handwriting_intro {
                    let rect = at(1150, 505, 100, 30);
                    root.children.push(ids.node(Role::Button, "Got it", rect));
                    targets.push((rect, Target::GotIt));
                }
                key(ids, &mut root, targets, KEYBOARD_KEY, at(20, 740, 100, 40));
            }
        }
        root
    }

    // ──────────────────── automation requests ────────────────────

    fn field_by_node_id(&self, node_id: u64) -> Result<(u64, usize)> {
        let (tab, page) = self
            .active_page()
            .ok_or_else(|| sim_error(format!("no node {node_id}")))?;
        let idx = node_id
            .checked_sub(FIELD_ID_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < page.fields.len())
            .ok_or_else(|| sim_error(format!("node {node_id} is not an input field")))?;
        Ok((tab, idx))
    }

    fn node_action(&mut self, node_id: u64, action: &NodeAction) -> Result<Value> {
        if node_id < FIELD_ID_BASE || node_id >= 10_000 {
            return match action {
                NodeAction::SetValue(_) => Err(sim_error(format!("node {node_id} is not editable"))),
                _ => Ok(Value::Null),
            };
        }
        let (tab, idx) = self.field_by_node_id(node_id)?;
        match action {
            NodeAction::Focus | NodeAction::DoDefault => self.focus_field(tab, idx),
            NodeAction::MakeVisible => {}
            NodeAction::SetValue(value) => {
                if self.focus == Some((tab, idx)) {
                    self.pending.clear();
                }
                let prev = self.focus.replace((tab, idx));
                self.edit(|field| {
                    field.text = value.chars().collect();
                    field.cursor = field.text.len();
                });
                self.focus = prev;
                self.refresh_suggestions();
            }
        }
        Ok(Value::Null)
    }

    fn handle(&mut self, req: &Request, loaded: Option<TabKind>) -> Result<Value> {
        self.ops.push(req.op());
        match req {
            Request::Eval { expr } => match (expr.trim(), self.active_page()) {
                ("document.title", Some((_, page))) => Ok(json!(page.title)),
                _ => Err(sim_error(format!("cannot evaluate {expr:?}"))),
            },
            Request::Snapshot => serde_json::to_value(self.scene().root).map_err(Into::into),
            Request::MouseClick {
                point,
                button,
                double,
            } => {
                self.click(*point, *button);
                if *double {
                    self.click(*point, *button);
                }
                Ok(Value::Null)
            }
            Request::MouseMove { point, .. } => {
                self.mouse = *point;
                Ok(Value::Null)
            }
            Request::MousePress { .. } => Ok(Value::Null),
            Request::MouseRelease { button } => {
                if *button == MouseButton::Left {
                    let target = self.scene().hit(self.mouse);
                    self.activate(target);
                }
                Ok(Value::Null)
            }
            Request::NodeAction { node_id, action } => self.node_action(*node_id, action),
            Request::GetPref { name } => Ok(self.prefs.get(name).cloned().unwrap_or(Value::Null)),
            Request::SetPref { name, value } => {
                if name == A11Y_VK_PREF && *value == Value::Bool(false) {
                    self.vk = None;
                }
                self.prefs.insert(name.clone(), value.clone());
                Ok(Value::Null)
            }
            Request::InputMethods => Ok(json!(self.installed)),
            Request::AddInputMethod { id } => {
                self.add_input_method(id.clone());
                Ok(Value::Null)
            }
            Request::RemoveInputMethod { id } => self.remove_input_method(id).map(|()| Value::Null),
            Request::SetCurrentInputMethod { id } => {
                if !self.installed.contains(id) {
                    return Err(IthError::InputMethod {
                        details: format!("{id} is not installed"),
                    });
                }
                self.commit_pending();
                self.current.clone_from(id);
                Ok(Value::Null)
            }
            Request::CurrentInputMethod => Ok(json!(self.current)),
            Request::ImePrefix => Ok(json!(IME_PREFIX)),
            Request::ResetInputMethodSettings { .. } => {
                self.ime_settings_resets += 1;
                Ok(Value::Null)
            }
            Request::NewTab { url, incognito } => {
                let kind = loaded.ok_or_else(|| sim_error(format!("cannot load {url}")))?;
                Ok(json!(self.open_tab(url, *incognito, kind)))
            }
            Request::CloseTab { tab_id } => {
                self.tabs
                    .remove(tab_id)
                    .ok_or_else(|| sim_error(format!("no tab {tab_id}")))?;
                if self.focus.is_some_and(|(tab, _)| tab == *tab_id) {
                    self.focus = None;
                    self.pending.clear();
                }
                self.settings_dialog = None;
                Ok(Value::Null)
            }
            Request::ResetState => {
                self.clear_session();
                Ok(Value::Null)
            }
            Request::Ping => Ok(Value::Null),
            Request::IsTabletMode => Ok(json!(self.tablet)),
            Request::ShowVirtualKeyboard => {
                if self.vk.is_none() {
                    self.vk = Some(Vk::new());
                }
                Ok(Value::Null)
            }
            Request::HideVirtualKeyboard => {
                self.vk = None;
                Ok(Value::Null)
            }
            Request::Screenshot { path } => {
                write_artifact(path, b"\x89PNG\r\n\x1a\n")?;
                Ok(Value::Null)
            }
            Request::StartRecording { path } => {
                if self.recording.is_some() {
                    return Err(sim_error("a recording is already running"));
                }
                self.recording = Some(path.clone());
                Ok(Value::Null)
            }
            Request::StopRecording => {
                if let Some(path) = self.recording.take() {
                    write_artifact(&path, b"\x1a\x45\xdf\xa3")?;
                }
                Ok(Value::Null)
            }
        }
    }

    fn open_tab(&mut self, url: &str, incognito: bool, kind: TabKind) -> u64 {
        let id = self.next_tab;
        self.next_tab += 1;
        self.context_menu = false;
        self.emoji_search = None;
        self.tabs.insert(
            id,
            Tab {
                url: url.to_string(),
                incognito,
                kind,
            },
        );
        id
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| IthError::io(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| IthError::io(path, err))
}

/// Load what a tab at `url` would show. Runs without the state lock held.
fn load(url: &str) -> Result<TabKind> {
    if url == INPUT_SETTINGS_URL {
        return Ok(TabKind::Settings);
    }
    if url.starts_with("http://") {
        return parse_page(&http_get(url)?).map(TabKind::Page);
    }
    Err(sim_error(format!("cannot load {url}")))
}

type Shared = Arc<Mutex<SimState>>;

// ──────────────────── collaborator implementations ────────────────────

struct SimConn {
    state: Shared,
}

impl AutomationConn for SimConn {
    fn call(&self, ctx: &Context, req: &Request) -> Result<Value> {
        ctx.err()?;
        let loaded = match req {
            Request::NewTab { url, .. } => Some(load(url)?),
            _ => None,
        };
        let mut state = self.state.lock();
        if !state.running && !matches!(req, Request::ImePrefix | Request::InputMethods) {
            return Err(sim_error(format!("{}: browser is not running", req.op())));
        }
        state.handle(req, loaded)
    }
}

struct SimBrowser {
    state: Shared,
    conn: Arc<SimConn>,
    browser_type: BrowserType,
}

impl Browser for SimBrowser {
    fn browser_type(&self) -> BrowserType {
        self.browser_type
    }

    fn test_conn(&self) -> Arc<dyn AutomationConn> {
        Arc::clone(&self.conn) as Arc<dyn AutomationConn>
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        ctx.err()?;
        let mut state = self.state.lock();
        state.clear_session();
        state.running = false;
        tracing::debug!(browser = ?self.browser_type, "[ITH-SIM] browser closed");
        Ok(())
    }
}

struct SimLauncher {
    state: Shared,
    conn: Arc<SimConn>,
}

impl Launcher for SimLauncher {
    fn launch(
        &self,
        ctx: &Context,
        browser_type: BrowserType,
        opts: &[BrowserOption],
    ) -> Result<Arc<dyn Browser>> {
        ctx.err()?;
        let args = browser::command_line(opts);
        let dms = browser::flatten(opts)
            .into_iter()
            .any(|o| matches!(o, BrowserOption::DmsPolicy(_)));
        let kiosk_url = {
            let mut state = self.state.lock();
            if state.fail_launches > 0 {
                state.fail_launches -= 1;
                return Err(sim_error("browser failed to start"));
            }
            if dms {
                state.policy.as_ref().and_then(|p| {
                    p.auto_launch_account()
                        .filter(|a| a.account_type == AccountType::KioskWebApp)
                        .map(|a| a.app.clone())
                })
            } else {
                None
            }
        };
        let kiosk_page = kiosk_url.as_deref().map(load).transpose()?;

        let mut state = self.state.lock();
        state.clear_session();
        state.running = true;
        state.tablet = args.iter().any(|a| a == TABLET_MODE_FLAG);
        state.vk_flag = args.iter().any(|a| a == VK_ENABLED_FLAG);
        state.launches.push(Launch {
            browser_type,
            args,
            login: browser::login_mode(opts),
            kiosk: kiosk_page.is_some(),
        });
        if let (Some(url), Some(kind)) = (kiosk_url, kiosk_page) {
            state.open_tab(&url, false, kind);
        }
        tracing::debug!(?browser_type, tablet = state.tablet, "[ITH-SIM] browser launched");
        Ok(Arc::new(SimBrowser {
            state: Arc::clone(&self.state),
            conn: Arc::clone(&self.conn),
            browser_type,
        }))
    }
}

struct SimKeyboard(Shared);

impl KeyboardDevice for SimKeyboard {
    fn key(&mut self, code: KeyCode, pressed: bool) -> Result<()> {
        self.0.lock().key(code, pressed);
        Ok(())
    }
}

struct SimTouchscreen(Shared);

impl TouchDevice for SimTouchscreen {
    fn report(&mut self, contacts: &[Contact]) -> Result<()> {
        self.0.lock().touch(contacts);
        Ok(())
    }
}

/// Trackpad: a single finger moves the pointer by its displacement.
struct SimTrackpad {
    state: Shared,
    last: Option<Point>,
}

impl TouchDevice for SimTrackpad {
    fn report(&mut self, contacts: &[Contact]) -> Result<()> {
        let now = contacts.first().map(|c| c.point);
        if let (Some(prev), Some(now)) = (self.last, now) {
            let mut state = self.state.lock();
            state.mouse = Point::new(state.mouse.x + now.x - prev.x, state.mouse.y + now.y - prev.y);
        }
        self.last = now;
        Ok(())
    }
}

struct SimMouse(Shared);

impl PointerDevice for SimMouse {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<()> {
        let mut state = self.0.lock();
        state.mouse = Point::new(state.mouse.x + f64::from(dx), state.mouse.y + f64::from(dy));
        Ok(())
    }

    fn button(&mut self, button: MouseButton, pressed: bool) -> Result<()> {
        if !pressed {
            let mut state = self.0.lock();
            let point = state.mouse;
            state.click(point, button);
        }
        Ok(())
    }
}

struct SimAudio(Shared);

impl AudioDevice for SimAudio {
    fn set_aloop(&self, ctx: &Context, enabled: bool) -> Result<()> {
        ctx.err()?;
        self.0.lock().aloop = enabled;
        Ok(())
    }

    fn play(&self, ctx: &Context, file: &Path) -> Result<()> {
        ctx.err()?;
        let mut state = self.0.lock();
        if !state.aloop {
            return Err(IthError::Device {
                device: "audio",
                details: "loopback is disabled".to_string(),
            });
        }
        let key = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let listening = state.vk.is_some_and(|vk| vk.layout == Layout::Voice);
        match state.transcripts.get(&key).cloned() {
            Some(text) if listening => {
                state.insert_str(&text);
                state.refresh_suggestions();
            }
            Some(_) => tracing::debug!(file = %key, "[ITH-SIM] audio played while not listening"),
            None => tracing::debug!(file = %key, "[ITH-SIM] no transcript for audio"),
        }
        Ok(())
    }
}

struct SimDms {
    state: Shared,
    dir: Option<PathBuf>,
    serial: u64,
}

impl DmsEmulator for SimDms {
    fn start(&mut self, ctx: &Context, tmpdir: &Path) -> Result<()> {
        ctx.err()?;
        fs::create_dir_all(tmpdir).map_err(|err| IthError::io(tmpdir, err))?;
        let mut state = self.state.lock();
        state.dms_started += 1;
        self.serial = state.dms_started;
        self.dir = Some(tmpdir.to_path_buf());
        Ok(())
    }

    fn write_policy_blob(&mut self, blob: &PolicyBlob) -> Result<()> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| sim_error("policy server is not running"))?;
        let path = dir.join("policy.json");
        let raw = serde_json::to_vec_pretty(blob)?;
        fs::write(&path, raw).map_err(|err| IthError::io(&path, err))?;
        self.state.lock().policy = Some(blob.clone());
        Ok(())
    }

    fn url(&self) -> Result<String> {
        if self.dir.is_none() {
            return Err(sim_error("policy server is not running"));
        }
        Ok(format!("http://127.0.0.1/sim-dms/{}", self.serial))
    }

    fn stop(&mut self, ctx: &Context) -> Result<()> {
        ctx.err()?;
        self.dir = None;
        Ok(())
    }
}

// ──────────────────── public handle ────────────────────

/// Handle on one simulated device. Clones share the same device.
#[derive(Clone)]
pub struct SimDut {
    state: Shared,
    conn: Arc<SimConn>,
}

impl std::fmt::Debug for SimDut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimDut")
            .field("running", &state.running)
            .field("tabs", &state.tabs.len())
            .field("current_ime", &state.current)
            .finish_non_exhaustive()
    }
}

impl Default for SimDut {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDut {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(SimState::new()));
        Self {
            conn: Arc::new(SimConn {
                state: Arc::clone(&state),
            }),
            state,
        }
    }

    /// Text the speech recogniser returns for an audio file name.
    #[must_use]
    pub fn with_transcript(self, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.state
            .lock()
            .transcripts
            .insert(file_name.into(), text.into());
        self
    }

    /// Text the handwriting recogniser returns for any drawing.
    #[must_use]
    pub fn with_handwriting_result(self, text: impl Into<String>) -> Self {
        self.state.lock().handwriting_text = Some(text.into());
        self
    }

    /// Make the next `n` launches fail.
    pub fn fail_next_launches(&self, n: usize) {
        self.state.lock().fail_launches = n;
    }

    pub fn conn(&self) -> Arc<dyn AutomationConn> {
        Arc::clone(&self.conn) as Arc<dyn AutomationConn>
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        Arc::new(SimLauncher {
            state: Arc::clone(&self.state),
            conn: Arc::clone(&self.conn),
        })
    }

    /// Fresh device hub wired to this device.
    pub fn device_hub(&self) -> Arc<DeviceHub> {
        DeviceHub::builder()
            .keyboard(Box::new(SimKeyboard(Arc::clone(&self.state))))
            .touchscreen(Box::new(SimTouchscreen(Arc::clone(&self.state))))
            .trackpad(Box::new(SimTrackpad {
                state: Arc::clone(&self.state),
                last: None,
            }))
            .mouse(Box::new(SimMouse(Arc::clone(&self.state))))
            .audio(Arc::new(SimAudio(Arc::clone(&self.state))))
            .build()
    }

    pub fn dms_factory(&self) -> DmsFactory {
        let state = Arc::clone(&self.state);
        Arc::new(move || {
            Box::new(SimDms {
                state: Arc::clone(&state),
                dir: None,
                serial: 0,
            }) as Box<dyn DmsEmulator>
        })
    }

    /// Environment whose launcher, devices and policy server are this
    /// device.
    pub fn environment(&self, config: HarnessConfig) -> Environment {
        Environment::new(config, self.launcher())
            .with_devices(self.device_hub())
            .with_dms(self.dms_factory())
    }

    // ──────────────────── inspection ────────────────────

    /// Raw value of the first field named `name` in any open page.
    pub fn field_value(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        state.tabs.values().rev().find_map(|tab| match &tab.kind {
            TabKind::Page(page) => page
                .fields
                .iter()
                .find(|f| f.name == name)
                .map(SimField::value),
            TabKind::Settings => None,
        })
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.state.lock().launches.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_vk_shown(&self) -> bool {
        self.state.lock().vk.is_some()
    }

    pub fn caps_lock(&self) -> bool {
        self.state.lock().caps_lock
    }

    /// Prefixed ids of the installed input methods.
    pub fn installed_input_methods(&self) -> Vec<String> {
        self.state.lock().installed.clone()
    }

    pub fn current_input_method(&self) -> String {
        self.state.lock().current.clone()
    }

    pub fn ime_settings_resets(&self) -> usize {
        self.state.lock().ime_settings_resets
    }

    /// URLs of the open tabs, oldest first, with their incognito flag.
    pub fn open_tabs(&self) -> Vec<(String, bool)> {
        self.state
            .lock()
            .tabs
            .values()
            .map(|t| (t.url.clone(), t.incognito))
            .collect()
    }

    pub fn policy(&self) -> Option<PolicyBlob> {
        self.state.lock().policy.clone()
    }

    /// Operation names of every request served, in order.
    pub fn ops(&self) -> Vec<&'static str> {
        self.state.lock().ops.clone()
    }
}
