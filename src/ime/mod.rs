//! Input-method control: the known IME table and install/activate/remove
//! operations against the automation surface.
//!
//! Ids in the table are bare engine ids (`xkb:us::eng`); the platform
//! stores them behind a component prefix that [`prefix`] reports. Every
//! request sent to the surface carries the prefixed id.

pub mod data;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::poll::{PollOptions, poll};
use crate::action::{Action, combine, named};
use crate::core::context::Context;
use crate::core::errors::{IthError, Result, ResultExt};
use crate::surface::{AutomationConn, ConnExt, Request};
use crate::uiauto::automation::UiAutoContext;
use crate::uiauto::finder::Finder;
use crate::uiauto::node::Role;

/// How long install/remove/activate waits for the platform to catch up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Script family of an input method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Latin,
    Arabic,
    Japanese,
    Korean,
    ChineseSimplified,
    ChineseTraditional,
}

/// Attribute record for one table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImeInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub short_label: &'static str,
    /// Voice-recognition language code.
    pub language_code: &'static str,
    pub script: Script,
    pub glide_typing: bool,
    pub handwriting: bool,
}

/// Input methods the harness knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputMethod {
    EnglishUS,
    EnglishUK,
    EnglishCanada,
    EnglishSouthAfrica,
    EnglishUSWithInternationalKeyboard,
    FrenchFrance,
    SpanishSpain,
    Swedish,
    Arabic,
    Japanese,
    JapaneseWithUSKeyboard,
    AlphanumericWithJapaneseKeyboard,
    Korean,
    ChinesePinyin,
    ChineseTraditionalPinyin,
    ChineseCangjie,
    ChineseZhuyin,
    Cantonese,
}

/// Input method every fixture resets to.
pub const DEFAULT_INPUT_METHOD: InputMethod = InputMethod::EnglishUS;

const fn latin(
    id: &'static str,
    name: &'static str,
    short_label: &'static str,
    language_code: &'static str,
) -> ImeInfo {
    ImeInfo {
        id,
        name,
        short_label,
        language_code,
        script: Script::Latin,
        glide_typing: true,
        handwriting: true,
    }
}

const fn cjk(
    id: &'static str,
    name: &'static str,
    short_label: &'static str,
    language_code: &'static str,
    script: Script,
) -> ImeInfo {
    ImeInfo {
        id,
        name,
        short_label,
        language_code,
        script,
        glide_typing: false,
        handwriting: true,
    }
}

static EN_US: ImeInfo = latin("xkb:us::eng", "English (US)", "US", "en-US");
static EN_UK: ImeInfo = latin("xkb:gb:extd:eng", "English (UK)", "UK", "en-GB");
static EN_CA: ImeInfo = latin("xkb:ca:eng:eng", "English (Canada)", "CA", "en-CA");
static EN_ZA: ImeInfo = latin("xkb:za:gb:eng", "English (South Africa)", "ZA", "en-ZA");
static EN_INTL: ImeInfo = latin(
    "xkb:us:intl:eng",
    "English (US) with International keyboard",
    "INTL",
    "en-US",
);
static FR_FR: ImeInfo = latin("xkb:fr::fra", "French (France)", "FR", "fr-FR");
static ES_ES: ImeInfo = latin("xkb:es::spa", "Spanish (Spain)", "ES", "es-ES");
static SV_SE: ImeInfo = latin("xkb:se::swe", "Swedish", "SE", "sv-SE");
static AR: ImeInfo = ImeInfo {
    id: "vkd_ar",
    name: "Arabic",
    short_label: "AR",
    language_code: "ar-EG",
    script: Script::Arabic,
    glide_typing: false,
    handwriting: true,
};
static JA: ImeInfo = cjk("nacl_mozc_jp", "Japanese", "あ", "ja-JP", Script::Japanese);
static JA_US: ImeInfo = cjk(
    "nacl_mozc_us",
    "Japanese with US keyboard",
    "あ",
    "ja-JP",
    Script::Japanese,
);
static JA_ALNUM: ImeInfo = ImeInfo {
    id: "xkb:jp::jpn",
    name: "Alphanumeric with Japanese keyboard",
    short_label: "JA",
    language_code: "ja-JP",
    script: Script::Latin,
    glide_typing: false,
    handwriting: false,
};
static KO: ImeInfo = cjk("ko-t-i0-und", "Korean", "한", "ko-KR", Script::Korean);
static ZH_PINYIN: ImeInfo = cjk(
    "zh-t-i0-pinyin",
    "Chinese Pinyin",
    "拼",
    "zh-CN",
    Script::ChineseSimplified,
);
static ZH_HANT_PINYIN: ImeInfo = cjk(
    "zh-hant-t-i0-pinyin",
    "Pinyin (Traditional)",
    "拼",
    "zh-TW",
    Script::ChineseTraditional,
);
static ZH_CANGJIE: ImeInfo = cjk(
    "zh-hant-t-i0-cangjie-1987",
    "Cangjie",
    "倉",
    "zh-TW",
    Script::ChineseTraditional,
);
static ZH_ZHUYIN: ImeInfo = cjk(
    "zh-hant-t-i0-und",
    "Zhuyin",
    "注",
    "zh-TW",
    Script::ChineseTraditional,
);
static YUE: ImeInfo = cjk(
    "yue-hant-t-i0-und",
    "Cantonese",
    "粤",
    "yue-Hant-HK",
    Script::ChineseTraditional,
);

impl InputMethod {
    pub const ALL: [Self; 18] = [
        Self::EnglishUS,
        Self::EnglishUK,
        Self::EnglishCanada,
        Self::EnglishSouthAfrica,
        Self::EnglishUSWithInternationalKeyboard,
        Self::FrenchFrance,
        Self::SpanishSpain,
        Self::Swedish,
        Self::Arabic,
        Self::Japanese,
        Self::JapaneseWithUSKeyboard,
        Self::AlphanumericWithJapaneseKeyboard,
        Self::Korean,
        Self::ChinesePinyin,
        Self::ChineseTraditionalPinyin,
        Self::ChineseCangjie,
        Self::ChineseZhuyin,
        Self::Cantonese,
    ];

    pub const fn info(self) -> &'static ImeInfo {
        match self {
            Self::EnglishUS => &EN_US,
            Self::EnglishUK => &EN_UK,
            Self::EnglishCanada => &EN_CA,
            Self::EnglishSouthAfrica => &EN_ZA,
            Self::EnglishUSWithInternationalKeyboard => &EN_INTL,
            Self::FrenchFrance => &FR_FR,
            Self::SpanishSpain => &ES_ES,
            Self::Swedish => &SV_SE,
            Self::Arabic => &AR,
            Self::Japanese => &JA,
            Self::JapaneseWithUSKeyboard => &JA_US,
            Self::AlphanumericWithJapaneseKeyboard => &JA_ALNUM,
            Self::Korean => &KO,
            Self::ChinesePinyin => &ZH_PINYIN,
            Self::ChineseTraditionalPinyin => &ZH_HANT_PINYIN,
            Self::ChineseCangjie => &ZH_CANGJIE,
            Self::ChineseZhuyin => &ZH_ZHUYIN,
            Self::Cantonese => &YUE,
        }
    }

    pub const fn id(self) -> &'static str {
        self.info().id
    }

    pub const fn name(self) -> &'static str {
        self.info().name
    }

    pub const fn short_label(self) -> &'static str {
        self.info().short_label
    }

    pub const fn language_code(self) -> &'static str {
        self.info().language_code
    }

    pub const fn script(self) -> Script {
        self.info().script
    }

    pub const fn supports_glide_typing(self) -> bool {
        self.info().glide_typing
    }

    pub const fn supports_handwriting(self) -> bool {
        self.info().handwriting
    }

    /// Japanese engines drop the first key typed right after a refocus.
    pub const fn drops_key_after_refocus(self) -> bool {
        matches!(self, Self::Japanese | Self::JapaneseWithUSKeyboard)
    }

    /// Look up a table entry by bare engine id.
    pub fn find_by_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|im| im.id() == id)
    }

    fn full_id(self, ctx: &Context, conn: &dyn AutomationConn) -> Result<String> {
        Ok(format!("{}{}", prefix(ctx, conn)?, self.id()))
    }

    fn is_installed(self, ctx: &Context, conn: &dyn AutomationConn) -> Result<bool> {
        let full = self.full_id(ctx, conn)?;
        Ok(installed_input_methods(ctx, conn)?.contains(&full))
    }

    // ──────────────────── actions ────────────────────

    /// Add to the profile's IME list; a no-op when already installed.
    pub fn install(self, conn: Arc<dyn AutomationConn>) -> Action {
        let wait = self.wait_until_installed(Arc::clone(&conn));
        named(
            format!("install input method {self}"),
            Action::new(move |ctx| {
                if self.is_installed(ctx, conn.as_ref())? {
                    return Ok(());
                }
                let id = self.full_id(ctx, conn.as_ref())?;
                tracing::info!(ime = %self, "[ITH-IME] installing");
                conn.exec(ctx, Request::AddInputMethod { id })?;
                wait.run(ctx)
            }),
        )
    }

    /// Make this the current IME. Fails when it is not installed.
    pub fn activate(self, conn: Arc<dyn AutomationConn>) -> Action {
        let wait = self.wait_until_activated(Arc::clone(&conn));
        named(
            format!("activate input method {self}"),
            Action::new(move |ctx| {
                if !self.is_installed(ctx, conn.as_ref())? {
                    return Err(IthError::InputMethod {
                        details: format!("{self} is not installed"),
                    });
                }
                let id = self.full_id(ctx, conn.as_ref())?;
                conn.exec(ctx, Request::SetCurrentInputMethod { id })?;
                wait.run(ctx)
            }),
        )
    }

    pub fn install_and_activate(self, conn: Arc<dyn AutomationConn>) -> Action {
        combine(
            format!("install and activate input method {self}"),
            [self.install(Arc::clone(&conn)), self.activate(conn)],
        )
    }

    /// Remove from the IME list; the platform picks the fallback when it
    /// was active.
    pub fn remove(self, conn: Arc<dyn AutomationConn>) -> Action {
        let wait = self.wait_until_removed(Arc::clone(&conn));
        named(
            format!("remove input method {self}"),
            Action::new(move |ctx| {
                let id = self.full_id(ctx, conn.as_ref())?;
                remove_input_method(ctx, conn.as_ref(), &id)?;
                wait.run(ctx)
            }),
        )
    }

    pub fn wait_until_installed(self, conn: Arc<dyn AutomationConn>) -> Action {
        Action::new(move |ctx| {
            poll(
                ctx,
                |c| {
                    if self.is_installed(c, conn.as_ref())? {
                        Ok(())
                    } else {
                        Err(IthError::InputMethod {
                            details: format!("{self} is not installed yet"),
                        })
                    }
                },
                &PollOptions::with_timeout(WAIT_TIMEOUT),
            )
            .wrap(format!("wait for {self} to be installed"))
        })
    }

    pub fn wait_until_removed(self, conn: Arc<dyn AutomationConn>) -> Action {
        Action::new(move |ctx| {
            poll(
                ctx,
                |c| {
                    if self.is_installed(c, conn.as_ref())? {
                        Err(IthError::InputMethod {
                            details: format!("{self} is still installed"),
                        })
                    } else {
                        Ok(())
                    }
                },
                &PollOptions::with_timeout(WAIT_TIMEOUT),
            )
            .wrap(format!("wait for {self} to be removed"))
        })
    }

    pub fn wait_until_activated(self, conn: Arc<dyn AutomationConn>) -> Action {
        Action::new(move |ctx| {
            wait_for_input_method_matches(ctx, conn.as_ref(), self.id(), WAIT_TIMEOUT)
        })
    }

    /// Restore the engine's settings to their defaults.
    pub fn reset_settings(self, conn: Arc<dyn AutomationConn>) -> Action {
        Action::new(move |ctx| {
            let id = self.full_id(ctx, conn.as_ref())?;
            conn.exec(ctx, Request::ResetInputMethodSettings { id })
        })
    }
}

impl fmt::Display for InputMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

// ──────────────────── queries ────────────────────

/// Component prefix the platform prepends to engine ids.
pub fn prefix(ctx: &Context, conn: &dyn AutomationConn) -> Result<String> {
    conn.fetch(ctx, Request::ImePrefix)
}

/// Prefixed ids of every installed input method.
pub fn installed_input_methods(ctx: &Context, conn: &dyn AutomationConn) -> Result<Vec<String>> {
    conn.fetch(ctx, Request::InputMethods)
}

/// Bare engine id of the current input method.
pub fn active_input_method_id(ctx: &Context, conn: &dyn AutomationConn) -> Result<String> {
    let full: String = conn.fetch(ctx, Request::CurrentInputMethod)?;
    let prefix = prefix(ctx, conn)?;
    Ok(full.strip_prefix(prefix.as_str()).unwrap_or(&full).to_string())
}

/// Current input method; fails when it is not in the known table.
pub fn active_input_method(ctx: &Context, conn: &dyn AutomationConn) -> Result<InputMethod> {
    let id = active_input_method_id(ctx, conn)?;
    InputMethod::find_by_id(&id).ok_or_else(|| IthError::InputMethod {
        details: format!("active input method {id:?} is not a known input method"),
    })
}

/// Poll until the active engine id equals `id`.
pub fn wait_for_input_method_matches(
    ctx: &Context,
    conn: &dyn AutomationConn,
    id: &str,
    timeout: Duration,
) -> Result<()> {
    poll(
        ctx,
        |c| {
            let active = active_input_method_id(c, conn)?;
            if active == id {
                Ok(())
            } else {
                Err(IthError::Assertion {
                    what: "active input method".to_string(),
                    expected: id.to_string(),
                    observed: active,
                })
            }
        },
        &PollOptions::with_timeout(timeout),
    )
}

/// Remove an installed IME by its prefixed id.
pub fn remove_input_method(ctx: &Context, conn: &dyn AutomationConn, full_id: &str) -> Result<()> {
    conn.exec(
        ctx,
        Request::RemoveInputMethod {
            id: full_id.to_string(),
        },
    )
}

/// Bring the IME state back to a single, active, default input method.
pub fn reset_ime_status(ctx: &Context, conn: &Arc<dyn AutomationConn>) -> Result<()> {
    DEFAULT_INPUT_METHOD
        .install(Arc::clone(conn))
        .run(ctx)
        .wrap(format!("install default ime {DEFAULT_INPUT_METHOD}"))?;
    let installed = installed_input_methods(ctx, conn.as_ref()).wrap("get installed ime list")?;
    let prefix = prefix(ctx, conn.as_ref()).wrap("get ime prefix")?;
    for full in installed {
        if full.strip_prefix(prefix.as_str()).unwrap_or(&full) == DEFAULT_INPUT_METHOD.id() {
            continue;
        }
        remove_input_method(ctx, conn.as_ref(), &full).wrap(format!("remove {full}"))?;
    }
    DEFAULT_INPUT_METHOD
        .activate(Arc::clone(conn))
        .run(ctx)
        .wrap(format!("set ime to {DEFAULT_INPUT_METHOD}"))?;
    DEFAULT_INPUT_METHOD
        .reset_settings(Arc::clone(conn))
        .run(ctx)
        .wrap(format!("reset ime settings of {DEFAULT_INPUT_METHOD}"))
}

// ──────────────────── OS settings flows ────────────────────

/// Page listing the profile's input methods.
pub const INPUT_SETTINGS_URL: &str = "chrome://os-settings/osLanguages/input";

fn settings_root() -> Finder {
    Finder::new().role(Role::RootWebArea).name("Settings - Inputs")
}

fn with_settings_page(conn: &Arc<dyn AutomationConn>, name: &str, steps: Action) -> Action {
    let conn = Arc::clone(conn);
    named(
        name.to_string(),
        Action::new(move |ctx| {
            let tab: u64 = conn.fetch(
                ctx,
                Request::NewTab {
                    url: INPUT_SETTINGS_URL.to_string(),
                    incognito: false,
                },
            )?;
            let result = steps.run(ctx);
            let closed = conn.exec(ctx, Request::CloseTab { tab_id: tab });
            result.and(closed)
        }),
    )
}

/// Add `im` the way a user would: through the input settings page.
pub fn add_input_method_in_os_settings(conn: &Arc<dyn AutomationConn>, im: InputMethod) -> Action {
    let ui = UiAutoContext::new(Arc::clone(conn));
    let root = settings_root();
    let add_button = Finder::new()
        .role(Role::Button)
        .name("Add input methods")
        .ancestor(root.clone());
    let dialog = Finder::new()
        .role(Role::Dialog)
        .name("Add input methods")
        .ancestor(root.clone());
    let option = Finder::new()
        .role(Role::ListBoxOption)
        .name(im.name())
        .ancestor(dialog.clone());
    let confirm = Finder::new().role(Role::Button).name("Add").ancestor(dialog.clone());
    with_settings_page(
        conn,
        &format!("add input method {im} in OS settings"),
        combine(
            "add input method through settings",
            [
                ui.wait_until_exists(&root),
                ui.left_click_until(&add_button, ui.exists(&dialog)),
                ui.left_click(&option),
                ui.left_click(&confirm),
                ui.wait_until_gone(&dialog),
                im.wait_until_installed(Arc::clone(conn)),
            ],
        ),
    )
}

/// Remove `im` through the input settings page.
pub fn remove_input_method_in_os_settings(
    conn: &Arc<dyn AutomationConn>,
    im: InputMethod,
) -> Action {
    let ui = UiAutoContext::new(Arc::clone(conn));
    let root = settings_root();
    let remove_button = Finder::new()
        .role(Role::Button)
        .name(format!("Remove {}", im.name()))
        .ancestor(root.clone());
    with_settings_page(
        conn,
        &format!("remove input method {im} in OS settings"),
        combine(
            "remove input method through settings",
            [
                ui.wait_until_exists(&root),
                ui.left_click(&remove_button),
                ui.wait_until_gone(&remove_button),
                im.wait_until_removed(Arc::clone(conn)),
            ],
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::collections::HashSet;

    const PREFIX: &str = "_comp_ime_test";

    #[derive(Default)]
    struct FakeImeConn {
        installed: Mutex<Vec<String>>,
        current: Mutex<String>,
        resets: Mutex<Vec<String>>,
    }

    impl FakeImeConn {
        fn with(ids: &[&str], current: &str) -> Arc<Self> {
            Arc::new(Self {
                installed: Mutex::new(ids.iter().map(|id| format!("{PREFIX}{id}")).collect()),
                current: Mutex::new(format!("{PREFIX}{current}")),
                resets: Mutex::new(Vec::new()),
            })
        }
    }

    impl AutomationConn for FakeImeConn {
        fn call(&self, _ctx: &Context, req: &Request) -> Result<Value> {
            match req {
                Request::ImePrefix => Ok(json!(PREFIX)),
                Request::InputMethods => Ok(json!(*self.installed.lock())),
                Request::CurrentInputMethod => Ok(json!(*self.current.lock())),
                Request::AddInputMethod { id } => {
                    self.installed.lock().push(id.clone());
                    Ok(Value::Null)
                }
                Request::RemoveInputMethod { id } => {
                    let mut installed = self.installed.lock();
                    installed.retain(|i| i != id);
                    let mut current = self.current.lock();
                    if *current == *id {
                        *current = installed.first().cloned().unwrap_or_default();
                    }
                    Ok(Value::Null)
                }
                Request::SetCurrentInputMethod { id } => {
                    *self.current.lock() = id.clone();
                    Ok(Value::Null)
                }
                Request::ResetInputMethodSettings { id } => {
                    self.resets.lock().push(id.clone());
                    Ok(Value::Null)
                }
                other => Err(IthError::automation(format!("unexpected {}", other.op()))),
            }
        }
    }

    #[test]
    fn table_ids_are_unique_and_resolvable() {
        let ids: HashSet<&str> = InputMethod::ALL.iter().map(|im| im.id()).collect();
        assert_eq!(ids.len(), InputMethod::ALL.len());
        for im in InputMethod::ALL {
            assert_eq!(InputMethod::find_by_id(im.id()), Some(im));
        }
        assert_eq!(InputMethod::find_by_id("xkb:zz::zzz"), None);
        assert_eq!(DEFAULT_INPUT_METHOD.id(), "xkb:us::eng");
    }

    #[test]
    fn install_then_remove_leaves_list_unchanged() {
        let conn = FakeImeConn::with(&["xkb:us::eng"], "xkb:us::eng");
        let before = conn.installed.lock().clone();
        let dyn_conn: Arc<dyn AutomationConn> = conn.clone();
        let ctx = Context::background();
        InputMethod::Swedish.install(dyn_conn.clone()).run(&ctx).unwrap();
        assert_eq!(conn.installed.lock().len(), 2);
        InputMethod::Swedish.install(dyn_conn.clone()).run(&ctx).unwrap();
        assert_eq!(conn.installed.lock().len(), 2, "second install is a no-op");
        InputMethod::Swedish.remove(dyn_conn).run(&ctx).unwrap();
        assert_eq!(*conn.installed.lock(), before);
    }

    #[test]
    fn activate_requires_installation() {
        let conn: Arc<dyn AutomationConn> = FakeImeConn::with(&["xkb:us::eng"], "xkb:us::eng");
        let err = InputMethod::Korean
            .activate(conn.clone())
            .run(&Context::background())
            .unwrap_err();
        assert!(err.to_string().contains("not installed"));

        InputMethod::Korean
            .install_and_activate(conn.clone())
            .run(&Context::background())
            .unwrap();
        assert_eq!(
            active_input_method(&Context::background(), conn.as_ref()).unwrap(),
            InputMethod::Korean
        );
    }

    #[test]
    fn reset_leaves_only_default_active() {
        let conn = FakeImeConn::with(&["nacl_mozc_us", "xkb:fr::fra"], "nacl_mozc_us");
        let dyn_conn: Arc<dyn AutomationConn> = conn.clone();
        reset_ime_status(&Context::background(), &dyn_conn).unwrap();
        assert_eq!(*conn.installed.lock(), vec![format!("{PREFIX}xkb:us::eng")]);
        assert_eq!(*conn.current.lock(), format!("{PREFIX}xkb:us::eng"));
        assert_eq!(*conn.resets.lock(), vec![format!("{PREFIX}xkb:us::eng")]);
    }

    #[test]
    fn wait_for_match_reports_observed_id() {
        let conn = FakeImeConn::with(&["xkb:us::eng"], "xkb:us::eng");
        let err = wait_for_input_method_matches(
            &Context::background(),
            conn.as_ref(),
            "nacl_mozc_us",
            Duration::ZERO,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nacl_mozc_us") && msg.contains("xkb:us::eng"), "{msg}");
    }

    #[test]
    fn activating_twice_matches_activating_once() {
        let conn = FakeImeConn::with(&["xkb:us::eng", "xkb:fr::fra"], "xkb:us::eng");
        let dyn_conn: Arc<dyn AutomationConn> = conn.clone();
        let ctx = Context::background();
        InputMethod::FrenchFrance.activate(dyn_conn.clone()).run(&ctx).unwrap();
        let once = (conn.installed.lock().clone(), conn.current.lock().clone());
        InputMethod::FrenchFrance.activate(dyn_conn).run(&ctx).unwrap();
        let twice = (conn.installed.lock().clone(), conn.current.lock().clone());
        assert_eq!(once, twice);
        assert_eq!(twice.1, format!("{PREFIX}xkb:fr::fra"));
    }
}
