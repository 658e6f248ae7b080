//! The input-test server: a local page of named input fields and the
//! actions tests run against it.

pub mod page;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::action::{self, Action, combine, named, retry_silently};
use crate::core::context::Context;
use crate::core::errors::{IthError, Result, ResultExt};
use crate::fixture::browser::{Browser, BrowserType};
use crate::ime::data::InputData;
use crate::ime::{self, InputMethod};
use crate::input::devices::DeviceHub;
use crate::input::voice;
use crate::surface::AutomationConn;
use crate::uiauto::automation::UiAutoContext;
use crate::uiauto::finder::Finder;
use crate::uiauto::node::Role;
use crate::uiauto::vkb::VirtualKeyboardContext;
use crate::useractions::{
    ActionTag, AttributeKey, FEATURE_EMOJI_PICKER, FEATURE_HANDWRITING, FEATURE_PK_TYPING,
    FEATURE_VK_TYPING, FEATURE_VOICE_INPUT, UserActionCfg, UserContext, user_action,
};
use crate::validate;

pub use page::{PAGE_TITLE, TestPageServer, URL_PATH};

const FIELD_ACTIVE_TIMEOUT: Duration = Duration::from_secs(3);
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
const REFOCUS_SETTLE: Duration = Duration::from_secs(1);

/// Accessible name of the emoji picker window.
pub const EMOJI_PICKER_NAME: &str = "Emoji Picker";

/// Root web area of the test page.
pub fn page_root_finder() -> Finder {
    Finder::new().role(Role::RootWebArea).name(PAGE_TITLE)
}

pub fn emoji_picker_finder() -> Finder {
    Finder::new().role(Role::RootWebArea).name(EMOJI_PICKER_NAME)
}

/// A named field on the test page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputField {
    TextArea,
    Text,
    Search,
    Password,
    /// Readonly text field mirroring the password field.
    PasswordMirror,
    Number,
    Email,
    Url,
    Tel,
    Date,
    Month,
    Week,
    Time,
    DateTime,
    TextInputNumeric,
    TextAreaNoCorrection,
    AutoShiftSentence,
    AutoShiftWord,
    AutoShiftChar,
    AutoShiftOff,
}

impl InputField {
    pub const ALL: [Self; 20] = [
        Self::TextArea,
        Self::Text,
        Self::Search,
        Self::Password,
        Self::PasswordMirror,
        Self::Number,
        Self::Email,
        Self::Url,
        Self::Tel,
        Self::Date,
        Self::Month,
        Self::Week,
        Self::Time,
        Self::DateTime,
        Self::TextInputNumeric,
        Self::TextAreaNoCorrection,
        Self::AutoShiftSentence,
        Self::AutoShiftWord,
        Self::AutoShiftChar,
        Self::AutoShiftOff,
    ];

    /// The field's `aria-label`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::TextArea => "textAreaInputField",
            Self::Text => "textInputField",
            Self::Search => "searchInputField",
            Self::Password => "passwordInputField",
            Self::PasswordMirror => "passwordTextField",
            Self::Number => "numberInputField",
            Self::Email => "emailInputField",
            Self::Url => "urlInputField",
            Self::Tel => "telInputField",
            Self::Date => "dateInputField",
            Self::Month => "monthInputField",
            Self::Week => "weekInputField",
            Self::Time => "timeInputField",
            Self::DateTime => "dateTimeInputField",
            Self::TextInputNumeric => "textInputNumericField",
            Self::TextAreaNoCorrection => {
                "textArea disabled autocomplete, autocorrect, autocapitalize"
            }
            Self::AutoShiftSentence => "autocapitalize in sentence mode",
            Self::AutoShiftWord => "autocapitalize in words mode",
            Self::AutoShiftChar => "autocapitalize in characters mode",
            Self::AutoShiftOff => "autocapitalize off",
        }
    }

    pub fn finder(self) -> Finder {
        Finder::new().ancestor(page_root_finder()).name(self.name())
    }

    /// Whether `modality` can enter text in this field.
    pub fn is_supported(self, modality: InputModality) -> bool {
        !(self == Self::Password
            && matches!(modality, InputModality::Handwriting | InputModality::Voice))
    }
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How text is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputModality {
    Vk,
    Pk,
    Handwriting,
    Voice,
}

impl fmt::Display for InputModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vk => "VK",
            Self::Pk => "PK",
            Self::Handwriting => "Handwriting",
            Self::Voice => "Voice",
        })
    }
}

/// A served test page and the actions that drive it.
pub struct InputsTestServer {
    server: TestPageServer,
    conn: Arc<dyn AutomationConn>,
    browser: Option<Arc<dyn Browser>>,
    tab: Option<u64>,
    ui: UiAutoContext,
    vkb: VirtualKeyboardContext,
    devices: Option<Arc<DeviceHub>>,
}

impl fmt::Debug for InputsTestServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputsTestServer")
            .field("url", &self.server.url())
            .field("tab", &self.tab)
            .finish_non_exhaustive()
    }
}

impl InputsTestServer {
    /// Serve the page and open it in a new tab.
    pub fn launch(ctx: &Context, browser: &Arc<dyn Browser>) -> Result<Self> {
        Self::launch_in_mode(ctx, browser, false)
    }

    /// Serve the page and open it in a normal or incognito window.
    pub fn launch_in_mode(ctx: &Context, browser: &Arc<dyn Browser>, incognito: bool) -> Result<Self> {
        let server = TestPageServer::start()?;
        let url = server.url();
        let mode = if incognito { "incognito" } else { "normal" };
        tracing::info!(%url, mode, "[ITH-SERVER] opening test page");
        let tab = browser
            .open_page(ctx, &url, incognito)
            .wrap(format!("open test page in {mode} mode"))?;
        let mut its = Self::attach(server, browser.test_conn());
        its.browser = Some(Arc::clone(browser));
        its.tab = Some(tab);
        if let Err(err) = its.wait_for_page(ctx) {
            let _ = its.close(ctx);
            return Err(err);
        }
        Ok(its)
    }

    /// [`Self::launch`] after checking the session runs `browser_type`.
    pub fn launch_browser(
        ctx: &Context,
        browser_type: BrowserType,
        browser: &Arc<dyn Browser>,
    ) -> Result<Self> {
        if browser.browser_type() != browser_type {
            return Err(IthError::Precondition {
                details: format!(
                    "wanted a {browser_type:?} browser, session runs {:?}",
                    browser.browser_type()
                ),
            });
        }
        Self::launch(ctx, browser)
    }

    /// Serve the page without opening it, for sessions whose page is shown
    /// by someone else (a kiosk app). Waits until a test page is on screen.
    pub fn launch_server(ctx: &Context, conn: Arc<dyn AutomationConn>) -> Result<Self> {
        let server = TestPageServer::start()?;
        let its = Self::attach(server, conn);
        its.wait_for_page(ctx)?;
        Ok(its)
    }

    fn attach(server: TestPageServer, conn: Arc<dyn AutomationConn>) -> Self {
        Self {
            server,
            ui: UiAutoContext::new(Arc::clone(&conn)),
            vkb: VirtualKeyboardContext::new(Arc::clone(&conn)),
            conn,
            browser: None,
            tab: None,
            devices: None,
        }
    }

    fn wait_for_page(&self, ctx: &Context) -> Result<()> {
        self.ui
            .with_timeout(PAGE_LOAD_TIMEOUT)
            .wait_until_exists(&page_root_finder())
            .run(ctx)
            .wrap("render test page")
    }

    /// Input devices used by physical typing, voice and handwriting.
    #[must_use]
    pub fn with_devices(mut self, hub: Arc<DeviceHub>) -> Self {
        self.devices = Some(hub);
        self
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn conn(&self) -> &Arc<dyn AutomationConn> {
        &self.conn
    }

    pub fn ui(&self) -> &UiAutoContext {
        &self.ui
    }

    pub fn vkb(&self) -> &VirtualKeyboardContext {
        &self.vkb
    }

    /// Devices attached with [`Self::with_devices`].
    pub fn device_hub(&self) -> Result<Arc<DeviceHub>> {
        self.devices.clone().ok_or_else(|| IthError::Precondition {
            details: "test server has no input devices attached".to_string(),
        })
    }

    /// Close the page's tab and stop serving.
    pub fn close(self, ctx: &Context) -> Result<()> {
        let closed = match (&self.browser, self.tab) {
            (Some(browser), Some(tab)) => browser.close_page(ctx, tab),
            _ => Ok(()),
        };
        self.server.close();
        closed.wrap("close test page")
    }

    // ──────────────────── field actions ────────────────────

    /// Empty the field.
    pub fn clear(&self, field: InputField) -> Action {
        named(format!("clear {field}"), self.ui.set_value(&field.finder(), ""))
    }

    /// Wait up to 3 s for the field to hold focus.
    pub fn wait_for_field_to_be_active(&self, field: InputField) -> Action {
        self.ui
            .with_timeout(FIELD_ACTIVE_TIMEOUT)
            .wait_until_exists(&field.finder().focused())
    }

    /// Scroll the field into view and click it.
    pub fn click_field(&self, field: InputField) -> Action {
        let finder = field.finder();
        combine(
            "make input field visible on the screen and click it",
            [self.ui.make_visible(&finder), self.ui.left_click(&finder)],
        )
    }

    /// Some IMEs drop the first key typed right after a refocus.
    fn settle_after_refocus(&self) -> Action {
        let conn = Arc::clone(&self.conn);
        Action::new(move |ctx| {
            let id = ime::active_input_method_id(ctx, conn.as_ref())?;
            if InputMethod::find_by_id(&id).is_some_and(InputMethod::drops_key_after_refocus) {
                tracing::debug!(ime = %id, "[ITH-IME] waiting after refocus");
                ctx.sleep(REFOCUS_SETTLE)?;
            }
            Ok(())
        })
    }

    pub fn click_field_and_wait_for_active(&self, field: InputField) -> Action {
        combine(
            format!("click {field} and wait for it to be active"),
            [
                retry_silently(
                    3,
                    combine(
                        "click input field and wait for it to be active",
                        [self.click_field(field), self.wait_for_field_to_be_active(field)],
                    ),
                ),
                self.settle_after_refocus(),
            ],
        )
    }

    pub fn clear_then_click_field_and_wait_for_active(&self, field: InputField) -> Action {
        combine(
            "clear input field, click it, and wait for it to be active",
            [self.clear(field), self.click_field_and_wait_for_active(field)],
        )
    }

    pub fn right_click_field_and_wait_for_active(&self, field: InputField) -> Action {
        let finder = field.finder();
        retry_silently(
            3,
            combine(
                "right click input field and wait for it to be active",
                [
                    self.ui.make_visible(&finder),
                    self.ui.right_click(&finder),
                    self.wait_for_field_to_be_active(field),
                ],
            ),
        )
    }

    /// Click the field until the virtual keyboard shows up.
    pub fn click_field_until_vk_shown(&self, field: InputField) -> Action {
        let finder = field.finder();
        combine(
            "make input field visible on the screen and click it until virtual keyboard is shown",
            [
                self.ui.make_visible(&finder),
                self.vkb.click_until_vk_shown(&finder),
            ],
        )
    }

    fn clean_field_and_trigger_vk(&self, field: InputField) -> Action {
        combine(
            format!("clean and trigger VK on field {field}"),
            [
                self.vkb.hide(),
                self.clear(field),
                self.click_field_until_vk_shown(field),
            ],
        )
    }

    // ──────────────────── validation ────────────────────

    /// Wait for the field to hold exactly `expected`. The password field
    /// shows one bullet per character; its mirror holds the text.
    pub fn validate_result(&self, field: InputField, expected: &str) -> Action {
        self.validate_text(field, expected, false)
    }

    /// [`Self::validate_result`] with both sides lowercased, for
    /// recognisers that pick their own capitalisation.
    pub fn validate_result_ignoring_case(&self, field: InputField, expected: &str) -> Action {
        self.validate_text(field, expected, true)
    }

    fn validate_text(&self, field: InputField, expected: &str, ignore_case: bool) -> Action {
        let wait = |conn: Arc<dyn AutomationConn>, finder: &Finder, text: &str| {
            if ignore_case {
                validate::wait_for_field_text_to_be_ignoring_case(conn, finder, text)
            } else {
                validate::wait_for_field_text_to_be(conn, finder, text)
            }
        };
        let conn = Arc::clone(&self.conn);
        if field == InputField::Password {
            let bullets = "•".repeat(expected.chars().count());
            return combine(
                "validate password field",
                [
                    validate::wait_for_field_text_to_be(Arc::clone(&conn), &field.finder(), &bullets),
                    wait(conn, &InputField::PasswordMirror.finder(), expected),
                ],
            );
        }
        wait(conn, &field.finder(), expected)
    }

    /// Clear and focus the field, run `input`, then check the text.
    pub fn validate_input_on_field(&self, field: InputField, input: Action, expected: &str) -> Action {
        combine(
            format!("validate input function on field {field}"),
            [
                self.clear(field),
                self.click_field_and_wait_for_active(field),
                input,
                validate::wait_for_field_text_to_be(Arc::clone(&self.conn), &field.finder(), expected),
            ],
        )
    }

    /// Keyboard input must match exactly; voice and handwriting ignore case.
    fn input_cfg(&self, field: InputField, modality: InputModality, data: &InputData) -> UserActionCfg {
        let (feature, validate) = match modality {
            InputModality::Pk => (FEATURE_PK_TYPING, self.validate_result(field, &data.expected_text)),
            InputModality::Vk => (FEATURE_VK_TYPING, self.validate_result(field, &data.expected_text)),
            InputModality::Voice => (
                FEATURE_VOICE_INPUT,
                self.validate_result_ignoring_case(field, &data.expected_text),
            ),
            InputModality::Handwriting => (
                FEATURE_HANDWRITING,
                self.validate_result_ignoring_case(field, &data.expected_text),
            ),
        };
        UserActionCfg::new()
            .attribute(AttributeKey::Feature, feature)
            .attribute(AttributeKey::InputField, field.name())
            .tag(ActionTag::EssentialInputs)
            .validate_result(validate)
    }

    /// Enter `data` into `field` with `modality` and check the result.
    ///
    /// `data_path` resolves the voice and handwriting file names.
    pub fn validate_input_field_for_mode<F>(
        &self,
        uc: &UserContext,
        field: InputField,
        modality: InputModality,
        data: &InputData,
        data_path: F,
    ) -> Action
    where
        F: Fn(&str) -> PathBuf,
    {
        if !field.is_supported(modality) {
            return Action::new(move |_| {
                Err(IthError::Precondition {
                    details: format!("{modality} is not supported for {field}"),
                })
            });
        }
        match modality {
            InputModality::Pk => self.validate_pk_typing(uc, field, data),
            InputModality::Vk => self.validate_vk_typing(uc, field, data),
            InputModality::Voice => {
                let file = data.voice_file.as_deref().map(&data_path);
                self.validate_voice(uc, field, data, file)
            }
            InputModality::Handwriting => {
                let file = data.handwriting_file.as_deref().map(&data_path);
                self.validate_handwriting(uc, field, data, file)
            }
        }
    }

    fn validate_pk_typing(&self, uc: &UserContext, field: InputField, data: &InputData) -> Action {
        let prepare = self.clear_then_click_field_and_wait_for_active(field);
        let devices = self.devices.clone();
        let text = data.typed_text();
        let submit = data.submit_from_suggestion;
        let action = Action::new(move |ctx| {
            let hub = devices.clone().ok_or_else(|| IthError::Precondition {
                details: "physical typing needs a keyboard device".to_string(),
            })?;
            let kb = hub.keyboard()?;
            prepare.run(ctx)?;
            kb.type_str(ctx, &text).wrap("type key sequence")?;
            if submit {
                kb.accel(ctx, "space").wrap("commit candidate")?;
            }
            Ok(())
        });
        user_action(
            "PK typing input",
            named(format!("validate pk input function on field {field}"), action),
            uc,
            self.input_cfg(field, InputModality::Pk, data),
        )
    }

    fn validate_vk_typing(&self, uc: &UserContext, field: InputField, data: &InputData) -> Action {
        let submit = if data.submit_from_suggestion {
            self.vkb.select_from_suggestion(&data.expected_text)
        } else {
            Action::noop()
        };
        let action = combine(
            format!("validate vk input function on field {field}"),
            [
                self.clean_field_and_trigger_vk(field),
                self.vkb.tap_keys_ignoring_case(data.vk_keys()),
                submit,
            ],
        );
        user_action(
            "VK typing input",
            action,
            uc,
            self.input_cfg(field, InputModality::Vk, data),
        )
    }

    fn validate_voice(
        &self,
        uc: &UserContext,
        field: InputField,
        data: &InputData,
        file: Option<PathBuf>,
    ) -> Action {
        let prepare = combine(
            format!("validate vk voice input function on field {field}"),
            [self.clean_field_and_trigger_vk(field), self.vkb.switch_to_voice_input()],
        );
        let devices = self.devices.clone();
        let action = Action::new(move |ctx| {
            let file = file.clone().ok_or_else(|| IthError::Precondition {
                details: "input data has no voice file".to_string(),
            })?;
            let hub = devices.clone().ok_or_else(|| IthError::Precondition {
                details: "voice input needs an audio device".to_string(),
            })?;
            let audio = hub.audio()?;
            let _aloop = voice::enable_aloop(ctx, Arc::clone(&audio))?;
            prepare.run(ctx)?;
            voice::audio_from_file(audio, &file).run(ctx)
        });
        user_action(
            "Voice input",
            action,
            uc,
            self.input_cfg(field, InputModality::Voice, data),
        )
    }

    fn validate_handwriting(
        &self,
        uc: &UserContext,
        field: InputField,
        data: &InputData,
        file: Option<PathBuf>,
    ) -> Action {
        let prepare = combine(
            "switch to handwriting",
            [self.clean_field_and_trigger_vk(field), self.vkb.switch_to_handwriting()],
        );
        let vkb = self.vkb.clone();
        let devices = self.devices.clone();
        let action = Action::new(move |ctx| {
            let file = file.clone().ok_or_else(|| IthError::Precondition {
                details: "input data has no handwriting file".to_string(),
            })?;
            let hub = devices.clone().ok_or_else(|| IthError::Precondition {
                details: "handwriting needs a touchscreen".to_string(),
            })?;
            prepare.run(ctx)?;
            combine(
                "handwriting input on virtual keyboard",
                [
                    vkb.draw_handwriting(hub, &file),
                    action::sleep(Duration::from_millis(500)),
                ],
            )
            .run(ctx)
        });
        user_action(
            "Handwriting",
            action,
            uc,
            self.input_cfg(field, InputModality::Handwriting, data),
        )
    }

    // ──────────────────── emoji picker ────────────────────

    /// Open the emoji picker from the field's context menu.
    pub fn trigger_emoji_picker_from_context_menu(&self, field: InputField) -> Action {
        combine(
            "trigger emoji picker from context menu",
            [
                self.right_click_field_and_wait_for_active(field),
                self.ui
                    .left_click(&Finder::new().role(Role::MenuItem).name("Emoji")),
                self.ui.wait_until_exists(&emoji_picker_finder()),
            ],
        )
    }

    fn emoji_cfg(&self, field: InputField, emoji: &str) -> UserActionCfg {
        UserActionCfg::new()
            .attribute(AttributeKey::Feature, FEATURE_EMOJI_PICKER)
            .attribute(AttributeKey::InputField, field.name())
            .tag(ActionTag::Emoji)
            .tag(ActionTag::EmojiPicker)
            .validate_result(validate::wait_for_field_text_to_be(
                Arc::clone(&self.conn),
                &field.finder(),
                emoji,
            ))
    }

    fn pick_emoji(&self, emoji: &str) -> Action {
        let button = Finder::new()
            .role(Role::Button)
            .name(emoji)
            .ancestor(emoji_picker_finder())
            .first();
        combine(
            format!("select {emoji} in emoji picker"),
            [
                self.ui.left_click(&button),
                self.ui.wait_until_gone(&emoji_picker_finder()),
            ],
        )
    }

    /// Enter `emoji` by picking it in the emoji picker.
    pub fn input_emoji_with_emoji_picker(&self, uc: &UserContext, field: InputField, emoji: &str) -> Action {
        let action = combine(
            format!("input emoji {emoji} with emoji picker"),
            [
                self.clear(field),
                self.trigger_emoji_picker_from_context_menu(field),
                self.pick_emoji(emoji),
            ],
        );
        user_action(
            "Input emoji with Emoji Picker",
            action,
            uc,
            self.emoji_cfg(field, emoji),
        )
    }

    /// Enter `emoji` by searching `keyword` in the emoji picker.
    pub fn input_emoji_with_emoji_picker_search(
        &self,
        uc: &UserContext,
        field: InputField,
        keyword: &str,
        emoji: &str,
    ) -> Action {
        let open = combine(
            "open emoji picker",
            [self.clear(field), self.trigger_emoji_picker_from_context_menu(field)],
        );
        let pick = self.pick_emoji(emoji);
        let devices = self.devices.clone();
        let keyword = keyword.to_string();
        let action = Action::new(move |ctx| {
            let hub = devices.clone().ok_or_else(|| IthError::Precondition {
                details: "emoji search needs a keyboard device".to_string(),
            })?;
            open.run(ctx)?;
            {
                let kb = hub.keyboard()?;
                kb.type_str(ctx, &keyword).wrap("type emoji search keyword")?;
            }
            pick.run(ctx)
        });
        user_action(
            "Input emoji with Emoji Picker search",
            action,
            uc,
            self.emoji_cfg(field, emoji),
        )
    }
}
