//! User-action telemetry: wrap an [`Action`] so every run is recorded with
//! the test's context attributes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::ime;
use crate::surface::{AutomationConn, ConnExt, Request};
use crate::telemetry::{ActionEvent, ActionRecorder};
use crate::uiauto::vkb::A11Y_VK_PREF;

/// Attribute keys a user action may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeKey {
    InputMethod,
    DeviceMode,
    KeyboardType,
    UserMode,
    InputField,
    TestScenario,
    Feature,
    IncognitoMode,
    FloatVK,
}

impl AttributeKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputMethod => "InputMethod",
            Self::DeviceMode => "DeviceMode",
            Self::KeyboardType => "KeyboardType",
            Self::UserMode => "UserMode",
            Self::InputField => "InputField",
            Self::TestScenario => "TestScenario",
            Self::Feature => "Feature",
            Self::IncognitoMode => "IncognitoMode",
            Self::FloatVK => "FloatVK",
        }
    }
}

/// Tags grouping user actions for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionTag {
    IMEShelf,
    IMESettings,
    EssentialInputs,
    Emoji,
    EmojiPicker,
    PKTyping,
    VKTyping,
    VoiceInput,
    HandWriting,
    GlideTyping,
    LongpressDiacritics,
    IMESpecific,
    IMEManagement,
}

impl ActionTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IMEShelf => "IMEShelf",
            Self::IMESettings => "IMESettings",
            Self::EssentialInputs => "EssentialInputs",
            Self::Emoji => "Emoji",
            Self::EmojiPicker => "EmojiPicker",
            Self::PKTyping => "PKTyping",
            Self::VKTyping => "VKTyping",
            Self::VoiceInput => "VoiceInput",
            Self::HandWriting => "HandWriting",
            Self::GlideTyping => "GlideTyping",
            Self::LongpressDiacritics => "LongpressDiacritics",
            Self::IMESpecific => "IMESpecific",
            Self::IMEManagement => "IMEManagement",
        }
    }
}

// Values of the `Feature` attribute.
pub const FEATURE_PK_TYPING: &str = "PK Typing";
pub const FEATURE_VK_TYPING: &str = "VK Typing";
pub const FEATURE_VOICE_INPUT: &str = "Voice Input";
pub const FEATURE_HANDWRITING: &str = "Handwriting";
pub const FEATURE_GLIDE_TYPING: &str = "Glide Typing";
pub const FEATURE_EMOJI_PICKER: &str = "Emoji Picker";
pub const FEATURE_IME_MANAGEMENT: &str = "IME Management";

pub const DEVICE_MODE_CLAMSHELL: &str = "Clamshell";
pub const DEVICE_MODE_TABLET: &str = "Tablet";
pub const KEYBOARD_TYPE_PHYSICAL: &str = "Physical Keyboard";
pub const KEYBOARD_TYPE_VIRTUAL: &str = "Virtual Keyboard";

/// Login flavour of the session under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserMode {
    Normal,
    Guest,
    Incognito,
    Kiosk,
}

impl UserMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Guest => "Guest",
            Self::Incognito => "Incognito",
            Self::Kiosk => "Kiosk",
        }
    }
}

#[derive(Debug, Default)]
struct UcState {
    test_name: String,
    out_dir: PathBuf,
    attributes: BTreeMap<AttributeKey, String>,
    tags: BTreeSet<ActionTag>,
}

/// Shared, mutable context read by every user action of a test.
///
/// Clones share state: an attribute set through one handle is seen by all
/// actions recorded afterwards.
#[derive(Clone, Default)]
pub struct UserContext {
    state: Arc<Mutex<UcState>>,
    recorder: Option<ActionRecorder>,
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UserContext")
            .field("test_name", &state.test_name)
            .field("attributes", &state.attributes)
            .field("tags", &state.tags)
            .finish_non_exhaustive()
    }
}

impl UserContext {
    pub fn new(
        test_name: impl Into<String>,
        out_dir: impl Into<PathBuf>,
        recorder: Option<ActionRecorder>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(UcState {
                test_name: test_name.into(),
                out_dir: out_dir.into(),
                ..UcState::default()
            })),
            recorder,
        }
    }

    pub fn set_attribute(&self, key: AttributeKey, value: impl Into<String>) {
        self.state.lock().attributes.insert(key, value.into());
    }

    pub fn remove_attribute(&self, key: AttributeKey) {
        self.state.lock().attributes.remove(&key);
    }

    pub fn attribute(&self, key: AttributeKey) -> Option<String> {
        self.state.lock().attributes.get(&key).cloned()
    }

    pub fn attributes(&self) -> BTreeMap<AttributeKey, String> {
        self.state.lock().attributes.clone()
    }

    pub fn add_tags(&self, tags: &[ActionTag]) {
        self.state.lock().tags.extend(tags.iter().copied());
    }

    pub fn tags(&self) -> BTreeSet<ActionTag> {
        self.state.lock().tags.clone()
    }

    pub fn set_test_name(&self, name: impl Into<String>) {
        self.state.lock().test_name = name.into();
    }

    pub fn test_name(&self) -> String {
        self.state.lock().test_name.clone()
    }

    pub fn set_out_dir(&self, dir: impl AsRef<Path>) {
        self.state.lock().out_dir = dir.as_ref().to_path_buf();
    }

    pub fn out_dir(&self) -> PathBuf {
        self.state.lock().out_dir.clone()
    }

    pub fn recorder(&self) -> Option<&ActionRecorder> {
        self.recorder.as_ref()
    }

    /// Drop per-test attributes and tags, keeping the session-level ones.
    pub fn reset_for_next_test(&self, keep: &[AttributeKey]) {
        let mut state = self.state.lock();
        state.attributes.retain(|k, _| keep.contains(k));
        state.tags.clear();
    }
}

/// Called with the outcome once the action and its validation finished.
pub type ActionCallback = Arc<dyn Fn(&Context, Option<&IthError>) + Send + Sync>;

/// Per-action attributes, tags and hooks.
#[derive(Clone, Default)]
pub struct UserActionCfg {
    pub attributes: BTreeMap<AttributeKey, String>,
    pub tags: Vec<ActionTag>,
    /// Runs after a successful action; its failure fails the user action.
    pub validate_result: Option<Action>,
    pub callback: Option<ActionCallback>,
}

impl fmt::Debug for UserActionCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserActionCfg")
            .field("attributes", &self.attributes)
            .field("tags", &self.tags)
            .field("validate_result", &self.validate_result.is_some())
            .finish_non_exhaustive()
    }
}

impl UserActionCfg {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attribute(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: ActionTag) -> Self {
        self.tags.push(tag);
        self
    }

    #[must_use]
    pub fn validate_result(mut self, validate: Action) -> Self {
        self.validate_result = Some(validate);
        self
    }

    #[must_use]
    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, Option<&IthError>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }
}

/// Wrap `action` so that each run records exactly one event.
///
/// The event carries the context's attributes overlaid with `cfg`'s (the
/// action's own values win) and the union of both tag sets.
pub fn user_action(
    name: impl Into<String>,
    action: Action,
    uc: &UserContext,
    cfg: UserActionCfg,
) -> Action {
    let name = name.into();
    let uc = uc.clone();
    Action::new(move |ctx| {
        let started = Instant::now();
        let result = action.run(ctx).and_then(|()| match &cfg.validate_result {
            Some(validate) => validate.run(ctx),
            None => Ok(()),
        });
        let result = result.map_err(|err| IthError::action(name.clone(), err));

        let mut attributes = uc.attributes();
        attributes.extend(cfg.attributes.iter().map(|(k, v)| (*k, v.clone())));
        let mut tags = uc.tags();
        tags.extend(cfg.tags.iter().copied());

        let mut event = ActionEvent::new(name.clone());
        event.test_name = uc.test_name();
        event.attributes = attributes
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect();
        event.tags = tags.into_iter().map(|t| t.as_str().to_string()).collect();
        event.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = &result {
            event = event.failed(err);
        }
        match uc.recorder() {
            Some(recorder) => recorder.record(event),
            None => tracing::debug!(action = %name, ok = event.ok, "[ITH-ACTION] no recorder attached"),
        }

        if let Some(callback) = &cfg.callback {
            callback(ctx, result.as_ref().err());
        }
        result
    })
}

/// A [`UserContext`] for inputs tests, seeded from the live session:
/// device mode, keyboard type, user mode and the active input method.
pub fn new_inputs_user_context(
    ctx: &Context,
    conn: &dyn AutomationConn,
    test_name: &str,
    out_dir: &Path,
    user_mode: UserMode,
    recorder: Option<ActionRecorder>,
) -> Result<UserContext> {
    let uc = UserContext::new(test_name, out_dir, recorder);
    let tablet: bool = conn.fetch(ctx, Request::IsTabletMode)?;
    let a11y_vk: bool = conn
        .fetch::<Option<bool>>(
            ctx,
            Request::GetPref {
                name: A11Y_VK_PREF.to_string(),
            },
        )?
        .unwrap_or(false);
    uc.set_attribute(
        AttributeKey::DeviceMode,
        if tablet {
            DEVICE_MODE_TABLET
        } else {
            DEVICE_MODE_CLAMSHELL
        },
    );
    uc.set_attribute(
        AttributeKey::KeyboardType,
        if tablet || a11y_vk {
            KEYBOARD_TYPE_VIRTUAL
        } else {
            KEYBOARD_TYPE_PHYSICAL
        },
    );
    uc.set_attribute(AttributeKey::UserMode, user_mode.as_str());
    uc.set_attribute(
        AttributeKey::IncognitoMode,
        (user_mode == UserMode::Incognito).to_string(),
    );
    let id = ime::active_input_method_id(ctx, conn)?;
    let im_name = ime::InputMethod::find_by_id(&id).map_or(id, |im| im.name().to_string());
    uc.set_attribute(AttributeKey::InputMethod, im_name);
    Ok(uc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fails() -> Action {
        Action::new(|_| Err(IthError::automation("boom")))
    }

    #[test]
    fn one_event_per_run_with_cfg_winning() {
        let recorder = ActionRecorder::in_memory();
        let uc = UserContext::new("inputs.Demo", "/tmp/out", Some(recorder.clone()));
        uc.set_attribute(AttributeKey::InputField, "textInputField");
        uc.set_attribute(AttributeKey::DeviceMode, DEVICE_MODE_CLAMSHELL);
        uc.add_tags(&[ActionTag::EssentialInputs]);

        let cfg = UserActionCfg::new()
            .attribute(AttributeKey::InputField, "textAreaInputField")
            .attribute(AttributeKey::Feature, FEATURE_PK_TYPING)
            .tag(ActionTag::PKTyping);
        let act = user_action("PK typing input", Action::noop(), &uc, cfg);
        act.run(&Context::background()).unwrap();
        act.run(&Context::background()).unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        let ev = &events[0];
        assert!(ev.ok);
        assert_eq!(ev.test_name, "inputs.Demo");
        assert_eq!(ev.attributes["InputField"], "textAreaInputField");
        assert_eq!(ev.attributes["DeviceMode"], DEVICE_MODE_CLAMSHELL);
        assert_eq!(ev.attributes["Feature"], FEATURE_PK_TYPING);
        assert!(ev.tags.contains("EssentialInputs") && ev.tags.contains("PKTyping"));
    }

    #[test]
    fn failure_is_recorded_and_callback_sees_it() {
        let recorder = ActionRecorder::in_memory();
        let uc = UserContext::new("t", "/tmp", Some(recorder.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let cfg = UserActionCfg::new().callback(move |_, err| {
            assert!(err.is_some());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let err = user_action("VK typing input", fails(), &uc, cfg)
            .run(&Context::background())
            .unwrap_err();
        assert!(err.to_string().contains("failed to VK typing input"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].ok);
        assert_eq!(events[0].error_code.as_deref(), Some("ITH-3001"));
    }

    #[test]
    fn validation_runs_only_after_success() {
        let recorder = ActionRecorder::in_memory();
        let uc = UserContext::new("t", "/tmp", Some(recorder.clone()));
        let validated = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&validated);
        let validate = Action::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Err(IthError::Assertion {
                what: "field text".into(),
                expected: "a".into(),
                observed: "b".into(),
            })
        });
        let cfg = UserActionCfg::new().validate_result(validate);
        assert!(user_action("x", Action::noop(), &uc, cfg.clone())
            .run(&Context::background())
            .is_err());
        assert!(user_action("y", fails(), &uc, cfg)
            .run(&Context::background())
            .is_err());
        assert_eq!(validated.load(Ordering::SeqCst), 1);
        assert!(recorder.events().iter().all(|e| !e.ok));
    }

    #[test]
    fn attribute_changes_are_seen_by_later_actions() {
        let recorder = ActionRecorder::in_memory();
        let uc = UserContext::new("t", "/tmp", Some(recorder.clone()));
        let act = user_action("a", Action::noop(), &uc, UserActionCfg::new());
        act.run(&Context::background()).unwrap();
        uc.clone().set_attribute(AttributeKey::InputMethod, "Swedish");
        act.run(&Context::background()).unwrap();
        let events = recorder.events();
        assert!(!events[0].attributes.contains_key("InputMethod"));
        assert_eq!(events[1].attributes["InputMethod"], "Swedish");
    }
}
