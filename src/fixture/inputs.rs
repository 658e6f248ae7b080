//! The standard inputs fixtures: a logged-in browser session in a chosen
//! device mode, with or without the virtual keyboard.

use std::sync::Arc;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result, ResultExt};
use crate::fixture::browser::{
    Browser, BrowserOption, BrowserType, CLAMSHELL_MODE_FLAG, SessionLock, TABLET_MODE_FLAG,
};
use crate::fixture::kiosk::{self, DeviceLocalAccount, KioskConfig, KioskHandle};
use crate::fixture::{
    FixtState, FixtTestState, FixtValue, Fixture, FixtureData, FixtureSpec, FixtureTimeouts,
};
use crate::ime;
use crate::testserver::TestPageServer;
use crate::uiauto::vkb::VirtualKeyboardContext;
use crate::useractions::{self, AttributeKey, UserMode};

pub const ANY_VK: &str = "anyVK";
pub const ANY_VK_IN_GUEST: &str = "anyVKInGuest";
pub const CLAMSHELL_VK: &str = "clamshellVK";
pub const CLAMSHELL_VK_WITH_ASSIST_AUTOCORRECT: &str = "clamshellVKWithAssistAutocorrect";
pub const CLAMSHELL_NON_VK: &str = "clamshellNonVK";
pub const CLAMSHELL_NON_VK_IN_GUEST: &str = "clamshellNonVKInGuest";
pub const CLAMSHELL_NON_VK_WITH_MULTIWORD_SUGGEST: &str = "clamshellNonVKWithMultiwordSuggest";
pub const CLAMSHELL_NON_VK_WITH_GRAMMAR_CHECK: &str = "clamshellNonVKWithGrammarCheck";
pub const CLAMSHELL_NON_VK_WITH_DIACRITICS_ON_PK_LONGPRESS: &str =
    "clamshellNonVKWithDiacriticsOnPKLongpress";
pub const TABLET_VK: &str = "tabletVK";
pub const TABLET_VK_IN_GUEST: &str = "tabletVKInGuest";
pub const TABLET_NON_VK: &str = "tabletNonVK";
pub const TABLET_NON_VK_IN_GUEST: &str = "tabletNonVKInGuest";
pub const TABLET_VK_WITH_ASSIST_AUTOCORRECT: &str = "tabletVKWithAssistAutocorrect";
pub const TABLET_VK_WITH_MULTIPASTE_SUGGESTION: &str = "tabletVKWithMultipasteSuggestion";
pub const KIOSK_VK: &str = "kioskVK";
pub const KIOSK_NON_VK: &str = "kioskNonVK";

const CONTACTS: [&str; 3] = [
    "alvinjia@google.com",
    "shengjun@chromium.org",
    "essential-inputs-team@google.com",
];

/// Attributes that describe the session rather than one test.
const SESSION_ATTRIBUTES: [AttributeKey; 5] = [
    AttributeKey::InputMethod,
    AttributeKey::DeviceMode,
    AttributeKey::KeyboardType,
    AttributeKey::UserMode,
    AttributeKey::IncognitoMode,
];

/// UI mode the device is forced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    NotForced,
    Tablet,
    Clamshell,
}

impl DeviceMode {
    fn flag(self) -> Option<&'static str> {
        match self {
            Self::NotForced => None,
            Self::Tablet => Some(TABLET_MODE_FLAG),
            Self::Clamshell => Some(CLAMSHELL_MODE_FLAG),
        }
    }
}

/// Lacros name of a fixture: `tabletVK` becomes `lacrosTabletVK`.
pub fn lacros_name(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        format!("lacros{}{}", first.to_uppercase(), chars.as_str())
    })
}

/// Parameters of one inputs fixture.
#[derive(Debug, Clone)]
pub struct InputsFixtureParams {
    pub dm: DeviceMode,
    pub vk_enabled: bool,
    pub browser_type: BrowserType,
    pub user_mode: UserMode,
    pub opts: Vec<BrowserOption>,
}

impl InputsFixtureParams {
    pub fn new(dm: DeviceMode, vk_enabled: bool) -> Self {
        Self {
            dm,
            vk_enabled,
            browser_type: BrowserType::Ash,
            user_mode: UserMode::Normal,
            opts: Vec::new(),
        }
    }

    #[must_use]
    pub fn guest(mut self) -> Self {
        self.user_mode = UserMode::Guest;
        self.opts.push(BrowserOption::GuestLogin);
        self
    }

    #[must_use]
    pub fn kiosk(mut self) -> Self {
        self.user_mode = UserMode::Kiosk;
        self
    }

    #[must_use]
    pub fn lacros(mut self) -> Self {
        self.browser_type = BrowserType::Lacros;
        self
    }

    #[must_use]
    pub fn feature(mut self, feature: &str) -> Self {
        self.opts.push(BrowserOption::enable_features([feature]));
        self
    }

    /// Options for the browser, parent options first.
    pub fn browser_options(&self, parent: &[BrowserOption]) -> Vec<BrowserOption> {
        let mut opts: Vec<BrowserOption> = parent.to_vec();
        opts.extend(self.opts.iter().cloned());
        if let Some(flag) = self.dm.flag() {
            opts.push(BrowserOption::extra_args([flag]));
        }
        if self.browser_type == BrowserType::Lacros {
            opts.push(BrowserOption::enable_features(["LacrosSupport", "LacrosPrimary"]));
        }
        // The tablet VK is forced on even when the device is not in tablet
        // mode; forced clamshell uses the accessibility keyboard instead.
        if self.vk_enabled && self.dm != DeviceMode::Clamshell {
            opts.push(BrowserOption::VkEnabled);
        }
        opts
    }
}

enum Session {
    Browser,
    Kiosk {
        handle: KioskHandle,
        _page: TestPageServer,
    },
}

struct Live {
    data: Arc<FixtureData>,
    session: Session,
    lock: SessionLock,
}

/// A browser session shared by every test using the fixture.
pub struct InputsFixture {
    params: InputsFixtureParams,
    live: Option<Live>,
}

impl InputsFixture {
    pub fn new(params: InputsFixtureParams) -> Self {
        Self { params, live: None }
    }

    fn live(&self) -> Result<&Live> {
        self.live.as_ref().ok_or_else(|| IthError::Runtime {
            details: "inputs fixture is not set up".to_string(),
        })
    }

    fn start_kiosk(
        &self,
        ctx: &Context,
        s: &FixtState<'_>,
        opts: Vec<BrowserOption>,
    ) -> Result<(Session, Arc<dyn Browser>)> {
        let dms = s.env.dms.as_ref().ok_or_else(|| IthError::Precondition {
            details: "kiosk fixtures need a policy server".to_string(),
        })?;
        let page = TestPageServer::start()?;
        let cfg = KioskConfig::new()
            .custom_local_accounts(vec![DeviceLocalAccount::web_kiosk(
                kiosk::WEB_KIOSK_ACCOUNT_ID,
                page.url(),
            )])
            .auto_launch(kiosk::WEB_KIOSK_ACCOUNT_ID)
            .extra_chrome_options(opts);
        let handle = kiosk::start_kiosk(ctx, s.env.launcher.as_ref(), dms(), s.out_dir, &cfg)?;
        let browser = Arc::clone(handle.browser());
        Ok((Session::Kiosk { handle, _page: page }, browser))
    }
}

impl Fixture for InputsFixture {
    fn set_up(&mut self, ctx: &Context, s: &FixtState<'_>) -> Result<FixtValue> {
        let parent = s
            .parent_value::<Vec<BrowserOption>>()
            .map_or(&[][..], Vec::as_slice);
        let opts = self.params.browser_options(parent);
        tracing::info!(
            fixture = s.name,
            browser = ?self.params.browser_type,
            user_mode = self.params.user_mode.as_str(),
            "[ITH-FIXTURE] starting browser"
        );

        let (session, browser) = if self.params.user_mode == UserMode::Kiosk {
            self.start_kiosk(ctx, s, opts)?
        } else {
            let browser = s
                .env
                .launcher
                .launch(ctx, self.params.browser_type, &opts)
                .wrap("start browser")?;
            (Session::Browser, browser)
        };
        let conn = browser.test_conn();

        let prepared = (|| {
            if self.params.vk_enabled && self.params.dm == DeviceMode::Clamshell {
                VirtualKeyboardContext::new(Arc::clone(&conn))
                    .enable_a11y_virtual_keyboard(true)
                    .run(ctx)
                    .wrap("enable a11y virtual keyboard")?;
            }
            let uc = useractions::new_inputs_user_context(
                ctx,
                conn.as_ref(),
                "",
                s.out_dir,
                self.params.user_mode,
                s.env.recorder.clone(),
            )
            .wrap("create new inputs user context")?;
            let lock = SessionLock::acquire(s.name)?;
            Ok::<_, IthError>((uc, lock))
        })();
        let (user_context, lock) = match prepared {
            Ok(v) => v,
            Err(err) => {
                let closed = match session {
                    Session::Browser => browser.close(ctx),
                    Session::Kiosk { handle, .. } => handle.close(ctx),
                };
                if let Err(close_err) = closed {
                    tracing::warn!(error = %close_err, "[ITH-FIXTURE] failed to close browser after setup error");
                }
                return Err(err);
            }
        };

        let data = Arc::new(FixtureData {
            browser,
            conn,
            user_context,
            browser_type: self.params.browser_type,
        });
        self.live = Some(Live {
            data: Arc::clone(&data),
            session,
            lock,
        });
        Ok(data)
    }

    fn reset(&mut self, ctx: &Context) -> Result<()> {
        let live = self.live()?;
        live.data
            .browser
            .responded(ctx)
            .wrap("check existing browser connection")?;
        ime::reset_ime_status(ctx, &live.data.conn).wrap("reset ime")?;
        live.data
            .browser
            .reset_state(ctx)
            .wrap("reset existing browser session")?;
        live.data.user_context.reset_for_next_test(&SESSION_ATTRIBUTES);
        Ok(())
    }

    fn pre_test(&mut self, _ctx: &Context, s: &FixtTestState) -> Result<()> {
        let live = self.live()?;
        live.data.user_context.set_test_name(s.test_name.as_str());
        live.data.user_context.set_out_dir(&s.out_dir);
        Ok(())
    }

    fn post_test(&mut self, ctx: &Context, _s: &FixtTestState) -> Result<()> {
        if !self.params.vk_enabled {
            return Ok(());
        }
        let live = self.live()?;
        if let Err(err) = VirtualKeyboardContext::new(Arc::clone(&live.data.conn))
            .hide()
            .run(ctx)
        {
            tracing::warn!(error = %err, "[ITH-FIXTURE] failed to hide virtual keyboard");
        }
        Ok(())
    }

    fn tear_down(&mut self, ctx: &Context) -> Result<()> {
        let Some(live) = self.live.take() else {
            return Ok(());
        };
        let Live {
            data,
            session,
            lock,
        } = live;
        drop(lock);
        let closed = match session {
            Session::Browser => data.browser.close(ctx),
            Session::Kiosk { handle, .. } => handle.close(ctx),
        };
        if let Err(err) = &closed {
            tracing::warn!(error = %err, "[ITH-FIXTURE] failed to close browser");
        }
        closed
    }
}

fn spec(name: &str, desc: &str, params: InputsFixtureParams, timeouts: FixtureTimeouts) -> FixtureSpec {
    FixtureSpec::new(name, move || Box::new(InputsFixture::new(params.clone())))
        .desc(desc)
        .contacts(&CONTACTS)
        .timeouts(timeouts)
}

/// Every standard inputs fixture, including the lacros twins.
pub fn standard_fixtures(timeouts: FixtureTimeouts) -> Vec<FixtureSpec> {
    use DeviceMode::{Clamshell, NotForced, Tablet};
    let p = InputsFixtureParams::new;
    let ash = [
        (ANY_VK, "Any mode with VK enabled", p(NotForced, true)),
        (ANY_VK_IN_GUEST, "Any mode in guest login with VK enabled", p(NotForced, true).guest()),
        (CLAMSHELL_VK, "Clamshell mode with A11y VK enabled", p(Clamshell, true)),
        (
            CLAMSHELL_VK_WITH_ASSIST_AUTOCORRECT,
            "Clamshell mode with A11y VK enabled and assist autocorrect",
            p(Clamshell, true).feature("AssistAutoCorrect"),
        ),
        (CLAMSHELL_NON_VK, "Clamshell mode with VK disabled", p(Clamshell, false)),
        (
            CLAMSHELL_NON_VK_IN_GUEST,
            "Clamshell mode in guest login with VK disabled",
            p(Clamshell, false).guest(),
        ),
        (
            CLAMSHELL_NON_VK_WITH_MULTIWORD_SUGGEST,
            "Clamshell mode with VK disabled and multiword suggest",
            p(Clamshell, false).feature("AssistMultiWord"),
        ),
        (
            CLAMSHELL_NON_VK_WITH_GRAMMAR_CHECK,
            "Clamshell mode with VK disabled and grammar check",
            p(Clamshell, false).feature("OnDeviceGrammarCheck"),
        ),
        (
            CLAMSHELL_NON_VK_WITH_DIACRITICS_ON_PK_LONGPRESS,
            "Clamshell mode with VK disabled and diacritics on physical keyboard longpress",
            p(Clamshell, false).feature("DiacriticsOnPhysicalKeyboardLongpress"),
        ),
        (TABLET_VK, "Tablet mode with VK enabled", p(Tablet, true)),
        (TABLET_VK_IN_GUEST, "Tablet mode in guest login with VK enabled", p(Tablet, true).guest()),
        (TABLET_NON_VK, "Tablet mode with VK disabled", p(Tablet, false)),
        (
            TABLET_NON_VK_IN_GUEST,
            "Tablet mode in guest login with VK disabled",
            p(Tablet, false).guest(),
        ),
        (
            TABLET_VK_WITH_ASSIST_AUTOCORRECT,
            "Tablet mode with VK enabled and assist autocorrect",
            p(Tablet, true).feature("AssistAutoCorrect"),
        ),
        (
            TABLET_VK_WITH_MULTIPASTE_SUGGESTION,
            "Tablet mode with VK enabled and multipaste suggestion",
            p(Tablet, true).feature("VirtualKeyboardMultipasteSuggestion"),
        ),
    ];
    let mut specs = Vec::with_capacity(ash.len() * 2 + 2);
    for (name, desc, params) in &ash {
        specs.push(spec(name, desc, params.clone(), timeouts));
    }
    for (name, desc, params) in ash {
        specs.push(spec(
            &lacros_name(name),
            &format!("Lacros variant: {}{}", desc[..1].to_lowercase(), &desc[1..]),
            params.lacros(),
            timeouts,
        ));
    }
    specs.push(spec(KIOSK_VK, "Kiosk mode with VK enabled", p(NotForced, true).kiosk(), timeouts));
    specs.push(spec(
        KIOSK_NON_VK,
        "Kiosk mode with VK disabled",
        p(Clamshell, false).kiosk(),
        timeouts,
    ));
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::browser::command_line;

    #[test]
    fn lacros_twin_names() {
        assert_eq!(lacros_name(TABLET_VK), "lacrosTabletVK");
        assert_eq!(lacros_name(ANY_VK_IN_GUEST), "lacrosAnyVKInGuest");
    }

    #[test]
    fn every_non_kiosk_fixture_has_a_lacros_twin() {
        let specs = standard_fixtures(FixtureTimeouts::default());
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        for name in &names {
            if name.starts_with("kiosk") || name.starts_with("lacros") {
                continue;
            }
            assert!(names.contains(&lacros_name(name).as_str()), "no twin for {name}");
        }
        assert!(names.contains(&KIOSK_VK) && names.contains(&KIOSK_NON_VK));
        assert!(!names.iter().any(|n| n.starts_with("lacrosKiosk")));
    }

    #[test]
    fn clamshell_vk_does_not_force_tablet_keyboard() {
        let cl = command_line(&InputsFixtureParams::new(DeviceMode::Clamshell, true).browser_options(&[]));
        assert!(cl.contains(&CLAMSHELL_MODE_FLAG.to_string()));
        assert!(!cl.iter().any(|a| a == crate::fixture::browser::VK_ENABLED_FLAG));

        let any = command_line(&InputsFixtureParams::new(DeviceMode::NotForced, true).browser_options(&[]));
        assert!(any.iter().any(|a| a == crate::fixture::browser::VK_ENABLED_FLAG));
        assert!(!any.iter().any(|a| a.starts_with("--force-tablet-mode")));
    }

    #[test]
    fn parent_options_come_first() {
        let parent = vec![BrowserOption::extra_args(["--parent-flag"])];
        let opts = InputsFixtureParams::new(DeviceMode::Tablet, false)
            .lacros()
            .browser_options(&parent);
        assert_eq!(opts[0], parent[0]);
        let cl = command_line(&opts);
        assert!(cl.iter().any(|a| a == TABLET_MODE_FLAG));
        assert!(cl.iter().any(|a| a.contains("LacrosSupport")));
    }
}
