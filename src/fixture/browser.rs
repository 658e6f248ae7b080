//! Browser launch options and the browser/launcher collaborators.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::surface::{AutomationConn, ConnExt, Request};

/// Flag forcing tablet mode on.
pub const TABLET_MODE_FLAG: &str = "--force-tablet-mode=touch_view";
/// Flag forcing clamshell mode.
pub const CLAMSHELL_MODE_FLAG: &str = "--force-tablet-mode=clamshell";
pub const VK_ENABLED_FLAG: &str = "--enable-virtual-keyboard";

/// Which browser binary drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    Ash,
    Lacros,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

/// Launch options understood by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BrowserOption {
    ExtraArgs(Vec<String>),
    VkEnabled,
    NoLogin,
    KeepState,
    GuestLogin,
    GaiaLogin(Credentials),
    GaiaLoginPool(String),
    FakeLogin(Credentials),
    Region(String),
    ArcEnabled,
    ArcDisabled,
    DmsPolicy(String),
    LoadSigninProfileExtension(String),
    EnableFeatures(Vec<String>),
    ExtraChromeOptions(Vec<BrowserOption>),
}

impl BrowserOption {
    pub fn extra_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ExtraArgs(args.into_iter().map(Into::into).collect())
    }

    pub fn enable_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::EnableFeatures(features.into_iter().map(Into::into).collect())
    }
}

/// Options with every `ExtraChromeOptions` expanded in place.
pub fn flatten(opts: &[BrowserOption]) -> Vec<BrowserOption> {
    let mut out = Vec::with_capacity(opts.len());
    for opt in opts {
        match opt {
            BrowserOption::ExtraChromeOptions(nested) => out.extend(flatten(nested)),
            other => out.push(other.clone()),
        }
    }
    out
}

/// Command line the options translate to. Features are merged into one
/// `--enable-features` switch.
pub fn command_line(opts: &[BrowserOption]) -> Vec<String> {
    let mut args = Vec::new();
    let mut features: Vec<String> = Vec::new();
    for opt in flatten(opts) {
        match opt {
            BrowserOption::ExtraArgs(extra) => args.extend(extra),
            BrowserOption::VkEnabled => args.push(VK_ENABLED_FLAG.to_string()),
            BrowserOption::EnableFeatures(f) => {
                for feature in f {
                    if !features.contains(&feature) {
                        features.push(feature);
                    }
                }
            }
            BrowserOption::ArcEnabled => args.push("--arc-availability=officially-supported".to_string()),
            BrowserOption::ArcDisabled => args.push("--arc-availability=none".to_string()),
            BrowserOption::Region(code) => args.push(format!("--region={code}")),
            BrowserOption::DmsPolicy(url) => args.push(format!("--device-management-url={url}")),
            _ => {}
        }
    }
    if !features.is_empty() {
        args.push(format!("--enable-features={}", features.join(",")));
    }
    args
}

/// The login flow the options select.
pub fn login_mode(opts: &[BrowserOption]) -> &'static str {
    let flat = flatten(opts);
    if flat.contains(&BrowserOption::NoLogin) {
        "none"
    } else if flat.contains(&BrowserOption::GuestLogin) {
        "guest"
    } else if flat
        .iter()
        .any(|o| matches!(o, BrowserOption::GaiaLogin(_) | BrowserOption::GaiaLoginPool(_)))
    {
        "gaia"
    } else {
        "fake"
    }
}

/// A running browser session.
pub trait Browser: Send + Sync {
    fn browser_type(&self) -> BrowserType;

    /// Test-API connection to the automation surface.
    fn test_conn(&self) -> Arc<dyn AutomationConn>;

    /// Succeeds while the browser still answers requests.
    fn responded(&self, ctx: &Context) -> Result<()> {
        self.test_conn().exec(ctx, Request::Ping)
    }

    /// Close extra tabs and clear in-memory UI state.
    fn reset_state(&self, ctx: &Context) -> Result<()> {
        self.test_conn().exec(ctx, Request::ResetState)
    }

    /// Open `url` in a new tab; returns the tab id.
    fn open_page(&self, ctx: &Context, url: &str, incognito: bool) -> Result<u64> {
        self.test_conn().fetch(
            ctx,
            Request::NewTab {
                url: url.to_string(),
                incognito,
            },
        )
    }

    fn close_page(&self, ctx: &Context, tab_id: u64) -> Result<()> {
        self.test_conn().exec(ctx, Request::CloseTab { tab_id })
    }

    fn close(&self, ctx: &Context) -> Result<()>;
}

/// Starts browser sessions.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        ctx: &Context,
        browser_type: BrowserType,
        opts: &[BrowserOption],
    ) -> Result<Arc<dyn Browser>>;
}

// ──────────────────── session lock ────────────────────

static SESSION_HOLDER: Mutex<Option<String>> = Mutex::new(None);

/// Keeps the shared browser session from being closed by anyone else.
/// Released on drop.
#[derive(Debug)]
#[must_use = "the session is unlocked as soon as the guard is dropped"]
pub struct SessionLock {
    holder: String,
}

impl SessionLock {
    /// Lock the session for `holder`. Fails while another holder has it.
    pub fn acquire(holder: impl Into<String>) -> Result<Self> {
        let holder = holder.into();
        let mut current = SESSION_HOLDER.lock();
        if let Some(other) = current.as_ref() {
            return Err(IthError::Runtime {
                details: format!("browser session already locked by {other}"),
            });
        }
        *current = Some(holder.clone());
        tracing::debug!(holder = %holder, "[ITH-SESSION] locked");
        Ok(Self { holder })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Whether any holder currently has the session.
    pub fn is_locked() -> bool {
        SESSION_HOLDER.lock().is_some()
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let mut current = SESSION_HOLDER.lock();
        if current.as_deref() == Some(self.holder.as_str()) {
            *current = None;
            tracing::debug!(holder = %self.holder, "[ITH-SESSION] unlocked");
        }
    }
}
