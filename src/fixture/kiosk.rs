//! Kiosk mode: device-local accounts served by a fake policy server.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::context::Context;
use crate::core::errors::{IthError, Result, ResultExt};
use crate::fixture::browser::{Browser, BrowserOption, BrowserType, Launcher};

/// Fake device-management server the browser fetches policies from.
pub trait DmsEmulator: Send {
    fn start(&mut self, ctx: &Context, tmpdir: &Path) -> Result<()>;
    fn write_policy_blob(&mut self, blob: &PolicyBlob) -> Result<()>;
    /// URL passed to the browser as its device-management server.
    fn url(&self) -> Result<String>;
    fn stop(&mut self, ctx: &Context) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    KioskApp,
    KioskWebApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocalAccount {
    pub account_id: String,
    pub account_type: AccountType,
    /// App id for [`AccountType::KioskApp`], start URL for web kiosks.
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
}

impl DeviceLocalAccount {
    pub fn web_kiosk(account_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            account_type: AccountType::KioskWebApp,
            app: url.into(),
            title: String::new(),
        }
    }
}

/// Policies served to the browser, as the emulator stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBlob {
    pub device_local_accounts: Vec<DeviceLocalAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_login_id: Option<String>,
    #[serde(default)]
    pub extra_policies: serde_json::Map<String, serde_json::Value>,
}

impl PolicyBlob {
    /// The account that starts automatically, if any.
    pub fn auto_launch_account(&self) -> Option<&DeviceLocalAccount> {
        let id = self.auto_login_id.as_deref()?;
        self.device_local_accounts.iter().find(|a| a.account_id == id)
    }
}

/// Account id of the web kiosk the harness configures by default.
pub const WEB_KIOSK_ACCOUNT_ID: &str = "arbitrary_id_web_kiosk_1@managedchrome.com";

#[derive(Debug, Clone, Default)]
pub struct KioskConfig {
    accounts: Vec<DeviceLocalAccount>,
    auto_launch: Option<String>,
    extra_opts: Vec<BrowserOption>,
}

impl KioskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the device-local accounts.
    #[must_use]
    pub fn custom_local_accounts(mut self, accounts: Vec<DeviceLocalAccount>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Start `account_id` right after boot instead of showing the sign-in screen.
    #[must_use]
    pub fn auto_launch(mut self, account_id: impl Into<String>) -> Self {
        self.auto_launch = Some(account_id.into());
        self
    }

    #[must_use]
    pub fn extra_chrome_options(mut self, opts: Vec<BrowserOption>) -> Self {
        self.extra_opts.extend(opts);
        self
    }

    fn blob(&self) -> Result<PolicyBlob> {
        if self.accounts.is_empty() {
            return Err(IthError::InvalidConfig {
                details: "kiosk mode needs at least one device-local account".to_string(),
            });
        }
        if let Some(id) = &self.auto_launch
            && !self.accounts.iter().any(|a| &a.account_id == id)
        {
            return Err(IthError::InvalidConfig {
                details: format!("auto-launch account {id} is not a device-local account"),
            });
        }
        Ok(PolicyBlob {
            device_local_accounts: self.accounts.clone(),
            auto_login_id: self.auto_launch.clone(),
            extra_policies: serde_json::Map::new(),
        })
    }
}

/// A running kiosk session. [`KioskHandle::close`] clears the auto-launch
/// policy so later sessions boot normally.
pub struct KioskHandle {
    dms: Box<dyn DmsEmulator>,
    browser: Arc<dyn Browser>,
    accounts: Vec<DeviceLocalAccount>,
    autostart: bool,
}

impl std::fmt::Debug for KioskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KioskHandle")
            .field("accounts", &self.accounts)
            .field("autostart", &self.autostart)
            .finish_non_exhaustive()
    }
}

impl KioskHandle {
    pub fn browser(&self) -> &Arc<dyn Browser> {
        &self.browser
    }

    pub fn close(mut self, ctx: &Context) -> Result<()> {
        let cleared = if self.autostart {
            self.dms.write_policy_blob(&PolicyBlob {
                device_local_accounts: self.accounts.clone(),
                ..PolicyBlob::default()
            })
        } else {
            Ok(())
        };
        if let Err(err) = &cleared {
            tracing::warn!(error = %err, "[ITH-KIOSK] could not clear auto-launch policy");
        }
        let closed = self.browser.close(ctx);
        let stopped = self.dms.stop(ctx);
        cleared.wrap("clear kiosk policies")?;
        closed.wrap("close kiosk browser")?;
        stopped.wrap("stop policy server")
    }
}

/// Serve the kiosk policies and start the browser in kiosk mode.
pub fn start_kiosk(
    ctx: &Context,
    launcher: &dyn Launcher,
    mut dms: Box<dyn DmsEmulator>,
    tmpdir: &Path,
    cfg: &KioskConfig,
) -> Result<KioskHandle> {
    let blob = cfg.blob()?;
    dms.start(ctx, tmpdir).wrap("start policy server")?;
    let launched = dms
        .write_policy_blob(&blob)
        .and_then(|()| dms.url())
        .and_then(|url| {
            let mut opts = vec![BrowserOption::DmsPolicy(url), BrowserOption::KeepState];
            if blob.auto_login_id.is_some() {
                opts.push(BrowserOption::NoLogin);
            }
            opts.extend(cfg.extra_opts.iter().cloned());
            tracing::info!(
                autostart = blob.auto_login_id.is_some(),
                accounts = blob.device_local_accounts.len(),
                "[ITH-KIOSK] starting browser in kiosk mode"
            );
            launcher.launch(ctx, BrowserType::Ash, &opts)
        });
    match launched {
        Ok(browser) => Ok(KioskHandle {
            dms,
            browser,
            accounts: blob.device_local_accounts,
            autostart: blob.auto_login_id.is_some(),
        }),
        Err(err) => {
            if let Err(stop_err) = dms.stop(ctx) {
                tracing::warn!(error = %stop_err, "[ITH-KIOSK] policy server did not stop");
            }
            Err(IthError::action("start kiosk mode", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_launch_must_name_a_local_account() {
        let cfg = KioskConfig::new()
            .custom_local_accounts(vec![DeviceLocalAccount::web_kiosk(
                WEB_KIOSK_ACCOUNT_ID,
                "http://127.0.0.1:1/e14s-test",
            )])
            .auto_launch("someone-else@managedchrome.com");
        assert_eq!(cfg.blob().unwrap_err().code(), "ITH-1001");
        assert_eq!(KioskConfig::new().blob().unwrap_err().code(), "ITH-1001");
    }

    #[test]
    fn blob_resolves_auto_launch_account() {
        let cfg = KioskConfig::new()
            .custom_local_accounts(vec![DeviceLocalAccount::web_kiosk(
                WEB_KIOSK_ACCOUNT_ID,
                "http://127.0.0.1:1/e14s-test",
            )])
            .auto_launch(WEB_KIOSK_ACCOUNT_ID);
        let blob = cfg.blob().unwrap();
        let json = serde_json::to_string(&blob).unwrap();
        let back: PolicyBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.auto_launch_account().map(|a| a.app.as_str()),
            Some("http://127.0.0.1:1/e14s-test")
        );
    }
}
