//! Fixtures: named, shared setup reused across tests.
//!
//! A [`FixtureSpec`] declares a fixture; a [`FixtureInstance`] is one live
//! copy of it and enforces the lifecycle order
//! `Uninitialized → Ready → (InTest → PostTest → Ready)* → TornDown`.

pub mod browser;
pub mod inputs;
pub mod kiosk;

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::HarnessConfig;
use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::fixture::browser::{Browser, BrowserType, Launcher};
use crate::fixture::kiosk::DmsEmulator;
use crate::input::devices::DeviceHub;
use crate::surface::AutomationConn;
use crate::telemetry::ActionRecorder;
use crate::useractions::UserContext;

/// Opaque value a fixture's SetUp hands to tests and child fixtures.
pub type FixtValue = Arc<dyn Any + Send + Sync>;

/// Builds a fresh fixture implementation for each instance.
pub type FixtureFactory = Arc<dyn Fn() -> Box<dyn Fixture> + Send + Sync>;

/// Builds a fresh policy-server emulator.
pub type DmsFactory = Arc<dyn Fn() -> Box<dyn DmsEmulator> + Send + Sync>;

/// What the standard inputs fixtures hand to tests.
#[derive(Clone)]
pub struct FixtureData {
    pub browser: Arc<dyn Browser>,
    pub conn: Arc<dyn AutomationConn>,
    pub user_context: UserContext,
    pub browser_type: BrowserType,
}

impl fmt::Debug for FixtureData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureData")
            .field("browser_type", &self.browser_type)
            .field("user_context", &self.user_context)
            .finish_non_exhaustive()
    }
}

/// Budget of each lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureTimeouts {
    pub set_up: Duration,
    pub reset: Duration,
    pub pre_test: Duration,
    pub post_test: Duration,
    pub tear_down: Duration,
}

impl Default for FixtureTimeouts {
    fn default() -> Self {
        crate::core::config::FixtureConfig::default().timeouts()
    }
}

/// Collaborators shared by every fixture of a run.
#[derive(Clone)]
pub struct Environment {
    pub config: Arc<HarnessConfig>,
    pub launcher: Arc<dyn Launcher>,
    pub devices: Option<Arc<DeviceHub>>,
    pub dms: Option<DmsFactory>,
    pub recorder: Option<ActionRecorder>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("devices", &self.devices)
            .field("dms", &self.dms.is_some())
            .field("recorder", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub fn new(config: HarnessConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            devices: None,
            dms: None,
            recorder: None,
        }
    }

    #[must_use]
    pub fn with_devices(mut self, hub: Arc<DeviceHub>) -> Self {
        self.devices = Some(hub);
        self
    }

    #[must_use]
    pub fn with_dms(mut self, factory: DmsFactory) -> Self {
        self.dms = Some(factory);
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: ActionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

/// Input to [`Fixture::set_up`].
pub struct FixtState<'a> {
    pub env: &'a Environment,
    pub name: &'a str,
    pub out_dir: &'a Path,
    parent: Option<&'a FixtValue>,
}

impl<'a> FixtState<'a> {
    pub fn new(env: &'a Environment, name: &'a str, out_dir: &'a Path, parent: Option<&'a FixtValue>) -> Self {
        Self {
            env,
            name,
            out_dir,
            parent,
        }
    }

    /// Value of the parent fixture, if it has one of type `T`.
    pub fn parent_value<T: 'static>(&self) -> Option<&T> {
        self.parent.and_then(|v| v.downcast_ref::<T>())
    }
}

/// Input to the per-test hooks.
#[derive(Debug, Clone)]
pub struct FixtTestState {
    pub test_name: String,
    pub out_dir: PathBuf,
    pub has_error: bool,
}

/// Callbacks of a fixture. One implementation value backs one instance.
pub trait Fixture: Send {
    fn set_up(&mut self, ctx: &Context, s: &FixtState<'_>) -> Result<FixtValue>;

    /// Bring shared state back to a clean baseline between tests. An error
    /// retires the instance.
    fn reset(&mut self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn pre_test(&mut self, _ctx: &Context, _s: &FixtTestState) -> Result<()> {
        Ok(())
    }

    fn post_test(&mut self, _ctx: &Context, _s: &FixtTestState) -> Result<()> {
        Ok(())
    }

    fn tear_down(&mut self, ctx: &Context) -> Result<()>;
}

/// Declaration of a named fixture.
#[derive(Clone)]
pub struct FixtureSpec {
    pub name: String,
    pub desc: String,
    pub contacts: Vec<String>,
    pub parent: Option<String>,
    pub imp: FixtureFactory,
    pub timeouts: FixtureTimeouts,
}

impl fmt::Debug for FixtureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureSpec")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl FixtureSpec {
    pub fn new<F>(name: impl Into<String>, imp: F) -> Self
    where
        F: Fn() -> Box<dyn Fixture> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            desc: String::new(),
            contacts: Vec::new(),
            parent: None,
            imp: Arc::new(imp),
            timeouts: FixtureTimeouts::default(),
        }
    }

    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    #[must_use]
    pub fn contacts(mut self, contacts: &[&str]) -> Self {
        self.contacts = contacts.iter().map(|c| (*c).to_string()).collect();
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: FixtureTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

// ──────────────────── instance lifecycle ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
    InTest,
    PostTest,
    TornDown,
}

/// Number of times each callback ran on an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleCounts {
    pub set_up: u32,
    pub reset: u32,
    pub pre_test: u32,
    pub post_test: u32,
    pub tear_down: u32,
}

/// One live copy of a fixture.
pub struct FixtureInstance {
    spec: Arc<FixtureSpec>,
    imp: Box<dyn Fixture>,
    phase: Phase,
    value: Option<FixtValue>,
    counts: LifecycleCounts,
}

impl fmt::Debug for FixtureInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureInstance")
            .field("name", &self.spec.name)
            .field("phase", &self.phase)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl FixtureInstance {
    pub fn new(spec: Arc<FixtureSpec>) -> Self {
        let imp = (spec.imp)();
        Self {
            spec,
            imp,
            phase: Phase::Uninitialized,
            value: None,
            counts: LifecycleCounts::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &Arc<FixtureSpec> {
        &self.spec
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counts(&self) -> LifecycleCounts {
        self.counts
    }

    /// Value returned by SetUp.
    pub fn value(&self) -> Option<&FixtValue> {
        self.value.as_ref()
    }

    fn expect_phase(&self, op: &str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(IthError::Runtime {
                details: format!(
                    "fixture {}: cannot {op} while {:?}",
                    self.spec.name, self.phase
                ),
            })
        }
    }

    /// Run SetUp. A failed SetUp retires the instance without TearDown.
    pub fn set_up(
        &mut self,
        ctx: &Context,
        env: &Environment,
        out_dir: &Path,
        parent: Option<&FixtValue>,
    ) -> Result<FixtValue> {
        self.expect_phase("set up", &[Phase::Uninitialized])?;
        self.counts.set_up += 1;
        let ctx = ctx.with_timeout(self.spec.timeouts.set_up);
        let state = FixtState::new(env, &self.spec.name, out_dir, parent);
        tracing::info!(fixture = %self.spec.name, "[ITH-FIXTURE] set up");
        match self.imp.set_up(&ctx, &state) {
            Ok(value) => {
                self.phase = Phase::Ready;
                self.value = Some(Arc::clone(&value));
                Ok(value)
            }
            Err(err) => {
                self.phase = Phase::TornDown;
                Err(IthError::Setup {
                    fixture: self.spec.name.clone(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Run PreTest. The instance is in test afterwards even if the hook
    /// failed, so PostTest still runs.
    pub fn pre_test(&mut self, ctx: &Context, s: &FixtTestState) -> Result<()> {
        self.expect_phase("run pre-test", &[Phase::Ready])?;
        self.counts.pre_test += 1;
        self.phase = Phase::InTest;
        let ctx = ctx.with_timeout(self.spec.timeouts.pre_test);
        self.imp.pre_test(&ctx, s)
    }

    pub fn post_test(&mut self, ctx: &Context, s: &FixtTestState) -> Result<()> {
        self.expect_phase("run post-test", &[Phase::InTest])?;
        self.counts.post_test += 1;
        self.phase = Phase::PostTest;
        let ctx = ctx.with_timeout(self.spec.timeouts.post_test);
        self.imp.post_test(&ctx, s)
    }

    /// Run Reset. On failure the instance stays in post-test and must be
    /// torn down.
    pub fn reset(&mut self, ctx: &Context) -> Result<()> {
        self.expect_phase("reset", &[Phase::PostTest])?;
        self.counts.reset += 1;
        let ctx = ctx.with_timeout(self.spec.timeouts.reset);
        self.imp.reset(&ctx)?;
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Run TearDown exactly once.
    pub fn tear_down(&mut self, ctx: &Context) -> Result<()> {
        self.expect_phase("tear down", &[Phase::Ready, Phase::PostTest])?;
        self.counts.tear_down += 1;
        self.phase = Phase::TornDown;
        self.value = None;
        let ctx = ctx.with_timeout(self.spec.timeouts.tear_down);
        tracing::info!(fixture = %self.spec.name, "[ITH-FIXTURE] tear down");
        self.imp.tear_down(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::browser::BrowserOption;
    use parking_lot::Mutex;

    struct Counting {
        log: Arc<Mutex<Vec<String>>>,
        fail_reset: bool,
    }

    impl Fixture for Counting {
        fn set_up(&mut self, _ctx: &Context, s: &FixtState<'_>) -> Result<FixtValue> {
            let parent = s
                .parent_value::<Vec<BrowserOption>>()
                .map_or(0, Vec::len);
            self.log.lock().push(format!("set_up parent_opts={parent}"));
            Ok(Arc::new(42_u32))
        }

        fn reset(&mut self, _ctx: &Context) -> Result<()> {
            self.log.lock().push("reset".into());
            if self.fail_reset {
                return Err(IthError::Runtime {
                    details: "browser unresponsive".into(),
                });
            }
            Ok(())
        }

        fn tear_down(&mut self, _ctx: &Context) -> Result<()> {
            self.log.lock().push("tear_down".into());
            Ok(())
        }
    }

    struct NullLauncher;

    impl Launcher for NullLauncher {
        fn launch(
            &self,
            _ctx: &Context,
            _browser_type: BrowserType,
            _opts: &[BrowserOption],
        ) -> Result<Arc<dyn Browser>> {
            Err(IthError::Runtime {
                details: "no browser".into(),
            })
        }
    }

    fn env() -> Environment {
        Environment::new(HarnessConfig::default(), Arc::new(NullLauncher))
    }

    fn spec(log: &Arc<Mutex<Vec<String>>>, fail_reset: bool) -> Arc<FixtureSpec> {
        let log = Arc::clone(log);
        Arc::new(FixtureSpec::new("counting", move || {
            Box::new(Counting {
                log: Arc::clone(&log),
                fail_reset,
            })
        }))
    }

    fn test_state() -> FixtTestState {
        FixtTestState {
            test_name: "inputs.Sample".into(),
            out_dir: PathBuf::from("/tmp"),
            has_error: false,
        }
    }

    #[test]
    fn lifecycle_order_is_enforced() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut inst = FixtureInstance::new(spec(&log, false));
        let ctx = Context::background();

        assert!(inst.pre_test(&ctx, &test_state()).is_err());
        let parent: FixtValue = Arc::new(vec![BrowserOption::VkEnabled]);
        let value = inst.set_up(&ctx, &env(), Path::new("/tmp"), Some(&parent)).unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&42));
        assert!(inst.set_up(&ctx, &env(), Path::new("/tmp"), None).is_err());

        for _ in 0..2 {
            inst.pre_test(&ctx, &test_state()).unwrap();
            assert!(inst.reset(&ctx).is_err(), "reset before post-test");
            inst.post_test(&ctx, &test_state()).unwrap();
            inst.reset(&ctx).unwrap();
        }
        inst.tear_down(&ctx).unwrap();
        assert!(inst.tear_down(&ctx).is_err());
        assert_eq!(inst.phase(), Phase::TornDown);
        assert_eq!(
            inst.counts(),
            LifecycleCounts {
                set_up: 1,
                reset: 2,
                pre_test: 2,
                post_test: 2,
                tear_down: 1,
            }
        );
        assert_eq!(log.lock()[0], "set_up parent_opts=1");
    }

    #[test]
    fn failed_reset_leaves_instance_for_tear_down() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut inst = FixtureInstance::new(spec(&log, true));
        let ctx = Context::background();
        inst.set_up(&ctx, &env(), Path::new("/tmp"), None).unwrap();
        inst.pre_test(&ctx, &test_state()).unwrap();
        inst.post_test(&ctx, &test_state()).unwrap();
        assert!(inst.reset(&ctx).is_err());
        assert_eq!(inst.phase(), Phase::PostTest);
        inst.tear_down(&ctx).unwrap();
        assert_eq!(*log.lock(), vec!["set_up parent_opts=0", "reset", "tear_down"]);
    }
}
