//! The harness: runs selected variants, sharing fixtures between
//! consecutive tests, and reports the outcome of each.

pub mod state;

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::context::{self, Context};
use crate::core::errors::{IthError, Result};
use crate::core::paths;
use crate::faillog::{self, ScreenRecorder};
use crate::fixture::{Environment, FixtTestState, FixtValue, FixtureData, FixtureInstance, FixtureSpec, Phase};
use crate::registry::deps::{self, Dut};
use crate::registry::select::Selection;
use crate::registry::{Registry, Variant};
use crate::surface::AutomationConn;

pub use state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_reasons: Vec<String>,
    pub duration_ms: u64,
    pub out_dir: PathBuf,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub config_hash: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<TestResult>,
}

impl RunReport {
    /// 0 when nothing failed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failed > 0)
    }

    pub fn result(&self, name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| IthError::io(parent, err))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|err| IthError::io(path, err))
    }
}

/// Install a `tracing` subscriber writing to stderr. `RUST_LOG` wins over
/// the default level. Does nothing if a subscriber is already installed.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct LiveFixture {
    instance: FixtureInstance,
    value: FixtValue,
}

/// Runs registered tests against one environment.
pub struct Harness {
    registry: Registry,
    env: Environment,
    dut: Dut,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("tests", &self.registry.tests().len())
            .field("dut", &self.dut)
            .finish_non_exhaustive()
    }
}

impl Harness {
    pub fn new(registry: Registry, env: Environment) -> Self {
        Self {
            registry,
            env,
            dut: Dut::default(),
        }
    }

    #[must_use]
    pub fn with_dut(mut self, dut: Dut) -> Self {
        self.dut = dut;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn out_root(&self) -> &Path {
        &self.env.config.paths.out_dir
    }

    /// Run every selected variant.
    ///
    /// Variants are grouped by fixture chain so each fixture instance is
    /// set up once for a contiguous run of tests, reset between them and
    /// torn down as soon as no remaining test needs it.
    pub fn run(&self, ctx: &Context, selection: &Selection) -> Result<RunReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let config_hash = self.env.config.stable_hash()?;

        let mut planned: Vec<(Vec<String>, Variant, Result<Vec<Arc<FixtureSpec>>>)> = self
            .registry
            .variants()
            .into_iter()
            .filter(|v| selection.matches(&v.name, &v.attrs))
            .map(|v| {
                let chain = v
                    .fixture
                    .as_deref()
                    .map_or_else(|| Ok(Vec::new()), |name| self.registry.fixture_chain(name));
                let key = chain
                    .as_ref()
                    .map(|c| c.iter().map(|s| s.name.clone()).collect())
                    .unwrap_or_default();
                (key, v, chain)
            })
            .collect();
        planned.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::info!(variants = planned.len(), "[ITH-RUNNER] starting run");

        let mut stack: Vec<LiveFixture> = Vec::new();
        let mut results = Vec::with_capacity(planned.len());
        for (_, variant, chain) in planned {
            let result = match chain {
                Err(err) => self.failed_before_start(&variant, &err),
                Ok(chain) => self.run_variant(ctx, &variant, &chain, &mut stack),
            };
            tracing::info!(
                test = %result.name,
                outcome = ?result.outcome,
                duration_ms = result.duration_ms,
                "[ITH-RUNNER] test finished"
            );
            results.push(result);
        }
        self.tear_down_above(ctx, &mut stack, 0);

        let count = |o: Outcome| results.iter().filter(|r| r.outcome == o).count();
        let report = RunReport {
            started_at,
            duration_ms: millis(started.elapsed()),
            config_hash,
            passed: count(Outcome::Passed),
            failed: count(Outcome::Failed),
            skipped: count(Outcome::Skipped),
            results,
        };
        tracing::info!(
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            "[ITH-RUNNER] run complete"
        );
        Ok(report)
    }

    fn failed_before_start(&self, v: &Variant, err: &IthError) -> TestResult {
        TestResult {
            name: v.name.clone(),
            outcome: Outcome::Failed,
            fixture: v.fixture.clone(),
            errors: vec![err.to_string()],
            skip_reasons: Vec::new(),
            duration_ms: 0,
            out_dir: paths::test_out_dir(self.out_root(), &v.name),
        }
    }

    /// Tear down `stack[keep..]`, innermost first.
    fn tear_down_above(&self, ctx: &Context, stack: &mut Vec<LiveFixture>, keep: usize) {
        while stack.len() > keep {
            let Some(mut live) = stack.pop() else { break };
            if let Err(err) = live.instance.tear_down(ctx) {
                tracing::warn!(fixture = live.instance.name(), error = %err, "[ITH-FIXTURE] tear down failed");
            }
        }
    }

    /// Bring `stack` to exactly `chain`: reset what is shared, tear down
    /// what is not needed, set up what is missing.
    fn prepare_fixtures(
        &self,
        ctx: &Context,
        chain: &[Arc<FixtureSpec>],
        stack: &mut Vec<LiveFixture>,
    ) -> Result<()> {
        let shared = stack
            .iter()
            .zip(chain)
            .take_while(|(live, spec)| Arc::ptr_eq(live.instance.spec(), spec))
            .count();
        self.tear_down_above(ctx, stack, shared);

        for i in 0..stack.len() {
            if stack[i].instance.phase() != Phase::PostTest {
                continue;
            }
            if let Err(err) = stack[i].instance.reset(ctx) {
                tracing::warn!(
                    fixture = stack[i].instance.name(),
                    error = %err,
                    "[ITH-FIXTURE] reset failed, recreating"
                );
                self.tear_down_above(ctx, stack, i);
                break;
            }
        }

        for spec in &chain[stack.len()..] {
            let mut instance = FixtureInstance::new(Arc::clone(spec));
            let out_dir = self.out_root().join("fixtures").join(paths::sanitize_name(&spec.name));
            let parent = stack.last().map(|l| Arc::clone(&l.value));
            let value = instance.set_up(ctx, &self.env, &out_dir, parent.as_ref())?;
            stack.push(LiveFixture { instance, value });
        }
        Ok(())
    }

    fn run_variant(
        &self,
        ctx: &Context,
        v: &Variant,
        chain: &[Arc<FixtureSpec>],
        stack: &mut Vec<LiveFixture>,
    ) -> TestResult {
        let started = Instant::now();
        let out_dir = paths::test_out_dir(self.out_root(), &v.name);
        let mut result = TestResult {
            name: v.name.clone(),
            outcome: Outcome::Passed,
            fixture: v.fixture.clone(),
            errors: Vec::new(),
            skip_reasons: Vec::new(),
            duration_ms: 0,
            out_dir: out_dir.clone(),
        };

        let reasons = deps::check(&v.software_deps, &v.hardware_deps, &self.dut);
        if !reasons.is_empty() {
            tracing::info!(test = %v.name, ?reasons, "[ITH-RUNNER] skipped");
            result.outcome = Outcome::Skipped;
            result.skip_reasons = reasons;
            return result;
        }
        if let Err(err) = ctx.err() {
            result.outcome = Outcome::Failed;
            result.errors.push(err.to_string());
            return result;
        }
        if let Err(err) = fs::create_dir_all(&out_dir) {
            result.outcome = Outcome::Failed;
            result.errors.push(IthError::io(&out_dir, err).to_string());
            return result;
        }
        if let Err(err) = self.prepare_fixtures(ctx, chain, stack) {
            result.outcome = Outcome::Failed;
            result.errors.push(err.to_string());
            result.duration_ms = millis(started.elapsed());
            return result;
        }

        let st = State::new(&v.name, &out_dir)
            .with_data(&self.env.config.paths.data_dir, v.data.clone())
            .with_param(v.val.clone())
            .with_fixt_value(stack.last().map(|l| Arc::clone(&l.value)));
        let conn: Option<Arc<dyn AutomationConn>> = st
            .fixt_value::<FixtureData>()
            .map(|d| Arc::clone(&d.conn));
        let fts = |has_error| FixtTestState {
            test_name: v.name.clone(),
            out_dir: out_dir.clone(),
            has_error,
        };

        let timeout = v
            .timeout
            .unwrap_or_else(|| self.env.config.runner.default_test_timeout());
        let test_ctx = ctx.with_timeout(timeout);

        let mut pre_ok = true;
        for live in stack.iter_mut() {
            if let Err(err) = live.instance.pre_test(&test_ctx, &fts(false)) {
                st.error(format!("pre-test of {}: {err}", live.instance.name()));
                pre_ok = false;
                break;
            }
        }

        let recorder = match (&conn, self.env.config.runner.record_screen) {
            (Some(conn), true) => ScreenRecorder::start(&test_ctx, Arc::clone(conn), &out_dir, &v.name)
                .map_err(|err| tracing::warn!(error = %err, "[ITH-RUNNER] screen recording unavailable"))
                .ok(),
            _ => None,
        };

        if pre_ok {
            let (body_ctx, cancel) =
                context::shorten(&test_ctx, self.env.config.runner.cleanup_reservation());
            tracing::info!(test = %v.name, "[ITH-RUNNER] test start");
            match catch_unwind(AssertUnwindSafe(|| (v.func)(&body_ctx, &st))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => st.error(err),
                Err(payload) => st.error(IthError::Panic {
                    details: state::panic_message(payload.as_ref()),
                }),
            }
            cancel.cancel();
        }

        st.run_defers(&test_ctx);
        if self.env.config.runner.dump_on_failure
            && let Some(conn) = &conn
            && let Err(err) = faillog::dump_ui_tree_with_screenshot_on_error(
                &test_ctx,
                conn.as_ref(),
                &out_dir,
                st.has_error(),
                "",
            )
        {
            tracing::warn!(error = %err, "[ITH-RUNNER] failure diagnostics incomplete");
        }
        if let Some(recorder) = recorder
            && let Err(err) = recorder.stop_and_save(&test_ctx)
        {
            tracing::warn!(error = %err, "[ITH-RUNNER] screen recording not saved");
        }

        let has_error = st.has_error();
        for live in stack.iter_mut().rev() {
            if live.instance.phase() != Phase::InTest {
                continue;
            }
            if let Err(err) = live.instance.post_test(ctx, &fts(has_error)) {
                st.error(format!("post-test of {}: {err}", live.instance.name()));
            }
        }

        if !st.logs().is_empty() {
            let log_path = out_dir.join("log.txt");
            if let Err(err) = fs::write(&log_path, st.logs().join("\n") + "\n") {
                tracing::warn!(path = %log_path.display(), error = %err, "[ITH-RUNNER] could not write test log");
            }
        }
        result.errors = st.errors();
        if !result.errors.is_empty() {
            result.outcome = Outcome::Failed;
        }
        result.duration_ms = millis(started.elapsed());
        result
    }
}
