//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{IthError, Result};
use crate::core::paths::resolve_absolute_path;

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub poll: PollConfig,
    pub fixture: FixtureConfig,
    pub runner: RunnerConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
}

/// Default polling cadence for UI waits and field validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Timeout of the `wait_for_field_text_*` validators.
    pub field_timeout_ms: u64,
}

/// Lifecycle-phase budgets of the standard inputs fixtures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixtureConfig {
    pub login_timeout_secs: u64,
    pub reset_timeout_secs: u64,
    pub pre_test_timeout_secs: u64,
    pub post_test_timeout_secs: u64,
    pub tear_down_timeout_secs: u64,
}

/// Test execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Time carved off the end of every test body for deferred cleanups.
    pub cleanup_reservation_secs: u64,
    pub default_test_timeout_secs: u64,
    pub record_screen: bool,
    pub dump_on_failure: bool,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub out_dir: PathBuf,
    pub data_dir: PathBuf,
    pub telemetry_log: PathBuf,
}

/// User-action event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            timeout_ms: 15_000,
            field_timeout_ms: 10_000,
        }
    }
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: 240,
            reset_timeout_secs: 30,
            pre_test_timeout_secs: 5,
            post_test_timeout_secs: 5,
            tear_down_timeout_secs: 30,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cleanup_reservation_secs: 5,
            default_test_timeout_secs: 120,
            record_screen: false,
            dump_on_failure: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!("[ITH-CONFIG] HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("ith").join("config.toml");
        let data = home_dir.join(".local").join("share").join("ith");
        Self {
            config_file: cfg,
            out_dir: data.join("results"),
            data_dir: data.join("data"),
            telemetry_log: data.join("user_actions.jsonl"),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn field_timeout(&self) -> Duration {
        Duration::from_millis(self.field_timeout_ms)
    }
}

impl FixtureConfig {
    /// Phase budgets for the standard inputs fixtures.
    #[must_use]
    pub fn timeouts(&self) -> crate::fixture::FixtureTimeouts {
        crate::fixture::FixtureTimeouts {
            set_up: Duration::from_secs(self.login_timeout_secs),
            reset: Duration::from_secs(self.reset_timeout_secs),
            pre_test: Duration::from_secs(self.pre_test_timeout_secs),
            post_test: Duration::from_secs(self.post_test_timeout_secs),
            tear_down: Duration::from_secs(self.tear_down_timeout_secs),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn cleanup_reservation(&self) -> Duration {
        Duration::from_secs(self.cleanup_reservation_secs)
    }

    #[must_use]
    pub fn default_test_timeout(&self) -> Duration {
        Duration::from_secs(self.default_test_timeout_secs)
    }
}

impl HarnessConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| IthError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(IthError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config, recorded in run reports.
    ///
    /// FNV-1a over the canonical JSON.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Apply `ITH_*` overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // poll
        set_u64(&lookup, "ITH_POLL_INTERVAL_MS", &mut self.poll.interval_ms)?;
        set_u64(&lookup, "ITH_POLL_TIMEOUT_MS", &mut self.poll.timeout_ms)?;
        set_u64(
            &lookup,
            "ITH_POLL_FIELD_TIMEOUT_MS",
            &mut self.poll.field_timeout_ms,
        )?;

        // fixture
        set_u64(
            &lookup,
            "ITH_FIXTURE_LOGIN_TIMEOUT_SECS",
            &mut self.fixture.login_timeout_secs,
        )?;
        set_u64(
            &lookup,
            "ITH_FIXTURE_RESET_TIMEOUT_SECS",
            &mut self.fixture.reset_timeout_secs,
        )?;
        set_u64(
            &lookup,
            "ITH_FIXTURE_PRE_TEST_TIMEOUT_SECS",
            &mut self.fixture.pre_test_timeout_secs,
        )?;
        set_u64(
            &lookup,
            "ITH_FIXTURE_POST_TEST_TIMEOUT_SECS",
            &mut self.fixture.post_test_timeout_secs,
        )?;
        set_u64(
            &lookup,
            "ITH_FIXTURE_TEAR_DOWN_TIMEOUT_SECS",
            &mut self.fixture.tear_down_timeout_secs,
        )?;

        // runner
        set_u64(
            &lookup,
            "ITH_RUNNER_CLEANUP_RESERVATION_SECS",
            &mut self.runner.cleanup_reservation_secs,
        )?;
        set_u64(
            &lookup,
            "ITH_RUNNER_DEFAULT_TEST_TIMEOUT_SECS",
            &mut self.runner.default_test_timeout_secs,
        )?;
        set_bool(
            &lookup,
            "ITH_RUNNER_RECORD_SCREEN",
            &mut self.runner.record_screen,
        )?;
        set_bool(
            &lookup,
            "ITH_RUNNER_DUMP_ON_FAILURE",
            &mut self.runner.dump_on_failure,
        )?;

        // paths
        set_path(&lookup, "ITH_PATHS_OUT_DIR", &mut self.paths.out_dir);
        set_path(&lookup, "ITH_PATHS_DATA_DIR", &mut self.paths.data_dir);
        set_path(
            &lookup,
            "ITH_PATHS_TELEMETRY_LOG",
            &mut self.paths.telemetry_log,
        );

        // telemetry
        set_bool(&lookup, "ITH_TELEMETRY_ENABLED", &mut self.telemetry.enabled)?;
        set_u64(
            &lookup,
            "ITH_TELEMETRY_MAX_SIZE_BYTES",
            &mut self.telemetry.max_size_bytes,
        )?;
        if let Some(raw) = lookup("ITH_TELEMETRY_MAX_ROTATED_FILES") {
            self.telemetry.max_rotated_files = raw.parse::<u32>().map_err(|error| {
                IthError::ConfigParse {
                    context: "env",
                    details: format!("ITH_TELEMETRY_MAX_ROTATED_FILES={raw:?}: {error}"),
                }
            })?;
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        self.paths.out_dir = resolve_absolute_path(&self.paths.out_dir);
        self.paths.data_dir = resolve_absolute_path(&self.paths.data_dir);
        self.paths.telemetry_log = resolve_absolute_path(&self.paths.telemetry_log);
    }

    /// Reject configurations the harness cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 {
            return Err(invalid("poll.interval_ms must be > 0"));
        }
        if self.poll.interval_ms > self.poll.timeout_ms {
            return Err(invalid("poll.interval_ms must be <= poll.timeout_ms"));
        }
        if self.poll.field_timeout_ms == 0 {
            return Err(invalid("poll.field_timeout_ms must be > 0"));
        }

        for (name, val) in [
            ("login_timeout_secs", self.fixture.login_timeout_secs),
            ("reset_timeout_secs", self.fixture.reset_timeout_secs),
            ("pre_test_timeout_secs", self.fixture.pre_test_timeout_secs),
            ("post_test_timeout_secs", self.fixture.post_test_timeout_secs),
            ("tear_down_timeout_secs", self.fixture.tear_down_timeout_secs),
        ] {
            if val == 0 {
                return Err(IthError::InvalidConfig {
                    details: format!("fixture.{name} must be > 0"),
                });
            }
        }

        if self.runner.default_test_timeout_secs == 0 {
            return Err(invalid("runner.default_test_timeout_secs must be > 0"));
        }
        if self.runner.cleanup_reservation_secs >= self.runner.default_test_timeout_secs {
            return Err(invalid(
                "runner.cleanup_reservation_secs must be < runner.default_test_timeout_secs",
            ));
        }

        if self.telemetry.max_size_bytes == 0 {
            return Err(invalid("telemetry.max_size_bytes must be > 0"));
        }
        if self.telemetry.max_rotated_files == 0 {
            return Err(invalid("telemetry.max_rotated_files must be > 0"));
        }

        Ok(())
    }
}

fn invalid(details: &str) -> IthError {
    IthError::InvalidConfig {
        details: details.to_string(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn set_u64<F>(lookup: &F, name: &str, slot: &mut u64) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env_u64(name, &raw)?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &F, name: &str, slot: &mut bool) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env_bool(name, &raw)?;
    }
    Ok(())
}

fn set_path<F>(lookup: &F, name: &str, slot: &mut PathBuf)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = PathBuf::from(raw);
    }
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| IthError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| IthError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{HarnessConfig, IthError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = HarnessConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll.interval_ms, 100);
        assert_eq!(cfg.poll.field_timeout_ms, 10_000);
        assert_eq!(cfg.fixture.reset_timeout_secs, 30);
        assert_eq!(cfg.runner.cleanup_reservation_secs, 5);
    }

    #[test]
    fn poll_interval_must_not_exceed_timeout() {
        let mut cfg = HarnessConfig::default();
        cfg.poll.interval_ms = cfg.poll.timeout_ms + 1;
        let err = cfg.validate().expect_err("expected poll validation error");
        assert!(err.to_string().contains("poll.interval_ms"));
    }

    #[test]
    fn zero_fixture_budget_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.fixture.post_test_timeout_secs = 0;
        let err = cfg.validate().expect_err("expected fixture validation error");
        match err {
            IthError::InvalidConfig { details } => {
                assert!(details.contains("post_test_timeout_secs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cleanup_reservation_must_fit_in_test_timeout() {
        let mut cfg = HarnessConfig::default();
        cfg.runner.cleanup_reservation_secs = cfg.runner.default_test_timeout_secs;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = HarnessConfig::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = HarnessConfig::default();
        modified.poll.interval_ms += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
    }

    #[test]
    fn stable_hash_deterministic() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        assert_eq!(cfg.stable_hash().unwrap().len(), 16);
    }

    #[test]
    fn env_overrides_apply_to_every_section() {
        let env = vars(&[
            ("ITH_POLL_INTERVAL_MS", "50"),
            ("ITH_FIXTURE_RESET_TIMEOUT_SECS", "12"),
            ("ITH_RUNNER_RECORD_SCREEN", "true"),
            ("ITH_PATHS_OUT_DIR", "/tmp/ith-out"),
            ("ITH_TELEMETRY_MAX_ROTATED_FILES", "7"),
        ]);
        let mut cfg = HarnessConfig::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides should parse");
        assert_eq!(cfg.poll.interval_ms, 50);
        assert_eq!(cfg.fixture.reset_timeout_secs, 12);
        assert!(cfg.runner.record_screen);
        assert_eq!(cfg.paths.out_dir, PathBuf::from("/tmp/ith-out"));
        assert_eq!(cfg.telemetry.max_rotated_files, 7);
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let env = vars(&[("ITH_RUNNER_DUMP_ON_FAILURE", "maybe")]);
        let mut cfg = HarnessConfig::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("expected parse error");
        assert_eq!(err.code(), "ITH-1003");
        assert!(err.to_string().contains("ITH_RUNNER_DUMP_ON_FAILURE"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = HarnessConfig::load(Some(Path::new("/nonexistent/ith/config.toml")))
            .expect_err("expected missing config");
        assert!(matches!(err, IthError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_partial_toml_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[poll]\ninterval_ms = 250\n\n[runner]\nrecord_screen = true\n",
        )
        .unwrap();
        let cfg = HarnessConfig::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.poll.interval_ms, 250);
        assert_eq!(cfg.poll.timeout_ms, 15_000);
        assert!(cfg.runner.record_screen);
        assert_eq!(cfg.paths.config_file, path);
    }
}
