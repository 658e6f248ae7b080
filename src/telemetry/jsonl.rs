//! Append-only JSONL log of user actions, one event per line.
//!
//! Each line is written with a single `write_all`, so a reader tailing the
//! file never sees a partial event. If the log path cannot be opened the
//! fallback path is used; if neither opens, or a write fails, events are kept
//! in memory only. A broken telemetry log never fails a test.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::HarnessConfig;
use crate::core::errors::{IthError, Result};
/// One recorded user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub test_name: String,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl ActionEvent {
    /// New successful event stamped with the current UTC time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            ts: format_utc_now(),
            name: name.into(),
            test_name: String::new(),
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
            ok: true,
            duration_ms: 0,
            error_code: None,
            error_message: None,
        }
    }

    /// Record `err` as the outcome.
    #[must_use]
    pub fn failed(mut self, err: &IthError) -> Self {
        self.ok = false;
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Where and how large the action log may grow.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Size at which the log is rotated (bytes).
    pub max_size_bytes: u64,
    /// Number of rotated logs kept next to the live one.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Log settings from the `telemetry` and `paths` sections.
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            path: config.paths.telemetry_log.clone(),
            fallback_path: Some(std::env::temp_dir().join("ith_user_actions.jsonl")),
            max_size_bytes: config.telemetry.max_size_bytes,
            max_rotated_files: config.telemetry.max_rotated_files,
        }
    }
}

#[derive(Debug)]
struct OpenLog {
    path: PathBuf,
    out: BufWriter<File>,
    size: u64,
}

impl OpenLog {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| IthError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| IthError::io(path, source))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            size,
        })
    }
}

/// Size-rotated JSONL writer for [`ActionEvent`]s.
#[derive(Debug)]
pub struct JsonlWriter {
    config: JsonlConfig,
    log: Option<OpenLog>,
}

impl JsonlWriter {
    /// Open the log path, or the fallback path when that fails.
    pub fn open(config: JsonlConfig) -> Self {
        let candidates = std::iter::once(&config.path).chain(config.fallback_path.as_ref());
        let mut log = None;
        for path in candidates {
            match OpenLog::open(path) {
                Ok(opened) => {
                    log = Some(opened);
                    break;
                }
                Err(err) => tracing::warn!(error = %err, "[ITH-JSONL] cannot open action log"),
            }
        }
        if log.is_none() {
            tracing::warn!("[ITH-JSONL] no writable action log, keeping events in memory");
        }
        Self { config, log }
    }

    /// File currently receiving events, if any.
    pub fn path(&self) -> Option<&Path> {
        self.log.as_ref().map(|log| log.path.as_path())
    }

    /// Append one record as one line.
    pub fn write_record<T: Serialize>(&mut self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(json) => format!("{json}\n"),
            Err(err) => {
                tracing::warn!(error = %err, "[ITH-JSONL] cannot serialize event");
                return;
            }
        };
        if self
            .log
            .as_ref()
            .is_some_and(|log| log.size + line.len() as u64 > self.config.max_size_bytes)
        {
            self.rotate();
        }
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(err) = log.out.write_all(line.as_bytes()) {
            tracing::warn!(path = %log.path.display(), error = %err, "[ITH-JSONL] write failed, disabling action log");
            self.log = None;
            return;
        }
        log.size += line.len() as u64;
    }

    pub fn flush(&mut self) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.out.flush();
        }
    }

    /// `log` becomes `log.1`, `log.1` becomes `log.2`, and the oldest is dropped.
    fn rotate(&mut self) {
        let Some(mut log) = self.log.take() else {
            return;
        };
        let _ = log.out.flush();
        let base = log.path;
        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));
        match OpenLog::open(&base) {
            Ok(opened) => self.log = Some(opened),
            Err(err) => tracing::warn!(error = %err, "[ITH-JSONL] reopen after rotation failed"),
        }
    }
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
