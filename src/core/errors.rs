//! ITH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, IthError>;

/// Top-level error type for the inputs harness.
#[derive(Debug, Error)]
pub enum IthError {
    #[error("[ITH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ITH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ITH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ITH-1101] invalid registration: {details}")]
    Registration { details: String },

    #[error("[ITH-2001] fixture {fixture} failed to set up: {source}")]
    Setup {
        fixture: String,
        #[source]
        source: Box<IthError>,
    },

    #[error("[ITH-2002] precondition failed: {details}")]
    Precondition { details: String },

    #[error("[ITH-2003] skipped: {reasons}")]
    Skipped { reasons: String },

    #[error("[ITH-2004] test body panicked: {details}")]
    Panic { details: String },

    #[error("[ITH-3001] failed to {name}{}: {source}", step_suffix(.step))]
    Action {
        name: String,
        step: Option<usize>,
        #[source]
        source: Box<IthError>,
    },

    #[error("[ITH-3002] {what}: got {observed:?}, want {expected:?}")]
    Assertion {
        what: String,
        expected: String,
        observed: String,
    },

    #[error("[ITH-3003] timed out after {timeout:?}: {last}")]
    PollTimeout {
        timeout: Duration,
        #[source]
        last: Box<IthError>,
    },

    #[error("[ITH-3004] context cancelled")]
    Cancelled,

    #[error("[ITH-3005] context deadline exceeded")]
    DeadlineExceeded,

    #[error("[ITH-3006] polling stopped: {source}")]
    PollBreak {
        #[source]
        source: Box<IthError>,
    },

    #[error("[ITH-4001] no node matches {finder}")]
    NodeNotFound { finder: String },

    #[error("[ITH-4002] automation failure: {details}")]
    Automation { details: String },

    #[error("[ITH-4101] unknown key name {name:?}")]
    UnknownKey { name: String },

    #[error("[ITH-4102] character {ch:?} at position {position} cannot be typed on a QWERTY layout")]
    Untypeable { ch: char, position: usize },

    #[error("[ITH-4103] {device} is already acquired")]
    DeviceBusy { device: &'static str },

    #[error("[ITH-4104] {device} failure: {details}")]
    Device {
        device: &'static str,
        details: String,
    },

    #[error("[ITH-4201] input method failure: {details}")]
    InputMethod { details: String },

    #[error("[ITH-5001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ITH-5002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ITH-5900] runtime failure: {details}")]
    Runtime { details: String },
}

fn step_suffix(step: &Option<usize>) -> String {
    step.map_or_else(String::new, |n| format!(" on step {n}"))
}

impl IthError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ITH-1001",
            Self::MissingConfig { .. } => "ITH-1002",
            Self::ConfigParse { .. } => "ITH-1003",
            Self::Registration { .. } => "ITH-1101",
            Self::Setup { .. } => "ITH-2001",
            Self::Precondition { .. } => "ITH-2002",
            Self::Skipped { .. } => "ITH-2003",
            Self::Panic { .. } => "ITH-2004",
            Self::Action { .. } => "ITH-3001",
            Self::Assertion { .. } => "ITH-3002",
            Self::PollTimeout { .. } => "ITH-3003",
            Self::Cancelled => "ITH-3004",
            Self::DeadlineExceeded => "ITH-3005",
            Self::PollBreak { .. } => "ITH-3006",
            Self::NodeNotFound { .. } => "ITH-4001",
            Self::Automation { .. } => "ITH-4002",
            Self::UnknownKey { .. } => "ITH-4101",
            Self::Untypeable { .. } => "ITH-4102",
            Self::DeviceBusy { .. } => "ITH-4103",
            Self::Device { .. } => "ITH-4104",
            Self::InputMethod { .. } => "ITH-4201",
            Self::Serialization { .. } => "ITH-5001",
            Self::Io { .. } => "ITH-5002",
            Self::Runtime { .. } => "ITH-5900",
        }
    }

    /// Whether the error (or anything it wraps) is a context cancellation.
    ///
    /// Cancellation is never a logical failure and is never retried. A poll
    /// that ran out its own timeout is a logical failure even when its last
    /// attempt was cut short by that timeout.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Action { source, .. }
            | Self::Setup { source, .. }
            | Self::PollBreak { source } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        if self.is_cancellation() {
            return false;
        }
        !matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::Registration { .. }
                | Self::UnknownKey { .. }
                | Self::Untypeable { .. }
                | Self::Skipped { .. }
        )
    }

    /// Innermost error of a wrap chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Action { source, .. }
            | Self::Setup { source, .. }
            | Self::PollBreak { source } => source.root_cause(),
            Self::PollTimeout { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Wrap `source` with the name of the operation that failed.
    #[must_use]
    pub fn action(name: impl Into<String>, source: Self) -> Self {
        Self::Action {
            name: name.into(),
            step: None,
            source: Box::new(source),
        }
    }

    /// Convenience constructor for automation transport failures.
    #[must_use]
    pub fn automation(details: impl Into<String>) -> Self {
        Self::Automation {
            details: details.into(),
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Contextual wrapping for fallible operations: `failed to <what>: <error>`.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with the name of the failed operation.
    fn wrap(self, name: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn wrap(self, name: impl Into<String>) -> Result<T> {
        self.map_err(|err| IthError::action(name, err))
    }
}

impl From<serde_json::Error> for IthError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for IthError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
