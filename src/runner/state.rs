//! Per-test state handed to test bodies: parameters, fixture value,
//! non-fatal errors, deferred cleanups and named sub-tests.

use std::any::Any;
use std::fmt;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::core::paths;
use crate::fixture::FixtValue;
use crate::registry::ParamValue;

/// Cleanup registered with [`State::defer`].
pub type Cleanup = Box<dyn FnOnce(&Context) -> Result<()> + Send>;

#[derive(Default)]
struct Inner {
    errors: Vec<String>,
    logs: Vec<String>,
    defers: Vec<(String, Cleanup)>,
}

/// Handle a test body uses to report and to reach its inputs.
pub struct State {
    name: String,
    out_dir: PathBuf,
    data_dir: PathBuf,
    declared_data: Vec<String>,
    param: Option<ParamValue>,
    fixt_value: Option<FixtValue>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("State")
            .field("name", &self.name)
            .field("out_dir", &self.out_dir)
            .field("errors", &inner.errors)
            .field("defers", &inner.defers.len())
            .finish_non_exhaustive()
    }
}

/// Render a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl State {
    pub fn new(name: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            out_dir: out_dir.into(),
            data_dir: PathBuf::new(),
            declared_data: Vec::new(),
            param: None,
            fixt_value: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Where data files live and which of them the test declared.
    #[must_use]
    pub fn with_data(mut self, data_dir: impl Into<PathBuf>, declared: Vec<String>) -> Self {
        self.data_dir = data_dir.into();
        self.declared_data = declared;
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: Option<ParamValue>) -> Self {
        self.param = param;
        self
    }

    #[must_use]
    pub fn with_fixt_value(mut self, value: Option<FixtValue>) -> Self {
        self.fixt_value = value;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// The variant's param value, if it is a `T`.
    pub fn param<T: 'static>(&self) -> Option<&T> {
        self.param.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    /// The fixture's value, if it is a `T`.
    pub fn fixt_value<T: 'static>(&self) -> Option<&T> {
        self.fixt_value.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Path of a data file. Files the test did not declare are still
    /// resolved but logged.
    pub fn data_path(&self, name: &str) -> PathBuf {
        if !self.declared_data.iter().any(|d| d == name) {
            tracing::warn!(test = %self.name, file = name, "[ITH-RUNNER] data file not declared");
        }
        self.data_dir.join(name)
    }

    pub fn log(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!(test = %self.name, "{msg}");
        self.inner.lock().logs.push(msg);
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner.lock().logs.clone()
    }

    /// Record a failure and keep going.
    pub fn error(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        tracing::warn!(test = %self.name, error = %msg, "[ITH-RUNNER] test error");
        self.inner.lock().errors.push(msg);
    }

    pub fn has_error(&self) -> bool {
        !self.inner.lock().errors.is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().errors.clone()
    }

    /// Register a cleanup. Cleanups run last-in first-out after the body,
    /// on the context the body's context was shortened from.
    pub fn defer<F>(&self, name: impl Into<String>, cleanup: F)
    where
        F: FnOnce(&Context) -> Result<()> + Send + 'static,
    {
        self.inner.lock().defers.push((name.into(), Box::new(cleanup)));
    }

    /// Run and drop every registered cleanup. A failing or panicking
    /// cleanup is recorded and the rest still run.
    pub fn run_defers(&self, ctx: &Context) {
        loop {
            let Some((name, cleanup)) = self.inner.lock().defers.pop() else {
                break;
            };
            match catch_unwind(AssertUnwindSafe(|| cleanup(ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.error(format!("cleanup {name}: {err}")),
                Err(payload) => self.error(format!(
                    "cleanup {name} panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        }
    }

    /// Run `body` as a named sub-test with its own output directory under
    /// `subtests/`. Returns whether it passed; failures are also recorded
    /// on `self`.
    pub fn run<F>(&self, ctx: &Context, name: &str, body: F) -> bool
    where
        F: FnOnce(&Context, &Self) -> Result<()>,
    {
        let out_dir = paths::subtest_out_dir(&self.out_dir, name);
        if let Err(err) = fs::create_dir_all(&out_dir) {
            self.error(IthError::io(&out_dir, err));
            return false;
        }
        let sub = Self {
            name: format!("{}/{name}", self.name),
            out_dir,
            data_dir: self.data_dir.clone(),
            declared_data: self.declared_data.clone(),
            param: self.param.clone(),
            fixt_value: self.fixt_value.clone(),
            inner: Mutex::new(Inner::default()),
        };
        tracing::info!(subtest = %sub.name, "[ITH-RUNNER] sub-test start");
        match catch_unwind(AssertUnwindSafe(|| body(ctx, &sub))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => sub.error(err),
            Err(payload) => sub.error(IthError::Panic {
                details: panic_message(payload.as_ref()),
            }),
        }
        sub.run_defers(ctx);
        let errors = sub.errors();
        for err in &errors {
            self.error(format!("sub-test {name}: {err}"));
        }
        errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defers_run_lifo_and_survive_failures() {
        let st = State::new("inputs.Defer", "/tmp");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            st.defer(format!("step{i}"), move |_| {
                order.lock().push(i);
                if i == 1 {
                    return Err(IthError::Runtime {
                        details: "boom".into(),
                    });
                }
                Ok(())
            });
        }
        st.run_defers(&Context::background());
        assert_eq!(*order.lock(), vec![2, 1, 0]);
        assert_eq!(st.errors().len(), 1);
        assert!(st.errors()[0].contains("cleanup step1"));
    }

    #[test]
    fn sub_test_failure_marks_parent() {
        let dir = tempfile::tempdir().unwrap();
        let st = State::new("inputs.Parent", dir.path());
        let ctx = Context::background();
        assert!(st.run(&ctx, "ok", |_, _| Ok(())));
        assert!(!st.has_error());
        assert!(!st.run(&ctx, "bad", |_, s| {
            assert!(s.out_dir().ends_with("subtests/bad"));
            Err(IthError::Precondition {
                details: "field missing".into(),
            })
        }));
        assert!(!st.run(&ctx, "panics", |_, _| panic!("kaboom")));
        let errors = st.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("sub-test bad"));
        assert!(errors[1].contains("kaboom"));
        assert!(dir.path().join("subtests").join("ok").is_dir());
    }

    #[test]
    fn typed_accessors() {
        let st = State::new("inputs.Typed", "/tmp")
            .with_param(Some(Arc::new("us".to_string())))
            .with_fixt_value(Some(Arc::new(7_u8)))
            .with_data("/data", vec!["a.wav".into()]);
        assert_eq!(st.param::<String>().map(String::as_str), Some("us"));
        assert_eq!(st.param::<u8>(), None);
        assert_eq!(st.fixt_value::<u8>(), Some(&7));
        assert_eq!(st.data_path("a.wav"), PathBuf::from("/data/a.wav"));
    }
}
