//! Deferred, context-aware actions and the combinators that compose them.
//!
//! An [`Action`] is a cloneable closure over a [`Context`]. Nothing runs
//! until [`Action::run`] is called; every combinator passes the same
//! context through to its children.

pub mod poll;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};

type ActionFn = dyn Fn(&Context) -> Result<()> + Send + Sync;

/// A deferred unit of work taking an execution context.
#[derive(Clone)]
pub struct Action {
    run: Arc<ActionFn>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action")
    }
}

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Execute the action under `ctx`.
    pub fn run(&self, ctx: &Context) -> Result<()> {
        (self.run)(ctx)
    }

    /// An action that does nothing.
    pub fn noop() -> Self {
        Self::new(|_| Ok(()))
    }

    /// Shorthand for `combine(name, [self, next])`.
    #[must_use]
    pub fn then(self, name: impl Into<String>, next: Self) -> Self {
        combine(name, [self, next])
    }
}

/// Lift a closure into an [`Action`].
pub fn from_fn<F>(f: F) -> Action
where
    F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
{
    Action::new(f)
}

/// Run `actions` left to right, stopping at the first failure.
///
/// The error names the composite and the 1-based failing step. Nothing is
/// rolled back.
pub fn combine(name: impl Into<String>, actions: impl IntoIterator<Item = Action>) -> Action {
    let name: Arc<str> = Arc::from(name.into());
    let steps: Arc<[Action]> = actions.into_iter().collect();
    Action::new(move |ctx| {
        for (index, step) in steps.iter().enumerate() {
            ctx.err().map_err(|err| IthError::Action {
                name: name.to_string(),
                step: Some(index + 1),
                source: Box::new(err),
            })?;
            step.run(ctx).map_err(|err| IthError::Action {
                name: name.to_string(),
                step: Some(index + 1),
                source: Box::new(err),
            })?;
        }
        Ok(())
    })
}

/// Alias of [`combine`].
pub fn compose(name: impl Into<String>, actions: impl IntoIterator<Item = Action>) -> Action {
    combine(name, actions)
}

/// Suspend for `d`, or fail early when the context ends.
pub fn sleep(d: Duration) -> Action {
    Action::new(move |ctx| ctx.sleep(d))
}

/// Log the action's start and wrap its error with `name`.
pub fn named(name: impl Into<String>, action: Action) -> Action {
    let name: Arc<str> = Arc::from(name.into());
    Action::new(move |ctx| {
        tracing::debug!(action = %name, "start");
        action
            .run(ctx)
            .map_err(|err| IthError::action(name.to_string(), err))
    })
}

/// Run `action` only when `guard` succeeds. A failing guard is swallowed.
///
/// Cancellation of the guard is still reported.
pub fn if_success_then(guard: Action, action: Action) -> Action {
    Action::new(move |ctx| match guard.run(ctx) {
        Ok(()) => action.run(ctx),
        Err(err) if err.is_cancellation() => Err(err),
        Err(err) => {
            tracing::debug!(error = %err, "guard failed, skipping action");
            Ok(())
        }
    })
}

/// Run `action` `n` times in a row, stopping at the first failure.
pub fn repeat(n: usize, action: Action) -> Action {
    Action::new(move |ctx| {
        for attempt in 0..n {
            action.run(ctx).map_err(|err| IthError::Action {
                name: "repeat".to_string(),
                step: Some(attempt + 1),
                source: Box::new(err),
            })?;
        }
        Ok(())
    })
}

/// Run `action`, then `cleanup` whatever the outcome.
///
/// The action's error takes precedence over the cleanup's.
pub fn ensure(action: Action, cleanup: Action) -> Action {
    Action::new(move |ctx| {
        let result = action.run(ctx);
        let cleaned = cleanup.run(ctx);
        result.and(cleaned)
    })
}

/// Retry `action` up to `n` times with no pause, logging each failure.
pub fn retry(n: usize, action: Action) -> Action {
    RetryPolicy::immediate().retry(n, action)
}

/// Retry `action` up to `n` times with no pause, without logging.
pub fn retry_silently(n: usize, action: Action) -> Action {
    RetryPolicy::immediate().retry_silently(n, action)
}

/// Retry policy sleeping `interval` between attempts.
pub fn with_interval(interval: Duration) -> RetryPolicy {
    RetryPolicy {
        interval,
        max_interval: interval,
        backoff: false,
    }
}

/// Retry policy doubling the pause from `initial` up to `max`, with jitter.
pub fn with_backoff(initial: Duration, max: Duration) -> RetryPolicy {
    RetryPolicy {
        interval: initial,
        max_interval: max.max(initial),
        backoff: true,
    }
}

/// Pause schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_interval: Duration,
    backoff: bool,
}

impl RetryPolicy {
    const fn immediate() -> Self {
        Self {
            interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff: false,
        }
    }

    /// Run `action` up to `n` times until it succeeds, logging failures.
    ///
    /// `n == 0` is treated as a single attempt. Cancellation is never retried.
    pub fn retry(self, n: usize, action: Action) -> Action {
        self.build(n, action, true)
    }

    /// Same as [`RetryPolicy::retry`] without logging intermediate failures.
    pub fn retry_silently(self, n: usize, action: Action) -> Action {
        self.build(n, action, false)
    }

    /// Pause before attempt `attempt + 1` (0-based `attempt`).
    pub fn delay(&self, attempt: usize) -> Duration {
        if !self.backoff {
            return self.interval;
        }
        let shift = u32::try_from(attempt).unwrap_or(u32::MAX).min(16);
        let base = self
            .interval
            .saturating_mul(1_u32 << shift)
            .min(self.max_interval);
        let half_ms = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        if half_ms == 0 {
            return base;
        }
        let jitter = rand::rng().random_range(0..=half_ms);
        Duration::from_millis(half_ms + jitter).min(self.max_interval)
    }

    fn build(self, n: usize, action: Action, verbose: bool) -> Action {
        let attempts = n.max(1);
        Action::new(move |ctx| {
            let mut attempt = 0;
            loop {
                let err = match action.run(ctx) {
                    Ok(()) => return Ok(()),
                    Err(err) => err,
                };
                if err.is_cancellation() {
                    return Err(err);
                }
                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
                if verbose {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %err,
                        "[ITH-RETRY] attempt failed, retrying"
                    );
                }
                let pause = self.delay(attempt - 1);
                if !pause.is_zero() {
                    ctx.sleep(pause)?;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>, fail_first: usize) -> Action {
        let counter = Arc::clone(counter);
        Action::new(move |_| {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            if seen < fail_first {
                Err(IthError::automation(format!("attempt {seen}")))
            } else {
                Ok(())
            }
        })
    }

    fn failing(msg: &'static str) -> Action {
        Action::new(move |_| Err(IthError::automation(msg)))
    }

    #[test]
    fn combine_runs_in_order_and_stops_at_first_failure() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let step = |tag: &'static str, ok: bool| {
            let log = Arc::clone(&log);
            Action::new(move |_| {
                log.lock().push(tag);
                if ok {
                    Ok(())
                } else {
                    Err(IthError::automation(tag))
                }
            })
        };
        let action = combine(
            "type and check",
            [step("a", true), step("b", false), step("c", true)],
        );
        let err = action.run(&Context::background()).unwrap_err();
        assert_eq!(*log.lock(), vec!["a", "b"]);
        let msg = err.to_string();
        assert!(msg.contains("type and check"), "{msg}");
        assert!(msg.contains("on step 2"), "{msg}");
        assert!(msg.contains('b'), "{msg}");
    }

    #[test]
    fn combine_does_not_start_on_cancelled_context() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = combine("x", [counting(&counter, 0)]).run(&ctx).unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retry_stops_on_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        retry(5, counting(&counter, 2))
            .run(&Context::background())
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_returns_last_error_when_exhausted() {
        let counter = Arc::new(AtomicUsize::new(0));
        let err = retry_silently(3, counting(&counter, 10))
            .run(&Context::background())
            .unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("attempt 2"));
    }

    #[test]
    fn retry_zero_means_one_attempt() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _ = retry(0, counting(&counter, 10)).run(&Context::background());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_never_retries_cancellation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = {
            let counter = Arc::clone(&counter);
            Action::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(IthError::action("wait", IthError::DeadlineExceeded))
            })
        };
        let err = retry(5, inner).run(&Context::background()).unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_retries_a_timed_out_poll() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = {
            let counter = Arc::clone(&counter);
            Action::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(IthError::PollTimeout {
                    timeout: Duration::from_millis(10),
                    last: Box::new(IthError::DeadlineExceeded),
                })
            })
        };
        let err = retry_silently(3, inner)
            .run(&Context::background())
            .unwrap_err();
        assert!(matches!(err, IthError::PollTimeout { .. }), "{err}");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn with_interval_sleeps_between_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let start = std::time::Instant::now();
        with_interval(Duration::from_millis(20))
            .retry(3, counting(&counter, 2))
            .run(&Context::background())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = with_backoff(Duration::from_millis(100), Duration::from_millis(400));
        for attempt in 0..10 {
            let delay = policy.delay(attempt);
            assert!(delay <= Duration::from_millis(400), "{delay:?}");
            assert!(delay >= Duration::from_millis(50), "{delay:?}");
        }
    }

    #[test]
    fn if_success_then_swallows_guard_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        if_success_then(failing("no dialog"), counting(&counter, 0))
            .run(&Context::background())
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        if_success_then(Action::noop(), counting(&counter, 0))
            .run(&Context::background())
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn if_success_then_propagates_action_failure() {
        let err = if_success_then(Action::noop(), failing("click"))
            .run(&Context::background())
            .unwrap_err();
        assert!(err.to_string().contains("click"));
    }

    #[test]
    fn named_wraps_error() {
        let err = named("hide keyboard", failing("gone"))
            .run(&Context::background())
            .unwrap_err();
        assert!(err.to_string().contains("failed to hide keyboard"));
    }

    #[test]
    fn repeat_runs_n_times() {
        let counter = Arc::new(AtomicUsize::new(0));
        repeat(4, counting(&counter, 0))
            .run(&Context::background())
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn ensure_runs_cleanup_after_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let err = ensure(failing("body"), counting(&counter, 0))
            .run(&Context::background())
            .unwrap_err();
        assert!(err.to_string().contains("body"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sleep_action_honours_cancellation() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = sleep(Duration::from_secs(5)).run(&ctx).unwrap_err();
        assert!(err.is_cancellation());
    }
}
