//! Bounded polling: evaluate a predicate at a fixed interval until it holds.

use std::time::{Duration, Instant};

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};

/// Interval used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout used when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Polling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Wrap `err` so that [`poll`] stops immediately and returns it.
pub fn poll_break(err: IthError) -> IthError {
    IthError::PollBreak {
        source: Box::new(err),
    }
}

/// Evaluate `predicate` until it succeeds or `opts.timeout` elapses.
///
/// A zero timeout evaluates the predicate once and returns its own result.
/// On timeout the last predicate error is wrapped in
/// [`IthError::PollTimeout`]. Cancellation of `ctx` ends polling with the
/// cancellation error.
pub fn poll<F>(ctx: &Context, mut predicate: F, opts: &PollOptions) -> Result<()>
where
    F: FnMut(&Context) -> Result<()>,
{
    if opts.timeout.is_zero() {
        return match predicate(ctx) {
            Err(IthError::PollBreak { source }) => Err(*source),
            other => other,
        };
    }

    let deadline = Instant::now() + opts.timeout;
    let poll_ctx = ctx.with_deadline(deadline);
    let interval = if opts.interval.is_zero() {
        DEFAULT_INTERVAL
    } else {
        opts.interval
    };
    let mut last: Option<IthError> = None;

    loop {
        ctx.err()?;
        match predicate(&poll_ctx) {
            Ok(()) => return Ok(()),
            Err(IthError::PollBreak { source }) => return Err(*source),
            Err(err) if err.is_cancellation() => {
                ctx.err()?;
                if last.is_none() {
                    last = Some(err);
                }
                break;
            }
            Err(err) => last = Some(err),
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        ctx.sleep(interval.min(deadline - now))?;
    }

    Err(IthError::PollTimeout {
        timeout: opts.timeout,
        last: Box::new(last.unwrap_or(IthError::DeadlineExceeded)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_on_first_success() {
        let mut calls = 0;
        poll(
            &Context::background(),
            |_| {
                calls += 1;
                if calls < 3 {
                    Err(IthError::automation("not yet"))
                } else {
                    Ok(())
                }
            },
            &PollOptions::with_timeout(Duration::from_secs(5)).interval(Duration::from_millis(5)),
        )
        .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_timeout_returns_predicate_result_once() {
        let mut calls = 0;
        let err = poll(
            &Context::background(),
            |_| {
                calls += 1;
                Err(IthError::automation("current state"))
            },
            &PollOptions::with_timeout(Duration::ZERO),
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, IthError::Automation { .. }));
    }

    #[test]
    fn timeout_wraps_last_error() {
        let start = Instant::now();
        let mut calls = 0;
        let err = poll(
            &Context::background(),
            |_| {
                calls += 1;
                Err(IthError::automation(format!("attempt {calls}")))
            },
            &PollOptions::with_timeout(Duration::from_millis(60)).interval(Duration::from_millis(10)),
        )
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(2));
        match err {
            IthError::PollTimeout { last, timeout } => {
                assert_eq!(timeout, Duration::from_millis(60));
                assert!(last.to_string().contains(&format!("attempt {calls}")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn poll_break_stops_immediately() {
        let mut calls = 0;
        let err = poll(
            &Context::background(),
            |_| {
                calls += 1;
                Err(poll_break(IthError::automation("fatal")))
            },
            &PollOptions::with_timeout(Duration::from_secs(5)),
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, IthError::Automation { .. }));
    }

    #[test]
    fn parent_cancellation_ends_poll() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = poll(
            &ctx,
            |_| Err(IthError::automation("never")),
            &PollOptions::with_timeout(Duration::from_secs(5)),
        )
        .unwrap_err();
        assert!(matches!(err, IthError::Cancelled));
    }

    #[test]
    fn parent_deadline_shorter_than_timeout_is_honoured() {
        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let start = Instant::now();
        let err = poll(
            &ctx,
            |_| Err(IthError::automation("never")),
            &PollOptions::with_timeout(Duration::from_secs(10)),
        )
        .unwrap_err();
        assert!(err.is_cancellation());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn own_timeout_cutting_an_attempt_short_is_not_cancellation() {
        let err = poll(
            &Context::background(),
            |poll_ctx| {
                poll_ctx.sleep(Duration::from_secs(5))?;
                Err(IthError::automation("unreachable"))
            },
            &PollOptions::with_timeout(Duration::from_millis(40)),
        )
        .unwrap_err();
        assert!(matches!(err, IthError::PollTimeout { .. }), "{err}");
        assert!(!err.is_cancellation());
        assert!(err.is_retryable());
    }
}
