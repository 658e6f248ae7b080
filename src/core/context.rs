//! Execution context: deadline, cancellation, and cleanup-budget shortening.
//!
//! A [`Context`] is passed by reference to every action. It carries an
//! optional deadline and the cancellation signals of itself and all of its
//! ancestors. A signal is a crossbeam channel whose sender lives in a
//! [`CancelHandle`]; cancelling (or dropping the handle) disconnects the
//! channel, which wakes every suspended [`Context::sleep`] immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{IthError, Result};

/// Deadline- and cancellation-aware execution context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signals: Arc<Vec<Receiver<()>>>,
}

/// Cancels the context it was created with. Dropping the handle cancels too,
/// so bind it to a named variable (`_cancel`, not `_`) for the scope it guards.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancel the associated context and all contexts derived from it.
    pub fn cancel(&self) {
        self.tx.lock().take();
    }

    /// Whether `cancel` has already been called.
    pub fn is_cancelled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Context {
    /// Root context with neither deadline nor cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context whose deadline is the earlier of `deadline` and the parent's.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            signals: Arc::clone(&self.signals),
        }
    }

    /// Child context that can be cancelled independently of its parent.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = bounded::<()>(0);
        let mut signals = Vec::with_capacity(self.signals.len() + 1);
        signals.extend(self.signals.iter().cloned());
        signals.push(rx);
        let child = Self {
            deadline: self.deadline,
            signals: Arc::new(signals),
        };
        (
            child,
            CancelHandle {
                tx: Mutex::new(Some(tx)),
            },
        )
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `Ok` while the context is live; the cancellation error otherwise.
    pub fn err(&self) -> Result<()> {
        for rx in self.signals.iter() {
            if let Err(TryRecvError::Disconnected) = rx.try_recv() {
                return Err(IthError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(IthError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Suspend for `d`, failing early if the context is cancelled or its
    /// deadline arrives first.
    pub fn sleep(&self, d: Duration) -> Result<()> {
        self.err()?;
        let now = Instant::now();
        let wake = now + d;
        let (until, hits_deadline) = match self.deadline {
            Some(deadline) if deadline < wake => (deadline, true),
            _ => (wake, false),
        };

        if self.signals.is_empty() {
            std::thread::sleep(until.saturating_duration_since(now));
        } else {
            let mut sel = Select::new();
            for rx in self.signals.iter() {
                sel.recv(rx);
            }
            if let Ok(oper) = sel.select_deadline(until) {
                let index = oper.index();
                let _ = oper.recv(&self.signals[index]);
                return Err(IthError::Cancelled);
            }
        }

        if hits_deadline {
            return Err(IthError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Derive a child context that ends `budget` before the parent's deadline,
/// reserving that time for cleanup run on the parent.
///
/// A parent without a deadline yields a child without a deadline.
pub fn shorten(ctx: &Context, budget: Duration) -> (Context, CancelHandle) {
    let (mut child, cancel) = ctx.with_cancel();
    if let Some(deadline) = ctx.deadline {
        child.deadline = Some(deadline.checked_sub(budget).unwrap_or_else(Instant::now));
    }
    (child, cancel)
}
