//! Cooperative wall-clock budget shared by every suspension point.
//!
//! An [`ExecutionBudget`] is created once per top-level invocation and
//! passed by reference into everything that loops or blocks. Nothing is
//! preempted: each loop calls [`ExecutionBudget::check`] (or compares
//! [`ExecutionBudget::remaining`] against its own safety margin) and, on
//! expiry, hands back what it has gathered wrapped in a [`Partial`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Control signal raised when the budget is spent.
///
/// Not an error category: callers turn it into a partial result instead of
/// failing the unit of work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution budget exhausted while {context}")]
pub struct DeadlineExceeded {
    /// Label of the operation that was interrupted.
    pub context: String,
}

/// Start instant plus maximum duration. Read-only after creation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudget {
    started: Instant,
    max: Duration,
}

impl ExecutionBudget {
    /// Starts the clock now.
    #[must_use]
    pub fn new(max: Duration) -> Self {
        Self {
            started: Instant::now(),
            max,
        }
    }

    /// Total duration the invocation was granted.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Instant at which nothing remains.
    pub fn deadline(&self) -> Instant {
        self.started + self.max
    }

    /// Time since the budget was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns `max(0, deadline - now)`.
    pub fn remaining(&self) -> Duration {
        self.max.saturating_sub(self.elapsed())
    }

    /// Returns `true` once no time is left.
    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Returns `true` if strictly more than `margin` remains.
    pub fn has_more_than(&self, margin: Duration) -> bool {
        self.remaining() > margin
    }

    /// Fails with [`DeadlineExceeded`] labelled `context` when nothing remains.
    pub fn check(&self, context: &str) -> Result<(), DeadlineExceeded> {
        if self.is_exhausted() {
            Err(DeadlineExceeded {
                context: context.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Like [`check`](Self::check) but treats anything at or below `margin`
    /// as already expired.
    pub fn check_margin(&self, margin: Duration, context: &str) -> Result<(), DeadlineExceeded> {
        if self.has_more_than(margin) {
            Ok(())
        } else {
            Err(DeadlineExceeded {
                context: context.to_string(),
            })
        }
    }

    /// Bounded wait for collecting a worker result: the remaining budget
    /// minus `slack`, or `None` if that leaves nothing.
    ///
    /// With a non-zero `slack` the returned duration is strictly less than
    /// [`remaining`](Self::remaining).
    pub fn wait_for(&self, slack: Duration) -> Option<Duration> {
        let wait = self.remaining().checked_sub(slack)?;
        (!wait.is_zero()).then_some(wait)
    }

    /// Runs `work` until it finishes or until only `reserve` of the budget
    /// is left, whichever comes first.
    ///
    /// The cutoff is absolute: with a `reserve` larger than the slack of
    /// every enclosing [`wait_for`](Self::wait_for), it fires before any of
    /// those waits can drop the caller.
    pub async fn run_within<F: Future>(
        &self,
        reserve: Duration,
        context: &str,
        work: F,
    ) -> Result<F::Output, DeadlineExceeded> {
        let cutoff = self
            .deadline()
            .checked_sub(reserve)
            .unwrap_or(self.started)
            .max(self.started);
        tokio::time::timeout_at(cutoff, work)
            .await
            .map_err(|_| DeadlineExceeded {
                context: context.to_string(),
            })
    }
}

/// Data gathered so far plus whether the producer ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial<T> {
    pub value: T,
    /// Label of the interrupted operation, if the deadline cut the work short.
    pub interrupted: Option<String>,
}

impl<T> Partial<T> {
    /// Wraps a value produced without interruption.
    pub fn complete(value: T) -> Self {
        Self {
            value,
            interrupted: None,
        }
    }

    /// Wraps whatever accumulated before `signal` was raised.
    pub fn interrupted(value: T, signal: DeadlineExceeded) -> Self {
        Self {
            value,
            interrupted: Some(signal.context),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    /// Transforms the carried value, keeping the completion flag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        Partial {
            value: f(self.value),
            interrupted: self.interrupted,
        }
    }
}
