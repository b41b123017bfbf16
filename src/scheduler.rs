//! Bounded fan-out over a list of independent tasks.
//!
//! Items are split into batches of at most `concurrency`. Batches run one
//! after another; the tasks inside a batch run concurrently, each bounded by
//! a wait derived from the remaining execution budget. A task that overruns
//! its wait is dropped and reported as abandoned without holding up the
//! rest of its batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::budget::ExecutionBudget;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::ApiError;

/// What happened to one scheduled task.
#[derive(Debug)]
pub enum BatchOutcome<T> {
    Completed(T),
    Failed(ApiError),
    /// The task did not finish within its bounded wait and was dropped.
    Abandoned { waited: Duration },
    /// Never started because the budget was too low when its batch came up.
    Skipped,
}

/// Outcome of one task, labelled with its key.
#[derive(Debug)]
pub struct TaskReport<T> {
    pub key: String,
    pub outcome: BatchOutcome<T>,
}

/// Batched worker pool bound to one fan-out point.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    concurrency: usize,
    wait_slack: Duration,
    min_remaining: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl BatchScheduler {
    /// `concurrency` is clamped to at least 1.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            wait_slack: Duration::from_secs(2),
            min_remaining: Duration::ZERO,
            breaker: None,
        }
    }

    /// Time kept back from every wait for assembling results. Default: 2s
    #[must_use]
    pub fn with_wait_slack(mut self, slack: Duration) -> Self {
        self.wait_slack = slack;
        self
    }

    /// Batches are not started once the budget is at or below this.
    #[must_use]
    pub fn with_min_remaining(mut self, margin: Duration) -> Self {
        self.min_remaining = margin;
        self
    }

    /// Records a failure on the task's key whenever a task is abandoned.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `work` over every item and returns one report per item, in
    /// input order.
    pub async fn run<I, T, K, F, Fut>(
        &self,
        items: Vec<I>,
        key_of: K,
        work: F,
        budget: &ExecutionBudget,
    ) -> Vec<TaskReport<T>>
    where
        K: Fn(&I) -> String,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut reports = Vec::with_capacity(items.len());
        let mut pending = items.into_iter().peekable();
        let mut batch_index = 0usize;

        while pending.peek().is_some() {
            let batch: Vec<I> = pending.by_ref().take(self.concurrency).collect();

            let wait = if budget.has_more_than(self.min_remaining) {
                budget.wait_for(self.wait_slack)
            } else {
                None
            };
            let Some(wait) = wait else {
                let skipped = batch.len() + pending.len();
                warn!(
                    batch = batch_index,
                    skipped,
                    remaining_ms = budget.remaining().as_millis() as u64,
                    "budget too low, skipping remaining batches"
                );
                let rest: Vec<I> = pending.by_ref().collect();
                for item in batch.iter().chain(rest.iter()) {
                    reports.push(TaskReport {
                        key: key_of(item),
                        outcome: BatchOutcome::Skipped,
                    });
                }
                break;
            };

            debug!(
                batch = batch_index,
                size = batch.len(),
                wait_ms = wait.as_millis() as u64,
                "running batch"
            );
            let keys: Vec<String> = batch.iter().map(|item| key_of(item)).collect();
            let results = join_all(
                batch
                    .into_iter()
                    .map(|item| tokio::time::timeout(wait, work(item))),
            )
            .await;

            for (key, result) in keys.into_iter().zip(results) {
                let outcome = match result {
                    Ok(Ok(value)) => BatchOutcome::Completed(value),
                    Ok(Err(err)) => {
                        warn!(key = %key, error = %err, "task failed");
                        BatchOutcome::Failed(err)
                    }
                    Err(_) => {
                        warn!(key = %key, wait_ms = wait.as_millis() as u64, "task abandoned");
                        if let Some(breaker) = &self.breaker {
                            breaker.record_failure(&key, "abandoned after bounded wait");
                        }
                        BatchOutcome::Abandoned { waited: wait }
                    }
                };
                reports.push(TaskReport { key, outcome });
            }
            batch_index += 1;
        }

        reports
    }
}
