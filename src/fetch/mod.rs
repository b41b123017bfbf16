//! Per-symbol retrieval across spot and futures sub-markets.
//!
//! [`FetchOrchestrator::fetch`] runs the spot and futures lines of work
//! concurrently. Each line fans out further (two spot order types, one task
//! per futures contract) through a [`BatchScheduler`]. Every loop checks the
//! [`ExecutionBudget`]; when it runs out the orchestrator returns what it
//! has gathered and marks the result partial instead of failing.

pub mod boundary;
mod futures;
mod spot;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::budget::{ExecutionBudget, Partial};
use crate::circuit_breaker::CircuitBreaker;
use crate::client::ExchangeApi;
use crate::error::{ApiError, ErrorCategory};
use crate::models::{FetchTask, MarketKind, Order, RawOrder};
use crate::page_sizer::AdaptivePageSizer;
use crate::pagination::PaginationPredictor;
use crate::rate_limit::RateLimiter;
use crate::scheduler::{BatchOutcome, BatchScheduler, TaskReport};

/// Slack kept back when waiting on the spot and futures lines.
const LINE_WAIT_SLACK: Duration = Duration::from_secs(1);
/// A request still in flight when only this much budget is left is cut
/// off. Kept above every wait slack below it so the paging loop, not an
/// outer timer, decides what happens to the orders it holds.
const CALL_RESERVE: Duration = Duration::from_millis(2500);

/// Result of one page request inside a pagination loop.
#[derive(Debug)]
pub enum PageOutcome {
    /// Another page is worth requesting.
    More,
    /// The loop is finished.
    Done,
    /// The exchange rejected the window as wider than `max_days`.
    RangeTooLarge { max_days: u32, error: ApiError },
    /// A non-recoverable error.
    Fatal(ApiError),
}

/// Pagination and fan-out limits.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Default: 25
    pub spot_max_pages: u32,
    /// Default: 25
    pub futures_max_pages: u32,
    /// Default: 1000
    pub futures_page_size: u32,
    /// Concurrent spot order-type queries. Default: 2
    pub max_concurrent_spot: usize,
    /// Concurrent futures contract queries. Default: 3
    pub max_concurrent_futures: usize,
    /// Contract suffixes appended to the base symbol for futures.
    pub futures_suffixes: Vec<String>,
    /// Spot window used when the task gives no bounds. Default: 30 days
    pub default_window: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            spot_max_pages: 25,
            futures_max_pages: 25,
            futures_page_size: 1000,
            max_concurrent_spot: 2,
            max_concurrent_futures: 3,
            futures_suffixes: ["UMCBL", "DMCBL", "CMCBL"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_window: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Shared collaborators for every fetch in one invocation.
pub struct FetchContext {
    pub api: Arc<dyn ExchangeApi>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub sizer: Arc<AdaptivePageSizer>,
    pub predictor: Arc<PaginationPredictor>,
    pub settings: FetchSettings,
}

impl FetchContext {
    /// Context with default limits and fresh per-invocation state.
    pub fn new(api: Arc<dyn ExchangeApi>) -> Self {
        Self {
            api,
            limiter: Arc::new(RateLimiter::default()),
            breaker: Arc::new(CircuitBreaker::default()),
            sizer: Arc::new(AdaptivePageSizer::default()),
            predictor: Arc::new(PaginationPredictor::default()),
            settings: FetchSettings::default(),
        }
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_sizer(mut self, sizer: Arc<AdaptivePageSizer>) -> Self {
        self.sizer = sizer;
        self
    }

    #[must_use]
    pub fn with_predictor(mut self, predictor: Arc<PaginationPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// A sub-task failure, keyed like its circuit breaker entry.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub key: String,
    pub error: ApiError,
}

/// Orders and failures gathered by one line of work.
#[derive(Debug, Default)]
pub struct LineResult {
    pub orders: Vec<Order>,
    pub failures: Vec<TaskFailure>,
}

/// Everything one symbol fetch produced.
#[derive(Debug)]
pub struct SymbolFetch {
    pub symbol: String,
    pub orders: Vec<Order>,
    pub failures: Vec<TaskFailure>,
    /// Label of the first operation cut short by the deadline.
    pub interrupted: Option<String>,
    /// The symbol's circuit was open, so nothing was requested.
    pub skipped: bool,
    pub elapsed: Duration,
}

impl SymbolFetch {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            orders: Vec::new(),
            failures: Vec::new(),
            interrupted: None,
            skipped: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.interrupted.is_some()
    }

    /// The failure worth reporting: the first one recorded.
    pub fn primary_failure(&self) -> Option<&TaskFailure> {
        self.failures.first()
    }
}

/// Drives one symbol's retrieval.
#[derive(Clone)]
pub struct FetchOrchestrator {
    ctx: Arc<FetchContext>,
}

impl FetchOrchestrator {
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &FetchContext {
        &self.ctx
    }

    /// Fetches every enabled sub-market for `task`.
    ///
    /// Never fails: upstream errors are collected in
    /// [`SymbolFetch::failures`] and a spent budget shows up as
    /// [`SymbolFetch::interrupted`]. The symbol's own circuit breaker entry
    /// is updated from the overall outcome.
    pub async fn fetch(&self, task: &FetchTask, budget: &ExecutionBudget) -> SymbolFetch {
        let ctx = self.ctx.as_ref();
        let symbol = task.symbol.trim();
        let started = Instant::now();
        let mut result = SymbolFetch::new(symbol);

        if !ctx.breaker.can_execute(symbol) {
            info!(symbol, "circuit open, skipping symbol");
            result.skipped = true;
            return result;
        }

        let Some(wait) = budget.wait_for(LINE_WAIT_SLACK) else {
            result.interrupted = Some(format!("starting fetch for {symbol}"));
            return result;
        };

        let spot = async {
            if !task.include_spot {
                return None;
            }
            let line = spot::fetch_spot(ctx, symbol, task.start_ms, task.end_ms, budget);
            Some(tokio::time::timeout(wait, line).await)
        };
        let futures = async {
            if !task.include_futures {
                return None;
            }
            let line = futures::fetch_futures(ctx, symbol, task.start_ms, task.end_ms, budget);
            Some(tokio::time::timeout(wait, line).await)
        };
        let (spot, futures) = tokio::join!(spot, futures);

        for (line, outcome) in [("spot", spot), ("futures", futures)] {
            match outcome {
                None => {}
                Some(Ok(partial)) => {
                    if let Some(context) = partial.interrupted {
                        result.interrupted.get_or_insert(context);
                    }
                    result.orders.extend(partial.value.orders);
                    result.failures.extend(partial.value.failures);
                }
                Some(Err(_)) => {
                    warn!(symbol, line, wait_ms = wait.as_millis() as u64, "line abandoned");
                    result
                        .interrupted
                        .get_or_insert(format!("{line} retrieval for {symbol}"));
                }
            }
        }

        if let Some(failure) = result.primary_failure()
            && result.orders.is_empty()
        {
            ctx.breaker.record_failure(symbol, &failure.error.message);
        } else if result.failures.is_empty() {
            ctx.breaker.record_success(symbol);
        }

        result.elapsed = started.elapsed();
        info!(
            symbol,
            orders = result.orders.len(),
            failures = result.failures.len(),
            partial = result.is_partial(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "symbol fetch finished"
        );
        result
    }
}

/// Parses raw exchange records, dropping (and logging) malformed ones.
fn to_orders(raw: Vec<RawOrder>, kind: &MarketKind, symbol: &str) -> Vec<Order> {
    raw.into_iter()
        .filter_map(|record| match Order::from_api(record, kind, symbol) {
            Ok(order) => Some(order),
            Err(err) => {
                warn!(symbol, market = %kind.tag(), error = %err, "dropping malformed order");
                None
            }
        })
        .collect()
}

/// Folds scheduler reports from one fan-out point into a line result.
fn collect_reports(reports: Vec<TaskReport<Partial<Vec<Order>>>>) -> Partial<LineResult> {
    let mut line = LineResult::default();
    let mut interrupted = None;

    for report in reports {
        match report.outcome {
            BatchOutcome::Completed(partial) => {
                if let Some(context) = partial.interrupted {
                    interrupted.get_or_insert(context);
                }
                line.orders.extend(partial.value);
            }
            BatchOutcome::Failed(error) => line.failures.push(TaskFailure {
                key: report.key,
                error,
            }),
            BatchOutcome::Abandoned { waited } => {
                let error = ApiError::new(
                    ErrorCategory::Timeout,
                    format!("{} abandoned after {:.1}s", report.key, waited.as_secs_f64()),
                );
                line.failures.push(TaskFailure {
                    key: report.key,
                    error,
                });
            }
            BatchOutcome::Skipped => {
                interrupted.get_or_insert(format!("scheduling {}", report.key));
            }
        }
    }

    Partial {
        value: line,
        interrupted,
    }
}
