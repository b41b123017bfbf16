//! One end-to-end invocation: fetch every symbol, bound each envelope,
//! then reduce.
//!
//! All per-invocation state (rate-limit windows, breaker map, sizing and
//! pagination statistics) is created by the caller and owned by the
//! [`FetchContext`], so two `Sweep`s never share it by accident.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::Signer;
use crate::bounder::{BounderConfig, EnvelopeMeta, Payload, ResponseBounder};
use crate::budget::ExecutionBudget;
use crate::circuit_breaker::CircuitBreaker;
use crate::client::BitgetClient;
use crate::config::AppConfig;
use crate::error::{ApiError, ErrorCategory};
use crate::fetch::{FetchContext, FetchOrchestrator, SymbolFetch};
use crate::models::{AggregateResult, FetchEnvelope, FetchTask, Order, SymbolBlob};
use crate::page_sizer::AdaptivePageSizer;
use crate::pagination::PaginationPredictor;
use crate::rate_limit::RateLimiter;
use crate::reducer::{Reducer, ReducerConfig};
use crate::scheduler::{BatchOutcome, BatchScheduler};
use crate::storage::{BlobPointer, BlobStore, FsBlobStore};

/// Slack kept back when waiting on a symbol, for bounding and reducing.
const SYMBOL_WAIT_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Wall-clock budget for the whole invocation. Default: 50s
    pub max_execution: Duration,
    /// Symbols fetched concurrently. Default: 4
    pub max_concurrent_symbols: usize,
    /// Key prefix for per-symbol blobs. Default: `per-symbol/`
    pub results_prefix: String,
    pub bounder: BounderConfig,
    pub reducer: ReducerConfig,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_execution: Duration::from_secs(50),
            max_concurrent_symbols: 4,
            results_prefix: "per-symbol/".to_string(),
            bounder: BounderConfig::default(),
            reducer: ReducerConfig::default(),
        }
    }
}

/// Envelopes for every task plus the reducer summary.
#[derive(Debug)]
pub struct SweepReport {
    pub envelopes: Vec<FetchEnvelope>,
    pub summary: AggregateResult,
}

pub struct Sweep {
    orchestrator: FetchOrchestrator,
    store: Option<Arc<dyn BlobStore>>,
    bounder: ResponseBounder,
    reducer: Reducer,
    settings: SweepSettings,
}

impl Sweep {
    pub fn new(ctx: FetchContext, store: Option<Arc<dyn BlobStore>>, settings: SweepSettings) -> Self {
        Self {
            orchestrator: FetchOrchestrator::new(ctx),
            bounder: ResponseBounder::new(settings.bounder.clone()),
            reducer: Reducer::new(store.clone(), settings.reducer.clone()),
            store,
            settings,
        }
    }

    /// Wires the production client and a filesystem store from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`](crate::SweepError::Config) for blank
    /// credentials and [`SweepError::Http`](crate::SweepError::Http) if the
    /// HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> crate::Result<Self> {
        let signer = Signer::new(config.credentials)?;
        let client = BitgetClient::new(config.client, signer)?;
        let ctx = FetchContext::new(Arc::new(client))
            .with_limiter(Arc::new(RateLimiter::new(config.rate_limits)))
            .with_breaker(Arc::new(CircuitBreaker::new(config.breaker)))
            .with_sizer(Arc::new(AdaptivePageSizer::new(config.page_sizer)))
            .with_predictor(Arc::new(PaginationPredictor::new(config.smart_pagination)))
            .with_settings(config.fetch);

        let store = config.storage.results_dir.map(|dir| {
            info!(dir = %dir.display(), "storing results on disk");
            Arc::new(FsBlobStore::new(dir).with_public_base_url(config.storage.public_base_url))
                as Arc<dyn BlobStore>
        });
        Ok(Self::new(ctx, store, config.sweep))
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// Fetches, bounds and reduces every task within one execution budget.
    pub async fn run(&self, tasks: Vec<FetchTask>) -> SweepReport {
        let budget = ExecutionBudget::new(self.settings.max_execution);
        info!(
            symbols = tasks.len(),
            budget_secs = budget.max().as_secs_f64(),
            "sweep started"
        );

        let scheduler = BatchScheduler::new(self.settings.max_concurrent_symbols)
            .with_wait_slack(SYMBOL_WAIT_SLACK)
            .with_breaker(self.orchestrator.context().breaker.clone());
        let budget_ref = &budget;
        let reports = scheduler
            .run(
                tasks,
                |task| task.symbol.clone(),
                |task| async move { Ok::<_, ApiError>(self.fetch_symbol(&task, budget_ref).await) },
                &budget,
            )
            .await;

        let envelopes: Vec<FetchEnvelope> = reports
            .into_iter()
            .map(|report| match report.outcome {
                BatchOutcome::Completed(envelope) => envelope,
                BatchOutcome::Failed(err) => {
                    FetchEnvelope::failed(&report.key, err.category, err.describe(&report.key))
                }
                BatchOutcome::Abandoned { waited } => FetchEnvelope::failed(
                    &report.key,
                    ErrorCategory::Timeout,
                    format!(
                        "Request timeout for '{}': abandoned after {:.1}s",
                        report.key,
                        waited.as_secs_f64()
                    ),
                ),
                BatchOutcome::Skipped => FetchEnvelope {
                    partial: true,
                    recommendation: Some(
                        "Execution budget ran out before this symbol started; retry it separately"
                            .to_string(),
                    ),
                    ..FetchEnvelope::empty(&report.key)
                },
            })
            .collect();

        let summary = self.reducer.reduce_envelopes(envelopes.clone()).await;
        info!(
            symbols = envelopes.len(),
            total_orders = summary.total_orders,
            elapsed_ms = budget.elapsed().as_millis() as u64,
            "sweep finished"
        );
        SweepReport { envelopes, summary }
    }

    /// Fetches one symbol and returns its bounded envelope.
    pub async fn fetch_symbol(&self, task: &FetchTask, budget: &ExecutionBudget) -> FetchEnvelope {
        let fetch = self.orchestrator.fetch(task, budget).await;
        let meta = envelope_meta(&fetch);
        let SymbolFetch { symbol, orders, .. } = fetch;

        let payload = match &self.store {
            Some(store) if !orders.is_empty() => {
                let count = orders.len();
                match self.store_symbol(store.as_ref(), &symbol, orders).await {
                    Ok(pointer) => Payload::Stored { pointer, count },
                    Err(e) => Payload::StoreFailed {
                        count,
                        reason: e.to_string(),
                    },
                }
            }
            _ => Payload::Orders(orders),
        };
        self.bounder.bound(&symbol, payload, meta)
    }

    async fn store_symbol(
        &self,
        store: &dyn BlobStore,
        symbol: &str,
        orders: Vec<Order>,
    ) -> crate::Result<BlobPointer> {
        let now = Utc::now();
        let key = format!(
            "{}/{symbol}/{}.json",
            self.settings.results_prefix.trim_end_matches('/'),
            now.format("%Y%m%d-%H%M%S%.3f")
        );
        let blob = SymbolBlob {
            symbol: symbol.to_string(),
            count: orders.len(),
            orders,
            stored_at: Some(now.to_rfc3339()),
        };
        let bytes = serde_json::to_vec(&blob)?;
        let pointer = store.put(&key, bytes).await.inspect_err(|e| {
            warn!(symbol, key = %key, error = %e, "failed to store symbol blob");
        })?;
        info!(symbol, key = %pointer.key, count = blob.count, "stored symbol blob");
        Ok(pointer)
    }
}

/// Error and completion fields for a symbol's envelope. An error is only
/// reported when nothing was gathered.
fn envelope_meta(fetch: &SymbolFetch) -> EnvelopeMeta {
    let mut meta = EnvelopeMeta {
        partial: fetch.is_partial(),
        elapsed_seconds: (fetch.elapsed.as_millis() as f64) / 1000.0,
        ..EnvelopeMeta::default()
    };

    if fetch.skipped {
        meta.error = Some(format!(
            "Circuit open for '{}' after repeated failures, skipped",
            fetch.symbol
        ));
        meta.error_category = Some(ErrorCategory::Unknown);
    } else if fetch.orders.is_empty()
        && let Some(failure) = fetch.primary_failure()
    {
        meta.error = Some(failure.error.describe(&fetch.symbol));
        meta.error_category = Some(failure.error.category);
    }
    meta
}
