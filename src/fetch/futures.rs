//! Futures order history: one cursor walk per contract variant.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{CALL_RESERVE, FetchContext, LineResult, collect_reports, to_orders};
use crate::auth::now_ms;
use crate::budget::{ExecutionBudget, Partial};
use crate::client::FuturesQuery;
use crate::error::{ApiError, CODE_SYMBOL_NOT_FOUND, ErrorCategory};
use crate::models::{MarketKind, Order};
use crate::rate_limit::ApiCategory;
use crate::scheduler::BatchScheduler;

const MIN_REMAINING: Duration = Duration::from_secs(10);
/// No new batch of variants starts with this or less left.
const BATCH_MIN_REMAINING: Duration = Duration::from_secs(5);
/// A variant task returns immediately with this or less left.
const VARIANT_MIN_REMAINING: Duration = Duration::from_secs(5);
const PAGE_MARGIN: Duration = Duration::from_secs(3);
const VARIANT_WAIT_SLACK: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_millis(200);
const MAX_ATTEMPTS: u32 = 10;

/// Contract variant not available for this account or product line.
const CODE_NOT_AVAILABLE: &str = "40309";
/// Business codes worth another attempt on the same cursor.
const RETRYABLE_CODES: [&str; 3] = ["40004", "40008", "40911"];

/// What to do after a failed futures page.
#[derive(Debug, PartialEq, Eq)]
enum ErrorAction {
    /// End the variant quietly with whatever was gathered.
    Stop,
    Retry,
    Fail,
}

fn classify(err: &ApiError) -> ErrorAction {
    if err.has_code(CODE_SYMBOL_NOT_FOUND)
        || err.has_code(CODE_NOT_AVAILABLE)
        || err.category == ErrorCategory::SymbolNotFound
    {
        ErrorAction::Stop
    } else if RETRYABLE_CODES.iter().any(|c| err.has_code(c)) || err.category.is_transient() {
        ErrorAction::Retry
    } else {
        ErrorAction::Fail
    }
}

/// Contract symbols to query: `BASE_SUFFIX` for every suffix, or the
/// symbol itself when it already names a contract.
pub(super) fn contract_variants(symbol: &str, suffixes: &[String]) -> Vec<String> {
    let base = symbol.to_uppercase();
    if base.contains('_') {
        return vec![base];
    }
    suffixes
        .iter()
        .map(|suffix| format!("{base}_{}", suffix.to_uppercase()))
        .collect()
}

pub(super) async fn fetch_futures(
    ctx: &FetchContext,
    symbol: &str,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    budget: &ExecutionBudget,
) -> Partial<LineResult> {
    if let Err(signal) = budget.check_margin(MIN_REMAINING, &format!("starting futures for {symbol}")) {
        info!(symbol, "not enough time left for futures");
        return Partial::interrupted(LineResult::default(), signal);
    }

    let start = start_ms.unwrap_or(0);
    let end = end_ms.unwrap_or_else(|| now_ms() as i64);

    let variants: Vec<String> = contract_variants(symbol, &ctx.settings.futures_suffixes)
        .into_iter()
        .filter(|variant| {
            let open = ctx.breaker.can_execute(variant);
            if !open {
                info!(variant = %variant, "circuit open, skipping contract");
            }
            open
        })
        .collect();
    if variants.is_empty() {
        return Partial::complete(LineResult::default());
    }

    let scheduler = BatchScheduler::new(ctx.settings.max_concurrent_futures)
        .with_min_remaining(BATCH_MIN_REMAINING)
        .with_wait_slack(VARIANT_WAIT_SLACK)
        .with_breaker(ctx.breaker.clone());
    let reports = scheduler
        .run(
            variants,
            String::clone,
            |variant| fetch_variant(ctx, symbol, variant, start, end, budget),
            budget,
        )
        .await;
    collect_reports(reports)
}

async fn fetch_variant(
    ctx: &FetchContext,
    symbol: &str,
    variant: String,
    start: i64,
    end: i64,
    budget: &ExecutionBudget,
) -> Result<Partial<Vec<Order>>, ApiError> {
    if !budget.has_more_than(VARIANT_MIN_REMAINING) {
        return Ok(Partial {
            value: Vec::new(),
            interrupted: Some(format!("starting {variant}")),
        });
    }

    let result = walk_variant(ctx, symbol, &variant, start, end, budget).await;
    match &result {
        Ok(_) => ctx.breaker.record_success(&variant),
        Err(err) => ctx.breaker.record_failure(&variant, &err.message),
    }
    result
}

async fn walk_variant(
    ctx: &FetchContext,
    symbol: &str,
    variant: &str,
    start: i64,
    end: i64,
    budget: &ExecutionBudget,
) -> Result<Partial<Vec<Order>>, ApiError> {
    let contract = variant
        .rsplit_once('_')
        .map_or(variant, |(_, suffix)| suffix)
        .to_string();
    let kind = MarketKind::Futures { contract };
    let mut orders = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    let mut attempts = 0;

    while pages < ctx.settings.futures_max_pages {
        let context = format!("paging {variant} page {pages}");
        if let Err(signal) = budget.check_margin(PAGE_MARGIN, &context) {
            return Ok(Partial::interrupted(orders, signal));
        }
        let slot = ctx.limiter.acquire(ApiCategory::Futures, budget);
        if let Err(signal) = budget
            .run_within(CALL_RESERVE, &context, slot)
            .await
            .and_then(|acquired| acquired)
        {
            return Ok(Partial::interrupted(orders, signal));
        }

        let query = FuturesQuery {
            symbol: variant.to_string(),
            start_ms: start,
            end_ms: end,
            page_size: ctx.settings.futures_page_size,
            last_end_id: cursor.clone(),
        };
        let call = ctx.api.futures_history_orders(&query, budget);
        let response = match budget.run_within(CALL_RESERVE, &context, call).await {
            Ok(response) => response,
            Err(signal) => {
                info!(variant, pages, "deadline reached, returning partial");
                return Ok(Partial::interrupted(orders, signal));
            }
        };
        let err = match response {
            Ok(page) => {
                attempts = 0;
                pages += 1;
                orders.extend(to_orders(page.orders, &kind, symbol));
                match (page.next_flag, page.end_id) {
                    (true, Some(end_id)) => {
                        cursor = Some(end_id);
                        continue;
                    }
                    _ => break,
                }
            }
            Err(err) => err,
        };

        match classify(&err) {
            ErrorAction::Stop => {
                debug!(variant, error = %err, "contract unavailable");
                break;
            }
            ErrorAction::Retry => {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(ApiError {
                        message: format!("max retry attempts reached for {variant}: {}", err.message),
                        ..err
                    });
                }
                if !budget.has_more_than(CALL_RESERVE + RETRY_DELAY) {
                    return Ok(Partial {
                        value: orders,
                        interrupted: Some(format!("retrying {variant}")),
                    });
                }
                debug!(variant, attempts, error = %err, "retrying futures page");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            ErrorAction::Fail if orders.is_empty() => return Err(err),
            ErrorAction::Fail => {
                warn!(variant, pages, error = %err, "stopping after error");
                break;
            }
        }
    }

    Ok(Partial::complete(orders))
}
