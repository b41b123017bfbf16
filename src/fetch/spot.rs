//! Spot order history: backward pagination per order type.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    CALL_RESERVE, FetchContext, LineResult, PageOutcome, boundary, collect_reports, to_orders,
};
use crate::auth::now_ms;
use crate::budget::{DeadlineExceeded, ExecutionBudget, Partial};
use crate::client::SpotQuery;
use crate::error::ApiError;
use crate::models::{MarketKind, Order, RawOrder, TpslType};
use crate::rate_limit::ApiCategory;
use crate::scheduler::BatchScheduler;

/// Spot is not attempted with less than this left.
const MIN_REMAINING: Duration = Duration::from_secs(10);
/// The `tpsl` order type is only queried with more than this left.
const TPSL_MIN_REMAINING: Duration = Duration::from_secs(15);
/// Checked before every page request.
const PAGE_MARGIN: Duration = Duration::from_secs(3);
/// Checked before every date chunk.
const CHUNK_MARGIN: Duration = Duration::from_secs(5);
/// Slack kept back when waiting on the order-type tasks.
const TYPE_WAIT_SLACK: Duration = Duration::from_secs(2);
/// Pages below this share of the limit end the loop.
const FULL_PAGE_RATIO: f64 = 0.8;
/// At most this many chunks after a range rejection.
const MAX_CHUNKS: i64 = 2;
const TPSL_PAGE_CAP: u32 = 10;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Circuit breaker key for one spot order type, e.g. `BTCUSDT_tpsl`.
pub(super) fn type_key(symbol: &str, kind: TpslType) -> String {
    format!("{symbol}_{}", kind.as_str())
}

pub(super) async fn fetch_spot(
    ctx: &FetchContext,
    symbol: &str,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    budget: &ExecutionBudget,
) -> Partial<LineResult> {
    if symbol.contains('_') {
        debug!(symbol, "contract symbol, no spot market");
        return Partial::complete(LineResult::default());
    }

    let (start, end) = match (start_ms, end_ms) {
        (None, None) => {
            let now = now_ms() as i64;
            let window = ctx.settings.default_window.as_millis() as i64;
            (Some(now - window), Some(now))
        }
        bounds => bounds,
    };

    if let Err(signal) = budget.check_margin(MIN_REMAINING, &format!("starting spot for {symbol}")) {
        info!(symbol, "not enough time left for spot");
        return Partial::interrupted(LineResult::default(), signal);
    }

    let max_pages = ctx.settings.spot_max_pages;
    let mut types = vec![(TpslType::Normal, max_pages)];
    if budget.has_more_than(TPSL_MIN_REMAINING) {
        types.push((TpslType::Tpsl, (max_pages / 2).min(TPSL_PAGE_CAP)));
    } else {
        info!(symbol, "skipping tpsl orders, budget low");
    }

    let scheduler = BatchScheduler::new(ctx.settings.max_concurrent_spot)
        .with_wait_slack(TYPE_WAIT_SLACK)
        .with_breaker(ctx.breaker.clone());
    let reports = scheduler
        .run(
            types,
            |(kind, _)| type_key(symbol, *kind),
            |(kind, pages)| fetch_type(ctx, symbol, kind, start, end, pages, budget),
            budget,
        )
        .await;
    collect_reports(reports)
}

/// One order type, with the date-chunk fallback and breaker bookkeeping.
async fn fetch_type(
    ctx: &FetchContext,
    symbol: &str,
    kind: TpslType,
    start: Option<i64>,
    end: Option<i64>,
    max_pages: u32,
    budget: &ExecutionBudget,
) -> Result<Partial<Vec<Order>>, ApiError> {
    let key = type_key(symbol, kind);
    if !ctx.breaker.can_execute(&key) {
        info!(key = %key, "circuit open, skipping order type");
        return Ok(Partial::complete(Vec::new()));
    }

    let result = match paginate(ctx, symbol, kind, start, end, max_pages, budget).await {
        Err(err) => match err.max_range_days() {
            Some(days) => {
                info!(key = %key, max_days = days, "range too wide, splitting into chunks");
                fetch_chunked(ctx, symbol, kind, start, end, days, max_pages, budget).await
            }
            None => Err(err),
        },
        ok => ok,
    };

    match &result {
        Ok(_) => ctx.breaker.record_success(&key),
        Err(err) => ctx.breaker.record_failure(&key, &err.message),
    }
    result
}

/// Splits `[start, end]` into at most two windows of `max_days`, newest
/// first. Without bounds a single window ending now is used.
fn plan_chunks(start: Option<i64>, end: Option<i64>, max_days: u32) -> Vec<(i64, i64)> {
    let span = i64::from(max_days.max(1)) * DAY_MS;
    let (Some(start), Some(end)) = (start, end) else {
        let end = end.unwrap_or_else(|| now_ms() as i64);
        return vec![(end - span, end)];
    };

    let count = ((end - start + span - 1) / span).clamp(1, MAX_CHUNKS);
    let mut chunks = Vec::with_capacity(count as usize);
    let mut chunk_end = end;
    for _ in 0..count {
        if chunk_end <= start {
            break;
        }
        let chunk_start = (chunk_end - span).max(start);
        chunks.push((chunk_start, chunk_end));
        chunk_end = chunk_start - 1;
    }
    chunks
}

#[allow(clippy::too_many_arguments)]
async fn fetch_chunked(
    ctx: &FetchContext,
    symbol: &str,
    kind: TpslType,
    start: Option<i64>,
    end: Option<i64>,
    max_days: u32,
    max_pages: u32,
    budget: &ExecutionBudget,
) -> Result<Partial<Vec<Order>>, ApiError> {
    let chunks = plan_chunks(start, end, max_days);
    let pages_per_chunk = (max_pages / chunks.len().max(1) as u32).max(1);
    let mut orders = Vec::new();

    for (index, (chunk_start, chunk_end)) in chunks.into_iter().enumerate() {
        let context = format!("spot chunk {index} for {}", type_key(symbol, kind));
        if let Err(signal) = budget.check_margin(CHUNK_MARGIN, &context) {
            boundary::sort_by_ctime_desc(&mut orders);
            return Ok(Partial::interrupted(orders, signal));
        }

        let part = paginate(
            ctx,
            symbol,
            kind,
            Some(chunk_start),
            Some(chunk_end),
            pages_per_chunk,
            budget,
        )
        .await?;
        orders.extend(part.value);
        if let Some(context) = part.interrupted {
            boundary::sort_by_ctime_desc(&mut orders);
            return Ok(Partial {
                value: orders,
                interrupted: Some(context),
            });
        }
    }

    boundary::sort_by_ctime_desc(&mut orders);
    Ok(Partial::complete(orders))
}

async fn paginate(
    ctx: &FetchContext,
    symbol: &str,
    kind: TpslType,
    start: Option<i64>,
    end: Option<i64>,
    max_pages: u32,
    budget: &ExecutionBudget,
) -> Result<Partial<Vec<Order>>, ApiError> {
    let mut pager = SpotPager::new(ctx, symbol, kind, start, end);

    while pager.pages < max_pages {
        match pager.next_page(budget).await {
            Err(signal) => {
                info!(key = %pager.key, pages = pager.pages, "deadline reached, returning partial");
                return Ok(Partial::interrupted(pager.finish(), signal));
            }
            Ok(PageOutcome::More) => {}
            Ok(PageOutcome::Done) => break,
            Ok(PageOutcome::RangeTooLarge { error, .. }) => return Err(error),
            Ok(PageOutcome::Fatal(error)) => {
                if pager.pages == 0 || pager.orders.is_empty() {
                    return Err(error);
                }
                warn!(key = %pager.key, pages = pager.pages, error = %error, "stopping after error");
                break;
            }
        }
    }

    debug!(key = %pager.key, pages = pager.pages, orders = pager.orders.len(), "spot pagination finished");
    Ok(Partial::complete(pager.finish()))
}

/// Cursor state for one backward walk over a spot window.
struct SpotPager<'a> {
    ctx: &'a FetchContext,
    symbol: &'a str,
    kind: MarketKind,
    tpsl: TpslType,
    key: String,
    market: String,
    start: Option<i64>,
    end: Option<i64>,
    cursor: Option<String>,
    limit: u32,
    pages: u32,
    orders: Vec<Order>,
}

impl<'a> SpotPager<'a> {
    fn new(
        ctx: &'a FetchContext,
        symbol: &'a str,
        tpsl: TpslType,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Self {
        let kind = MarketKind::Spot(tpsl);
        let market = kind.tag();
        let limit = ctx.sizer.propose_size(symbol, &market);
        Self {
            ctx,
            symbol,
            kind,
            tpsl,
            key: type_key(symbol, tpsl),
            market,
            start,
            end,
            cursor: None,
            limit,
            pages: 0,
            orders: Vec::new(),
        }
    }

    async fn next_page(&mut self, budget: &ExecutionBudget) -> Result<PageOutcome, DeadlineExceeded> {
        let context = format!("paging {} page {}", self.key, self.pages);
        budget.check_margin(PAGE_MARGIN, &context)?;
        let slot = self.ctx.limiter.acquire(ApiCategory::Spot, budget);
        budget.run_within(CALL_RESERVE, &context, slot).await??;

        let query = SpotQuery {
            symbol: self.symbol.to_string(),
            limit: self.limit,
            tpsl_type: self.tpsl.as_str(),
            start_ms: self.start,
            end_ms: self.end,
            id_less_than: self.cursor.clone(),
        };
        let started = Instant::now();
        let call = self.ctx.api.spot_history_orders(&query, budget);
        let raw = match budget.run_within(CALL_RESERVE, &context, call).await? {
            Ok(raw) => raw,
            Err(error) => {
                return Ok(match error.max_range_days() {
                    Some(max_days) => PageOutcome::RangeTooLarge { max_days, error },
                    None => PageOutcome::Fatal(error),
                });
            }
        };
        self.ctx
            .sizer
            .record(self.symbol, &self.market, started.elapsed(), raw.len(), self.limit);
        Ok(self.absorb(raw))
    }

    fn absorb(&mut self, raw: Vec<RawOrder>) -> PageOutcome {
        let page = to_orders(raw, &self.kind, self.symbol);
        let len = page.len();
        if len == 0 {
            return PageOutcome::Done;
        }

        let keep_going = self
            .ctx
            .predictor
            .should_continue(&self.key, self.pages, len, self.limit);
        let earliest = boundary::ctime_range(&page).map(|(lo, _)| lo);
        let min_id = boundary::min_order_id(&page);
        self.orders
            .extend(boundary::filter_window(page, self.start, self.end));
        if !keep_going {
            return PageOutcome::Done;
        }

        if let Some(earliest) = earliest {
            if self.start.is_some_and(|s| earliest < s) {
                debug!(key = %self.key, earliest, "crossed window start");
                return PageOutcome::Done;
            }
            let next_end = earliest - 1;
            if self.start.is_some_and(|s| next_end <= s) {
                return PageOutcome::Done;
            }
            self.end = Some(next_end);
        }
        if let Some(id) = min_id {
            self.cursor = Some(id.to_string());
        }

        self.pages += 1;
        self.limit = self.ctx.sizer.adjust_in_flight(self.limit, self.pages, len);
        if (len as f64) < f64::from(self.limit) * FULL_PAGE_RATIO {
            PageOutcome::Done
        } else {
            PageOutcome::More
        }
    }

    fn finish(&mut self) -> Vec<Order> {
        let mut orders = std::mem::take(&mut self.orders);
        boundary::sort_by_ctime_desc(&mut orders);
        orders
    }
}
