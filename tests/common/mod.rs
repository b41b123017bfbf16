//! Shared test utilities: a scripted in-process exchange.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use ordersweep::budget::ExecutionBudget;
use ordersweep::client::{ExchangeApi, FuturesPage, FuturesQuery, SpotQuery};
use ordersweep::error::ApiError;
use ordersweep::models::RawOrder;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

type SpotHandler = Box<dyn Fn(&SpotQuery, usize) -> Result<Vec<RawOrder>, ApiError> + Send + Sync>;
type FuturesHandler = Box<dyn Fn(&FuturesQuery, usize) -> Result<FuturesPage, ApiError> + Send + Sync>;

/// [`ExchangeApi`] whose answers come from closures.
///
/// Handlers receive the query plus how many earlier calls were made for
/// the same spot order type or futures contract. Every query is recorded.
pub struct FakeExchange {
    spot: SpotHandler,
    futures: FuturesHandler,
    latency: Duration,
    calls: AtomicUsize,
    spot_queries: Mutex<Vec<SpotQuery>>,
    futures_queries: Mutex<Vec<FuturesQuery>>,
}

impl FakeExchange {
    /// Every endpoint answers with an empty page.
    pub fn new() -> Self {
        Self {
            spot: Box::new(|_, _| Ok(Vec::new())),
            futures: Box::new(|_, _| Ok(FuturesPage::default())),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            spot_queries: Mutex::new(Vec::new()),
            futures_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn on_spot(
        mut self,
        f: impl Fn(&SpotQuery, usize) -> Result<Vec<RawOrder>, ApiError> + Send + Sync + 'static,
    ) -> Self {
        self.spot = Box::new(f);
        self
    }

    pub fn on_futures(
        mut self,
        f: impl Fn(&FuturesQuery, usize) -> Result<FuturesPage, ApiError> + Send + Sync + 'static,
    ) -> Self {
        self.futures = Box::new(f);
        self
    }

    /// Sleeps this long (tokio time) before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn spot_queries(&self) -> Vec<SpotQuery> {
        self.spot_queries.lock().unwrap().clone()
    }

    pub fn spot_queries_for(&self, tpsl_type: &str) -> Vec<SpotQuery> {
        self.spot_queries()
            .into_iter()
            .filter(|q| q.tpsl_type == tpsl_type)
            .collect()
    }

    pub fn futures_queries(&self) -> Vec<FuturesQuery> {
        self.futures_queries.lock().unwrap().clone()
    }

    pub fn futures_queries_for(&self, contract: &str) -> Vec<FuturesQuery> {
        self.futures_queries()
            .into_iter()
            .filter(|q| q.symbol == contract)
            .collect()
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn spot_history_orders(
        &self,
        query: &SpotQuery,
        _budget: &ExecutionBudget,
    ) -> Result<Vec<RawOrder>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut queries = self.spot_queries.lock().unwrap();
            let seen = queries.iter().filter(|q| q.tpsl_type == query.tpsl_type).count();
            queries.push(query.clone());
            seen
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.spot)(query, seen)
    }

    async fn futures_history_orders(
        &self,
        query: &FuturesQuery,
        _budget: &ExecutionBudget,
    ) -> Result<FuturesPage, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut queries = self.futures_queries.lock().unwrap();
            let seen = queries.iter().filter(|q| q.symbol == query.symbol).count();
            queries.push(query.clone());
            seen
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.futures)(query, seen)
    }
}

pub fn raw(value: Value) -> RawOrder {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// A spot record as the history endpoint returns it.
pub fn spot_order(id: u64, ctime: i64) -> RawOrder {
    raw(json!({
        "orderId": id.to_string(),
        "symbol": "BTCUSDT",
        "side": "buy",
        "price": "42000.5",
        "size": "0.01",
        "status": "filled",
        "orderType": "limit",
        "cTime": ctime.to_string(),
        "uTime": ctime.to_string()
    }))
}

/// A futures record as the history endpoint returns it.
pub fn futures_order(id: u64, ctime: i64) -> RawOrder {
    raw(json!({
        "orderId": id.to_string(),
        "symbol": "BTCUSDT_UMCBL",
        "side": "open_long",
        "size": "1",
        "state": "filled",
        "marginCoin": "USDT",
        "cTime": ctime.to_string()
    }))
}

/// `count` spot orders counting down from `newest_ctime` one millisecond
/// and one id apart, starting at `top_id`.
pub fn spot_page(top_id: u64, newest_ctime: i64, count: usize) -> Vec<RawOrder> {
    (0..count)
        .map(|i| spot_order(top_id - i as u64, newest_ctime - i as i64))
        .collect()
}
