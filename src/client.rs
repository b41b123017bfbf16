//! Signed HTTP transport for the Bitget order-history endpoints.
//!
//! [`ExchangeApi`] is the seam the fetch layer talks to; [`BitgetClient`]
//! is the production implementation. Transient failures (429, 5xx, read
//! timeouts, connection errors) are retried here with exponential backoff,
//! so callers only ever see the final outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::auth::{QueryParams, Signer, now_ms};
use crate::budget::ExecutionBudget;
use crate::error::{ApiError, ErrorCategory, truncate};
use crate::models::RawOrder;
use crate::Result;

pub const SPOT_HISTORY_PATH: &str = "/api/v2/spot/trade/history-orders";
pub const FUTURES_HISTORY_PATH: &str = "/api/mix/v1/order/history";

/// Bitget `code` values that mean success.
const SUCCESS_CODES: [&str; 2] = ["00000", "0"];

/// First retry delay; doubles on every further attempt.
const BASE_BACKOFF: Duration = Duration::from_millis(300);

/// Query for one page of spot order history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotQuery {
    pub symbol: String,
    pub limit: u32,
    /// `normal` or `tpsl`.
    pub tpsl_type: &'static str,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub id_less_than: Option<String>,
}

impl SpotQuery {
    pub fn params(&self) -> QueryParams {
        QueryParams::new()
            .with("symbol", &self.symbol)
            .with("limit", self.limit)
            .with("tpslType", self.tpsl_type)
            .with("receiveWindow", 5000)
            .with_opt("startTime", self.start_ms)
            .with_opt("endTime", self.end_ms)
            .with_opt("idLessThan", self.id_less_than.as_deref())
    }
}

/// Query for one page of futures order history on a single contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuturesQuery {
    /// Contract symbol including its suffix, e.g. `BTCUSDT_UMCBL`.
    pub symbol: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub page_size: u32,
    pub last_end_id: Option<String>,
}

impl FuturesQuery {
    pub fn params(&self) -> QueryParams {
        QueryParams::new()
            .with("symbol", &self.symbol)
            .with("startTime", self.start_ms)
            .with("endTime", self.end_ms)
            .with("pageSize", self.page_size)
            .with_opt("lastEndId", self.last_end_id.as_deref())
    }
}

/// One page of futures history plus its continuation cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuturesPage {
    pub orders: Vec<RawOrder>,
    pub next_flag: bool,
    pub end_id: Option<String>,
}

/// Exchange operations the fetch layer depends on.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Fetches one page of spot order history.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] once transport retries are exhausted or the
    /// exchange rejects the request.
    async fn spot_history_orders(
        &self,
        query: &SpotQuery,
        budget: &ExecutionBudget,
    ) -> std::result::Result<Vec<RawOrder>, ApiError>;

    /// Fetches one page of futures order history.
    ///
    /// # Errors
    ///
    /// Same as [`spot_history_orders`](Self::spot_history_orders); business
    /// codes such as `40034` are preserved in [`ApiError::code`].
    async fn futures_history_orders(
        &self,
        query: &FuturesQuery,
        budget: &ExecutionBudget,
    ) -> std::result::Result<FuturesPage, ApiError>;
}

/// Connection settings for [`BitgetClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.bitget.com".to_string(),
            timeout: Duration::from_secs(15),
            retries: 2,
        }
    }
}

/// Production [`ExchangeApi`] backed by `reqwest`.
#[derive(Debug)]
pub struct BitgetClient {
    http: reqwest::Client,
    signer: Signer,
    settings: ClientSettings,
}

impl BitgetClient {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Http`](crate::SweepError::Http) if the TLS
    /// backend cannot be initialised.
    pub fn new(settings: ClientSettings, signer: Signer) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            signer,
            settings,
        })
    }

    /// Sends a signed GET and returns the `data` member of the response.
    async fn get(
        &self,
        path: &str,
        query: &QueryParams,
        budget: &ExecutionBudget,
    ) -> std::result::Result<Value, ApiError> {
        let mut attempt = 0;
        loop {
            let err = match self.send_once(path, query, budget).await {
                Ok(data) => return Ok(data),
                Err(err) => err,
            };

            let backoff = BASE_BACKOFF * 2u32.saturating_pow(attempt);
            if !err.category.is_transient()
                || attempt >= self.settings.retries
                || budget.remaining() <= backoff
            {
                return Err(err);
            }

            attempt += 1;
            warn!(
                path,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn send_once(
        &self,
        path: &str,
        query: &QueryParams,
        budget: &ExecutionBudget,
    ) -> std::result::Result<Value, ApiError> {
        let qs = query.canonical();
        let headers = self
            .signer
            .sign("GET", path, query, "", now_ms())
            .map_err(|e| ApiError::new(ErrorCategory::AuthError, e.to_string()))?;

        let mut url = format!("{}{path}", self.settings.base_url.trim_end_matches('/'));
        if !qs.is_empty() {
            url.push('?');
            url.push_str(&qs);
        }

        let timeout = self.settings.timeout.min(budget.remaining());
        let mut request = self.http.get(&url).timeout(timeout);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        debug!(path, query = %qs, "sending request");
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let (code, msg) = body
                .as_ref()
                .and_then(Value::as_object)
                .map(envelope_fields)
                .unwrap_or_default();
            let message = msg.unwrap_or_else(|| truncate(&text, 500).to_string());
            return Err(ApiError::from_status(status.as_u16(), code, message));
        }

        let Some(Value::Object(mut body)) = body else {
            return Err(ApiError::new(
                ErrorCategory::ApiError,
                format!("invalid JSON from {path}: {}", truncate(&text, 200)),
            ));
        };

        let (code, msg) = envelope_fields(&body);
        if let Some(code) = code
            && !SUCCESS_CODES.contains(&code.as_str())
        {
            return Err(ApiError::from_code(
                code,
                msg.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(body.remove("data").unwrap_or(Value::Null))
    }
}

/// Extracts `code` and `msg` from a Bitget response body.
fn envelope_fields(body: &Map<String, Value>) -> (Option<String>, Option<String>) {
    let code = match body.get("code") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let msg = body
        .get("msg")
        .and_then(Value::as_str)
        .map(str::to_string);
    (code, msg)
}

fn transport_error(err: reqwest::Error) -> ApiError {
    let category = if err.is_timeout() {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::NetworkError
    };
    ApiError::new(category, err.to_string())
}

fn objects(items: Vec<Value>) -> Vec<RawOrder> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ExchangeApi for BitgetClient {
    async fn spot_history_orders(
        &self,
        query: &SpotQuery,
        budget: &ExecutionBudget,
    ) -> std::result::Result<Vec<RawOrder>, ApiError> {
        match self.get(SPOT_HISTORY_PATH, &query.params(), budget).await? {
            Value::Array(items) => Ok(objects(items)),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError::new(
                ErrorCategory::ApiError,
                format!("unexpected spot history payload: {}", truncate(&other.to_string(), 200)),
            )),
        }
    }

    async fn futures_history_orders(
        &self,
        query: &FuturesQuery,
        budget: &ExecutionBudget,
    ) -> std::result::Result<FuturesPage, ApiError> {
        let data = self.get(FUTURES_HISTORY_PATH, &query.params(), budget).await?;
        Ok(parse_futures_page(data))
    }
}

/// Reads `orderList`, `nextFlag` and `endId` from a futures `data` member.
pub fn parse_futures_page(data: Value) -> FuturesPage {
    let Value::Object(mut data) = data else {
        return FuturesPage::default();
    };
    let orders = match data.remove("orderList") {
        Some(Value::Array(items)) => objects(items),
        _ => Vec::new(),
    };
    let next_flag = data
        .get("nextFlag")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let end_id = match data.remove("endId") {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    FuturesPage {
        orders,
        next_flag,
        end_id,
    }
}
