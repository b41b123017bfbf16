//! Unit of work submitted to the scheduler.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Values below this are taken to be epoch seconds (~year 2286 in ms).
const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Normalizes an epoch timestamp given in seconds or milliseconds to
/// milliseconds.
pub fn coerce_ms(value: i64) -> i64 {
    if value < SECONDS_THRESHOLD {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// One symbol to fetch, with an optional window and market selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTask {
    #[serde(alias = "Symbol")]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient_ms")]
    pub start_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_ms")]
    pub end_ms: Option<i64>,
    #[serde(default = "enabled", rename = "includeSpot")]
    pub include_spot: bool,
    #[serde(default = "enabled", rename = "includeFutures")]
    pub include_futures: bool,
}

fn enabled() -> bool {
    true
}

/// Accepts an integer or numeric string in seconds or milliseconds.
/// Anything unparseable is treated as absent.
fn lenient_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let raw = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(raw.map(coerce_ms))
}

impl FetchTask {
    /// Spot and futures, no explicit window.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            start_ms: None,
            end_ms: None,
            include_spot: true,
            include_futures: true,
        }
    }

    /// Sets the window; both bounds go through [`coerce_ms`].
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_ms = start.map(coerce_ms);
        self.end_ms = end.map(coerce_ms);
        self
    }

    #[must_use]
    pub fn with_spot(mut self, include: bool) -> Self {
        self.include_spot = include;
        self
    }

    #[must_use]
    pub fn with_futures(mut self, include: bool) -> Self {
        self.include_futures = include;
        self
    }
}
