//! Merges per-symbol envelopes into one sorted dataset plus a summary.
//!
//! One bad entry never aborts the merge: unreadable blobs, malformed items
//! and upstream failures all end up as categorized entries in the summary.
//! The merged artifact (summary plus every order) goes to the blob store
//! under a time-bucketed key; the returned [`AggregateResult`] only points
//! at it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ErrorCategory;
use crate::models::{
    AggregateResult, CleanupReport, ErrorDetail, ErrorExample, FetchEnvelope, Order, SymbolBlob,
    Timing,
};
use crate::storage::BlobStore;

#[derive(Debug, Clone)]
pub struct ReducerConfig {
    /// Key prefix for merged artifacts. Default: `bitget-results/`
    pub aggregate_prefix: String,
    /// Examples kept per error category. Default: 5
    pub max_error_examples: usize,
    /// Delete per-symbol blobs once the merged artifact is written.
    pub cleanup_symbol_blobs: bool,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            aggregate_prefix: "bitget-results/".to_string(),
            max_error_examples: 5,
            cleanup_symbol_blobs: false,
        }
    }
}

impl ReducerConfig {
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_symbol_blobs = cleanup;
        self
    }
}

/// Orders as found on one input item.
enum InlineOrders {
    Absent,
    Parsed(Vec<Order>),
    Invalid(String),
}

/// The parts of an input item the merge looks at.
struct Item {
    symbol: Option<String>,
    count: usize,
    error: Option<String>,
    category: Option<ErrorCategory>,
    blob_key: Option<String>,
    orders: InlineOrders,
}

impl Item {
    fn from_envelope(envelope: FetchEnvelope) -> Self {
        Self {
            symbol: Some(envelope.symbol),
            count: envelope.count,
            error: envelope.error,
            category: envelope.error_category,
            blob_key: envelope.blob_key,
            orders: envelope
                .orders
                .map_or(InlineOrders::Absent, InlineOrders::Parsed),
        }
    }

    /// Reads an item field by field so one bad member does not hide the rest.
    fn from_map(mut map: Map<String, Value>) -> Self {
        let text = |value: Option<&Value>| {
            value
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let orders = match map.remove("orders") {
            None | Some(Value::Null) => InlineOrders::Absent,
            Some(Value::Array(items)) => items
                .into_iter()
                .map(Order::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map_or_else(
                    |e| InlineOrders::Invalid(format!("Invalid order in results: {e}")),
                    InlineOrders::Parsed,
                ),
            Some(_) => InlineOrders::Invalid("Invalid orders field: expected a list".to_string()),
        };
        Self {
            symbol: text(map.get("symbol")),
            count: map.get("count").and_then(Value::as_u64).unwrap_or(0) as usize,
            error: text(map.get("error")),
            category: map
                .get("error_category")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            blob_key: text(map.get("blob_key")).or_else(|| text(map.get("s3_key"))),
            orders,
        }
    }
}

/// Errors gathered during one merge.
#[derive(Default)]
struct ErrorLog {
    entries: Vec<(ErrorCategory, ErrorExample)>,
}

impl ErrorLog {
    fn push(&mut self, category: ErrorCategory, symbol: Option<&str>, message: impl Into<String>) {
        let example = ErrorExample {
            symbol: symbol.map(str::to_string),
            message: message.into(),
        };
        debug!(category = %category, symbol = ?example.symbol, message = %example.message, "recorded error");
        self.entries.push((category, example));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn summarize(
        &self,
        max_examples: usize,
    ) -> (BTreeMap<ErrorCategory, usize>, BTreeMap<ErrorCategory, ErrorDetail>) {
        let mut summary = BTreeMap::new();
        let mut details: BTreeMap<ErrorCategory, ErrorDetail> = BTreeMap::new();
        for (category, example) in &self.entries {
            *summary.entry(*category).or_insert(0) += 1;
            let detail = details.entry(*category).or_default();
            detail.count += 1;
            if detail.examples.len() < max_examples {
                detail.examples.push(example.clone());
            }
        }
        (summary, details)
    }
}

/// Layout of the merged artifact.
#[derive(Serialize)]
struct MergedArtifact<'a> {
    summary: &'a AggregateResult,
    orders: &'a [Order],
}

/// Aggregation stage. Stateless apart from its configuration.
pub struct Reducer {
    store: Option<Arc<dyn BlobStore>>,
    config: ReducerConfig,
}

impl Reducer {
    pub fn new(store: Option<Arc<dyn BlobStore>>, config: ReducerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    /// Merges raw task outputs. Items that are not JSON objects are counted
    /// as errors.
    pub async fn reduce(&self, items: Vec<Value>) -> AggregateResult {
        let mut errors = ErrorLog::default();
        let mut parsed = Vec::with_capacity(items.len());
        let mut invalid = 0;
        for item in items {
            match item {
                Value::Object(map) => parsed.push(Item::from_map(map)),
                other => {
                    invalid += 1;
                    errors.push(
                        ErrorCategory::Unknown,
                        None,
                        format!("Invalid result item: expected an object, got {other}"),
                    );
                }
            }
        }
        self.merge(parsed, invalid, errors).await
    }

    /// Merges typed envelopes.
    pub async fn reduce_envelopes(&self, envelopes: Vec<FetchEnvelope>) -> AggregateResult {
        let items = envelopes.into_iter().map(Item::from_envelope).collect();
        self.merge(items, 0, ErrorLog::default()).await
    }

    async fn merge(&self, items: Vec<Item>, invalid: usize, mut errors: ErrorLog) -> AggregateResult {
        let started: DateTime<Utc> = Utc::now();
        let processed = items.len() + invalid;
        let mut with_data = 0;
        let mut consulted = Vec::new();
        let mut orders: Vec<Order> = Vec::new();

        for item in items {
            let symbol = item.symbol.as_deref();
            if let Some(error) = &item.error {
                let category = item
                    .category
                    .unwrap_or_else(|| ErrorCategory::from_message(error));
                errors.push(category, symbol, error.clone());
            }

            let mut unreadable = false;
            let found = if let Some(key) = &item.blob_key {
                match self.load_blob(key).await {
                    Ok(loaded) => {
                        consulted.push(key.clone());
                        Some(loaded)
                    }
                    Err(message) => {
                        errors.push(ErrorCategory::StorageError, symbol, message);
                        unreadable = true;
                        None
                    }
                }
            } else {
                match item.orders {
                    InlineOrders::Parsed(list) => Some(list),
                    InlineOrders::Invalid(message) => {
                        errors.push(ErrorCategory::Unknown, symbol, message);
                        unreadable = true;
                        None
                    }
                    InlineOrders::Absent => None,
                }
            };

            match found {
                Some(mut list) if !list.is_empty() => {
                    with_data += 1;
                    if let Some(symbol) = symbol {
                        for order in list.iter_mut().filter(|o| o.source_symbol.is_none()) {
                            order.source_symbol = Some(symbol.to_string());
                        }
                    }
                    orders.append(&mut list);
                }
                Some(_) => {}
                None if !unreadable && item.count > 0 && item.error.is_none() => {
                    errors.push(ErrorCategory::Unknown, symbol, "No orders data available");
                }
                None => {}
            }
        }

        orders.sort_by_key(|o| std::cmp::Reverse(o.sort_timestamp()));

        let mut result = self.summary(&orders, processed, with_data, &errors, started);
        if let Some(store) = &self.store {
            let key = merged_key(&self.config.aggregate_prefix, started);
            let artifact = MergedArtifact {
                summary: &result,
                orders: &orders,
            };
            let written = match serde_json::to_vec(&artifact) {
                Ok(bytes) => store.put(&key, bytes).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match written {
                Ok(pointer) => {
                    info!(key = %pointer.key, orders = orders.len(), "merged results written");
                    let cleanup = if self.config.cleanup_symbol_blobs && !consulted.is_empty() {
                        Some(cleanup(store.as_ref(), &consulted).await)
                    } else {
                        None
                    };
                    result = self.summary(&orders, processed, with_data, &errors, started);
                    result.blob_key = Some(pointer.key);
                    result.blob_uri = Some(pointer.uri);
                    result.public_url = pointer.public_url;
                    result.cleanup = cleanup;
                }
                Err(message) => {
                    warn!(key = %key, error = %message, "failed to write merged results");
                    errors.push(
                        ErrorCategory::StorageError,
                        None,
                        format!("Failed to store merged results: {message}"),
                    );
                    result = self.summary(&orders, processed, with_data, &errors, started);
                }
            }
        }

        info!(
            total_orders = result.total_orders,
            symbols = result.symbols_processed,
            with_data = result.symbols_with_data,
            errors = result.error_count,
            "aggregation finished"
        );
        result
    }

    async fn load_blob(&self, key: &str) -> Result<Vec<Order>, String> {
        let Some(store) = &self.store else {
            return Err(format!("No blob store configured to read {key}"));
        };
        let bytes = store
            .get(key)
            .await
            .map_err(|e| format!("Failed to read blob {key}: {e}"))?;
        let blob: SymbolBlob = serde_json::from_slice(&bytes)
            .map_err(|e| format!("Failed to parse blob {key}: {e}"))?;
        debug!(key, orders = blob.orders.len(), "loaded symbol blob");
        Ok(blob.orders)
    }

    fn summary(
        &self,
        orders: &[Order],
        processed: usize,
        with_data: usize,
        errors: &ErrorLog,
        started: DateTime<Utc>,
    ) -> AggregateResult {
        let finished = Utc::now();
        let (error_summary, error_details) = errors.summarize(self.config.max_error_examples);
        let millis = (finished - started).num_milliseconds().max(0);
        AggregateResult {
            total_orders: orders.len(),
            symbols_processed: processed,
            symbols_with_data: with_data,
            error_count: errors.len(),
            error_summary,
            error_details,
            processing_timestamp: finished.to_rfc3339(),
            duration_seconds: millis as f64 / 1000.0,
            timing: Timing {
                start: started.to_rfc3339(),
                end: finished.to_rfc3339(),
            },
            blob_key: None,
            blob_uri: None,
            public_url: None,
            cleanup: None,
        }
    }
}

/// `prefix/YYYY/MM/DD/HH-MM-SSZ.json`
fn merged_key(prefix: &str, at: DateTime<Utc>) -> String {
    let prefix = prefix.trim_end_matches('/');
    let stamp = at.format("%Y/%m/%d/%H-%M-%SZ");
    if prefix.is_empty() {
        format!("{stamp}.json")
    } else {
        format!("{prefix}/{stamp}.json")
    }
}

async fn cleanup(store: &dyn BlobStore, keys: &[String]) -> CleanupReport {
    let mut deleted = 0;
    let mut failed = 0;
    for key in keys {
        match store.delete(key).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to delete symbol blob");
                failed += 1;
            }
        }
    }
    info!(deleted, failed, "symbol blob cleanup finished");
    CleanupReport {
        cleaned: failed == 0,
        deleted_count: deleted,
        failed_count: failed,
        total_requested: keys.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::storage::MemoryBlobStore;

    fn order(id: &str, ctime: i64) -> Value {
        json!({"orderId": id, "cTime": ctime.to_string(), "_market": "spot_normal"})
    }

    #[test]
    fn merged_key_is_time_bucketed() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            merged_key("bitget-results/", at),
            "bitget-results/2024/03/09/07-05-01Z.json"
        );
        assert_eq!(merged_key("", at), "2024/03/09/07-05-01Z.json");
    }

    #[tokio::test]
    async fn inline_orders_are_merged_and_sorted() {
        let reducer = Reducer::new(None, ReducerConfig::default());
        let result = reducer
            .reduce(vec![
                json!({"symbol": "A", "count": 2, "orders": [order("1", 10), order("2", 30)]}),
                json!({"symbol": "B", "count": 1, "orders": [order("3", 20)]}),
            ])
            .await;
        assert_eq!(result.total_orders, 3);
        assert_eq!(result.symbols_with_data, 2);
        assert_eq!(result.error_count, 0);
        assert!(result.blob_key.is_none());
    }

    #[tokio::test]
    async fn bad_items_become_errors() {
        let reducer = Reducer::new(None, ReducerConfig::default());
        let result = reducer
            .reduce(vec![
                json!("garbage"),
                json!({"symbol": "A", "count": 1, "orders": "nope"}),
                json!({"symbol": "B", "count": 4}),
                json!({"symbol": "C", "count": 0}),
            ])
            .await;
        assert_eq!(result.symbols_processed, 4);
        assert_eq!(result.error_count, 3);
        assert_eq!(result.error_summary.get(&ErrorCategory::Unknown), Some(&3));
        let examples = &result.error_details[&ErrorCategory::Unknown].examples;
        assert!(examples.iter().any(|e| e.message == "No orders data available"));
    }

    #[tokio::test]
    async fn examples_are_bounded() {
        let reducer = Reducer::new(None, ReducerConfig::default());
        let items = (0..12)
            .map(|i| json!({"symbol": format!("S{i}"), "error": "Bitget server error - try again later"}))
            .collect();
        let result = reducer.reduce(items).await;
        let detail = &result.error_details[&ErrorCategory::ServerError];
        assert_eq!(detail.count, 12);
        assert_eq!(detail.examples.len(), 5);
    }

    #[tokio::test]
    async fn merged_artifact_written_and_blobs_cleaned() {
        let store = Arc::new(MemoryBlobStore::new());
        let blob = json!({"symbol": "B", "orders": [order("9", 5)], "count": 1});
        store.insert("per-symbol/B/1.json", serde_json::to_vec(&blob).unwrap());

        let reducer = Reducer::new(
            Some(store.clone() as Arc<dyn BlobStore>),
            ReducerConfig::default().with_cleanup(true),
        );
        let result = reducer
            .reduce(vec![json!({"symbol": "B", "count": 1, "blob_key": "per-symbol/B/1.json"})])
            .await;

        let key = result.blob_key.clone().unwrap();
        assert!(key.starts_with("bitget-results/"));
        let cleanup = result.cleanup.clone().unwrap();
        assert!(cleanup.cleaned);
        assert_eq!(cleanup.deleted_count, 1);
        assert!(!store.contains("per-symbol/B/1.json"));

        let merged: Value = serde_json::from_slice(&store.get(&key).await.unwrap()).unwrap();
        assert_eq!(merged["summary"]["total_orders"], 1);
        assert_eq!(merged["orders"][0]["_symbol"], "B");
    }
}
