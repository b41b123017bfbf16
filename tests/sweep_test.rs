//! End-to-end sweeps: fetch, bound, store and reduce.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ordersweep::error::{ApiError, ErrorCategory};
use ordersweep::fetch::FetchContext;
use ordersweep::models::{DataLocation, FetchTask, SymbolBlob};
use ordersweep::storage::{BlobStore, MemoryBlobStore};
use ordersweep::sweep::{Sweep, SweepSettings};

use common::{FakeExchange, spot_page};

fn two_normal_orders() -> FakeExchange {
    FakeExchange::new().on_spot(|q, seen| {
        if q.tpsl_type == "normal" && seen == 0 {
            Ok(spot_page(5000, q.end_ms.unwrap() - 1000, 2))
        } else {
            Ok(Vec::new())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_symbol_results_go_to_blob_store() {
    let api = Arc::new(two_normal_orders());
    let store = Arc::new(MemoryBlobStore::new());
    let sweep = Sweep::new(
        FetchContext::new(api.clone()),
        Some(store.clone() as Arc<dyn BlobStore>),
        SweepSettings::default(),
    );

    let report = sweep
        .run(vec![FetchTask::new("BTCUSDT").with_futures(false)])
        .await;

    assert_eq!(report.envelopes.len(), 1);
    let envelope = &report.envelopes[0];
    assert_eq!(envelope.count, 2);
    assert_eq!(envelope.data_location, DataLocation::Blob);
    assert!(envelope.orders.is_none());
    assert!(envelope.error.is_none());

    let key = envelope.blob_key.clone().unwrap();
    assert!(key.starts_with("per-symbol/BTCUSDT/"), "{key}");
    let blob: SymbolBlob = serde_json::from_slice(&store.get(&key).await.unwrap()).unwrap();
    assert_eq!(blob.symbol, "BTCUSDT");
    assert_eq!(blob.count, 2);

    assert_eq!(report.summary.total_orders, 2);
    assert_eq!(report.summary.symbols_with_data, 1);
    assert_eq!(report.summary.error_count, 0);
    let merged_key = report.summary.blob_key.clone().unwrap();
    assert!(merged_key.starts_with("bitget-results/"), "{merged_key}");
    let merged: Value = serde_json::from_slice(&store.get(&merged_key).await.unwrap()).unwrap();
    assert_eq!(merged["orders"].as_array().map(Vec::len), Some(2));
    assert_eq!(merged["summary"]["total_orders"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_small_results_are_inlined_without_a_store() {
    let api = Arc::new(two_normal_orders());
    let sweep = Sweep::new(FetchContext::new(api.clone()), None, SweepSettings::default());

    let report = sweep
        .run(vec![FetchTask::new("BTCUSDT").with_futures(false)])
        .await;

    let envelope = &report.envelopes[0];
    assert_eq!(envelope.data_location, DataLocation::Inline);
    assert_eq!(envelope.orders.as_ref().map(Vec::len), Some(2));
    assert!(envelope.blob_key.is_none());
    assert_eq!(report.summary.total_orders, 2);
    assert!(report.summary.blob_key.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_symbol_is_reported_and_counted() {
    let api = Arc::new(FakeExchange::new().on_spot(|q, _| {
        if q.symbol == "XBAD" {
            Err(ApiError::from_code("40034", "Parameter XBAD does not exist"))
        } else {
            Ok(Vec::new())
        }
    }));
    let sweep = Sweep::new(FetchContext::new(api.clone()), None, SweepSettings::default());

    let report = sweep
        .run(vec![
            FetchTask::new("XBAD").with_futures(false),
            FetchTask::new("ETHUSDT").with_futures(false),
        ])
        .await;

    let bad = &report.envelopes[0];
    assert_eq!(bad.symbol, "XBAD");
    assert_eq!(bad.error.as_deref(), Some("Symbol 'XBAD' does not exist on Bitget"));
    assert_eq!(bad.error_category, Some(ErrorCategory::SymbolNotFound));
    assert_eq!(bad.count, 0);

    let quiet = &report.envelopes[1];
    assert_eq!(quiet.symbol, "ETHUSDT");
    assert!(quiet.error.is_none());
    assert_eq!(quiet.data_location, DataLocation::None);

    let summary = serde_json::to_value(&report.summary).unwrap();
    assert_eq!(summary["error_summary"], serde_json::json!({"symbol_not_found": 1}));
    assert_eq!(report.summary.symbols_processed, 2);
    assert_eq!(report.summary.total_orders, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_skips_every_symbol() {
    let api = Arc::new(two_normal_orders());
    let settings = SweepSettings {
        max_execution: Duration::from_millis(300),
        ..SweepSettings::default()
    };
    let sweep = Sweep::new(FetchContext::new(api.clone()), None, settings);

    let report = sweep
        .run(vec![FetchTask::new("BTCUSDT"), FetchTask::new("ETHUSDT")])
        .await;

    assert_eq!(api.calls(), 0);
    assert_eq!(report.envelopes.len(), 2);
    for envelope in &report.envelopes {
        assert!(envelope.partial);
        assert!(envelope.recommendation.is_some());
        assert!(envelope.error.is_none());
    }
    assert_eq!(report.summary.symbols_processed, 2);
    assert_eq!(report.summary.error_count, 0);
}
