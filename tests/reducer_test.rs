//! Aggregation over envelopes, inline orders and stored blobs.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use ordersweep::error::ErrorCategory;
use ordersweep::models::{FetchEnvelope, MarketKind, Order, SymbolBlob, TpslType};
use ordersweep::reducer::{Reducer, ReducerConfig};
use ordersweep::storage::{BlobStore, FsBlobStore, MemoryBlobStore};

use common::spot_order;

fn stored_orders(symbol: &str, times: &[i64]) -> Vec<Order> {
    times
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Order::from_api(spot_order(i as u64 + 1, *t), &MarketKind::Spot(TpslType::Normal), symbol)
                .unwrap()
        })
        .collect()
}

fn blob_bytes(symbol: &str, orders: Vec<Order>) -> Vec<u8> {
    let blob = SymbolBlob {
        symbol: symbol.to_string(),
        count: orders.len(),
        orders,
        stored_at: None,
    };
    serde_json::to_vec(&blob).unwrap()
}

#[tokio::test]
async fn test_error_and_blob_entries_are_merged() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("k1", blob_bytes("B", stored_orders("B", &[100, 200])));
    let reducer = Reducer::new(Some(store.clone()), ReducerConfig::default());

    let result = reducer
        .reduce(vec![
            json!({"symbol": "A", "error": "does not exist"}),
            json!({"symbol": "B", "blob_key": "k1"}),
        ])
        .await;

    assert_eq!(result.total_orders, 2);
    assert_eq!(result.symbols_processed, 2);
    assert_eq!(result.symbols_with_data, 1);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.error_summary.len(), 1);
    assert_eq!(result.error_summary.get(&ErrorCategory::SymbolNotFound), Some(&1));

    let summary = serde_json::to_value(&result).unwrap();
    assert_eq!(summary["error_summary"], json!({"symbol_not_found": 1}));
    assert_eq!(
        summary["error_details"]["symbol_not_found"]["examples"][0]["symbol"],
        "A"
    );
    assert!(summary.get("orders").is_none());
}

#[tokio::test]
async fn test_merged_orders_are_sorted_newest_first() {
    let store = Arc::new(MemoryBlobStore::new());
    let reducer = Reducer::new(Some(store.clone()), ReducerConfig::default());

    let result = reducer
        .reduce(vec![
            json!({"symbol": "A", "count": 3, "orders": [
                {"orderId": "1", "cTime": "500"},
                {"orderId": "2", "uTime": "900", "cTime": "100"},
                {"orderId": "3"}
            ]}),
            json!({"symbol": "B", "count": 2, "orders": [
                {"orderId": "4", "updateTime": 700},
                {"orderId": "5", "createTime": "800"}
            ]}),
        ])
        .await;

    assert_eq!(result.total_orders, 5);
    let key = result.blob_key.clone().unwrap();
    let merged: Value = serde_json::from_slice(&store.get(&key).await.unwrap()).unwrap();
    let ids: Vec<&str> = merged["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["orderId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["2", "5", "4", "1", "3"]);

    let orders: Vec<Order> = serde_json::from_value(merged["orders"].clone()).unwrap();
    let stamps: Vec<i64> = orders.iter().map(Order::sort_timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(orders[3].source_symbol.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_missing_blob_is_a_storage_error() {
    let store = Arc::new(MemoryBlobStore::new());
    let reducer = Reducer::new(Some(store), ReducerConfig::default());

    let result = reducer
        .reduce(vec![json!({"symbol": "C", "count": 10, "s3_key": "gone"})])
        .await;

    assert_eq!(result.total_orders, 0);
    assert_eq!(result.error_summary.get(&ErrorCategory::StorageError), Some(&1));
}

#[tokio::test]
async fn test_envelopes_reduce_without_a_store() {
    let reducer = Reducer::new(None, ReducerConfig::default());
    let inline = FetchEnvelope {
        count: 1,
        orders: Some(stored_orders("ETHUSDT", &[42])),
        ..FetchEnvelope::empty("ETHUSDT")
    };
    let failed = FetchEnvelope::failed("XBAD", ErrorCategory::AuthError, "Authentication failed");

    let result = reducer.reduce_envelopes(vec![inline, failed]).await;

    assert_eq!(result.total_orders, 1);
    assert_eq!(result.symbols_with_data, 1);
    assert_eq!(result.error_summary.get(&ErrorCategory::AuthError), Some(&1));
    assert!(result.blob_key.is_none());
    assert!(result.cleanup.is_none());
}

#[tokio::test]
async fn test_symbol_blob_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());
    let orders = stored_orders("BTCUSDT", &[3, 2, 1]);

    let pointer = store
        .put("per-symbol/BTCUSDT/20240101-000000.000.json", blob_bytes("BTCUSDT", orders.clone()))
        .await
        .unwrap();
    let envelope = FetchEnvelope {
        count: orders.len(),
        blob_key: Some(pointer.key.clone()),
        ..FetchEnvelope::empty("BTCUSDT")
    };

    let bytes = store.get(envelope.blob_key.as_deref().unwrap()).await.unwrap();
    let blob: SymbolBlob = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(blob.orders, orders);
    assert!(pointer.uri.starts_with("file://"));
}

#[tokio::test]
async fn test_cleanup_deletes_consulted_blobs_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    store
        .put("per-symbol/A/1.json", blob_bytes("A", stored_orders("A", &[1])))
        .await
        .unwrap();
    let reducer = Reducer::new(Some(store.clone()), ReducerConfig::default().with_cleanup(true));

    let result = reducer
        .reduce(vec![json!({"symbol": "A", "count": 1, "blob_key": "per-symbol/A/1.json"})])
        .await;

    let cleanup = result.cleanup.unwrap();
    assert_eq!(cleanup.total_requested, 1);
    assert_eq!(cleanup.deleted_count, 1);
    assert!(cleanup.cleaned);
    assert!(store.get("per-symbol/A/1.json").await.is_err());
    let merged_key = result.blob_key.unwrap();
    assert!(dir.path().join(&merged_key).exists());
}
