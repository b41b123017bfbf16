//! Real API tests against Bitget.
//!
//! These need network access and read-only API credentials in
//! `BITGET_API_KEY`, `BITGET_API_SECRET` and `BITGET_API_PASSPHRASE`.
//! Run with: `cargo test --features integration-tests`

#![cfg(feature = "integration-tests")]

use std::sync::Arc;
use std::time::Duration;

use ordersweep::auth::Signer;
use ordersweep::budget::ExecutionBudget;
use ordersweep::client::{BitgetClient, ExchangeApi, SpotQuery};
use ordersweep::config::fetch_config;
use ordersweep::credentials::populate_env_from_keychain;
use ordersweep::models::FetchTask;
use ordersweep::sweep::Sweep;

fn live_symbol() -> String {
    std::env::var("LIVE_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string())
}

#[tokio::test]
async fn test_spot_history_request_is_accepted() {
    populate_env_from_keychain().expect("Invalid keychain settings");
    let config = fetch_config().expect("Failed to load configuration");
    let signer = Signer::new(config.credentials).expect("Invalid credentials");
    let client = Arc::new(BitgetClient::new(config.client, signer).expect("Failed to build client"));

    let query = SpotQuery {
        symbol: live_symbol(),
        limit: 10,
        tpsl_type: "normal",
        start_ms: None,
        end_ms: None,
        id_less_than: None,
    };
    let budget = ExecutionBudget::new(Duration::from_secs(30));
    let result = client.spot_history_orders(&query, &budget).await;
    assert!(result.is_ok(), "spot history failed: {:?}", result.err());
}

#[tokio::test]
async fn test_sweep_of_one_symbol_completes() {
    populate_env_from_keychain().expect("Invalid keychain settings");
    let config = fetch_config().expect("Failed to load configuration");
    let sweep = Sweep::from_config(config).expect("Failed to build sweep");

    let report = sweep.run(vec![FetchTask::new(live_symbol())]).await;

    assert_eq!(report.envelopes.len(), 1);
    assert_eq!(report.summary.symbols_processed, 1);
    let envelope = &report.envelopes[0];
    assert!(
        envelope.error.is_none(),
        "sweep reported an error: {:?}",
        envelope.error
    );
}
