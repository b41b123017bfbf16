//! Reducer output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// One recorded failure, kept as an example under its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExample {
    pub symbol: Option<String>,
    pub message: String,
}

/// Count plus a bounded sample of messages for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub count: usize,
    pub examples: Vec<ErrorExample>,
}

/// Wall-clock bounds of the reduce step, RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub start: String,
    pub end: String,
}

/// Outcome of deleting per-symbol blobs after a successful merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// `true` when every requested deletion succeeded.
    pub cleaned: bool,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub total_requested: usize,
}

/// Summary returned to the caller. Never carries the order list itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total_orders: usize,
    pub symbols_processed: usize,
    pub symbols_with_data: usize,
    pub error_count: usize,
    pub error_summary: BTreeMap<ErrorCategory, usize>,
    pub error_details: BTreeMap<ErrorCategory, ErrorDetail>,
    pub processing_timestamp: String,
    pub duration_seconds: f64,
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_keys_serialize_as_wire_names() {
        let result = AggregateResult {
            total_orders: 2,
            symbols_processed: 2,
            symbols_with_data: 1,
            error_count: 1,
            error_summary: BTreeMap::from([(ErrorCategory::SymbolNotFound, 1)]),
            error_details: BTreeMap::from([(
                ErrorCategory::SymbolNotFound,
                ErrorDetail {
                    count: 1,
                    examples: vec![ErrorExample {
                        symbol: Some("A".into()),
                        message: "does not exist".into(),
                    }],
                },
            )]),
            processing_timestamp: "2026-01-01T00:00:00Z".into(),
            duration_seconds: 0.1,
            timing: Timing {
                start: "2026-01-01T00:00:00Z".into(),
                end: "2026-01-01T00:00:00Z".into(),
            },
            blob_key: None,
            blob_uri: None,
            public_url: None,
            cleanup: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_summary"]["symbol_not_found"], 1);
        assert_eq!(
            json["error_details"]["symbol_not_found"]["examples"][0]["symbol"],
            "A"
        );
        assert!(json.get("cleanup").is_none());

        let back: AggregateResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
