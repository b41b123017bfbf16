//! Per-symbol result contract handed from the fetch stage to the reducer.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::models::Order;

/// Where a symbol's orders ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLocation {
    /// Full list stored in the blob store; see `blob_key`.
    #[serde(alias = "s3")]
    Blob,
    /// Orders carried in the envelope itself.
    Inline,
    /// No orders reachable from this envelope.
    #[default]
    #[serde(alias = "failed")]
    None,
}

/// Size-bounded summary of one symbol fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchEnvelope {
    pub symbol: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default)]
    pub data_location: DataLocation,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, alias = "s3_key", skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(default, alias = "s3_uri", skip_serializing_if = "Option::is_none")]
    pub blob_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<Order>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// The execution budget ran out before every sub-market finished.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(default)]
    pub elapsed_seconds: f64,
}

impl FetchEnvelope {
    /// Envelope with no orders and no error.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            count: 0,
            error: None,
            error_category: None,
            data_location: DataLocation::None,
            truncated: false,
            blob_key: None,
            blob_uri: None,
            public_url: None,
            orders: None,
            recommendation: None,
            partial: false,
            elapsed_seconds: 0.0,
        }
    }

    /// Envelope recording a failure for `symbol`.
    pub fn failed(
        symbol: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(message.into()),
            error_category: Some(category),
            orders: Some(Vec::new()),
            ..Self::empty(symbol)
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Per-symbol artifact written to the blob store and read back by the
/// reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolBlob {
    #[serde(default)]
    pub symbol: String,
    pub orders: Vec<Order>,
    #[serde(default)]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<String>,
}
