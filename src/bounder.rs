//! Size-bounded per-symbol envelopes.
//!
//! The envelope handed back for each symbol must stay under a byte ceiling
//! (default 180 KiB, under a 256 KiB platform limit). Large results are
//! expected to live in the blob store; without one, a handful of orders can
//! be inlined and anything bigger is reported as truncated.

use tracing::{debug, warn};

use crate::error::{ErrorCategory, truncate};
use crate::models::{DataLocation, FetchEnvelope, Order};
use crate::storage::BlobPointer;

/// Longest error text carried in an envelope.
const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct BounderConfig {
    /// Hard ceiling for the serialized envelope. Default: 184320
    pub max_bytes: usize,
    /// Serialized size assumed per order when planning. Default: 500
    pub estimated_order_bytes: usize,
    /// Never inline more than this many orders. Default: 20
    pub max_inline_orders: usize,
}

impl Default for BounderConfig {
    fn default() -> Self {
        Self {
            max_bytes: 180 * 1024,
            estimated_order_bytes: 500,
            max_inline_orders: 20,
        }
    }
}

impl BounderConfig {
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// What the bounder has to work with for one symbol.
#[derive(Debug)]
pub enum Payload {
    /// Orders held in memory; no blob store is configured (or none were found).
    Orders(Vec<Order>),
    /// The full list was written to the blob store.
    Stored { pointer: BlobPointer, count: usize },
    /// Writing to the blob store failed.
    StoreFailed { count: usize, reason: String },
}

/// Envelope fields decided upstream of the bounder.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeMeta {
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub partial: bool,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseBounder {
    config: BounderConfig,
}

fn serialized_len(envelope: &FetchEnvelope) -> usize {
    serde_json::to_vec(envelope).map_or(usize::MAX, |bytes| bytes.len())
}

impl ResponseBounder {
    pub fn new(config: BounderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BounderConfig {
        &self.config
    }

    /// Builds the envelope for `symbol`.
    ///
    /// The serialized result never exceeds `max_bytes`; when orders had to
    /// be left out the envelope says so with `truncated = true` and an
    /// empty order list.
    pub fn bound(&self, symbol: &str, payload: Payload, meta: EnvelopeMeta) -> FetchEnvelope {
        let base = FetchEnvelope {
            error: meta
                .error
                .map(|e| truncate(&e, MAX_ERROR_CHARS).to_string()),
            error_category: meta.error_category,
            partial: meta.partial,
            elapsed_seconds: meta.elapsed_seconds,
            ..FetchEnvelope::empty(symbol)
        };

        let envelope = match payload {
            Payload::Orders(orders) if orders.is_empty() => base,
            Payload::Stored { pointer, count } => FetchEnvelope {
                count,
                data_location: DataLocation::Blob,
                blob_key: Some(pointer.key),
                blob_uri: Some(pointer.uri),
                public_url: pointer.public_url,
                ..base
            },
            Payload::StoreFailed { count, reason } => {
                warn!(symbol, count, reason = %reason, "blob write failed, returning truncated envelope");
                let message = format!("Storage failed: {reason}");
                FetchEnvelope {
                    count,
                    truncated: true,
                    orders: Some(Vec::new()),
                    error: Some(truncate(&message, MAX_ERROR_CHARS).to_string()),
                    error_category: Some(ErrorCategory::StorageError),
                    ..base
                }
            }
            Payload::Orders(orders) => self.inline_or_truncate(base, orders),
        };
        self.fit(envelope)
    }

    /// Sheds optional text until `envelope` serializes under the ceiling:
    /// the recommendation first, then the error message halved step by
    /// step, then the blob URIs. The blob key and counts always stay.
    fn fit(&self, mut envelope: FetchEnvelope) -> FetchEnvelope {
        let max = self.config.max_bytes;
        let size = serialized_len(&envelope);
        if size <= max {
            return envelope;
        }
        warn!(symbol = %envelope.symbol, size, max, "envelope over ceiling, trimming text");

        envelope.recommendation = None;
        while serialized_len(&envelope) > max {
            let Some(error) = envelope.error.as_deref() else {
                break;
            };
            let len = error.chars().count();
            if len == 0 {
                break;
            }
            envelope.error = Some(truncate(error, len / 2).to_string());
        }
        if serialized_len(&envelope) > max {
            envelope.public_url = None;
            envelope.blob_uri = None;
        }
        envelope
    }

    fn inline_or_truncate(&self, base: FetchEnvelope, orders: Vec<Order>) -> FetchEnvelope {
        let cfg = &self.config;
        let count = orders.len();
        let skeleton = FetchEnvelope {
            count,
            orders: Some(Vec::new()),
            ..base.clone()
        };
        let room = cfg.max_bytes.saturating_sub(serialized_len(&skeleton));
        let max_safe = (room / cfg.estimated_order_bytes.max(1))
            .max(1)
            .min(cfg.max_inline_orders);

        if count <= max_safe {
            let inline = FetchEnvelope {
                data_location: DataLocation::Inline,
                orders: Some(orders),
                ..skeleton
            };
            let size = serialized_len(&inline);
            if size <= cfg.max_bytes {
                debug!(symbol = %inline.symbol, count, size, "orders inlined");
                return inline;
            }
            warn!(symbol = %inline.symbol, count, size, max = cfg.max_bytes, "inline estimate exceeded ceiling");
        }

        warn!(symbol = %base.symbol, count, max_safe, "too many orders to inline without a blob store");
        let message = format!(
            "Response too large: {count} orders exceed the {} byte limit (inline limit {max_safe})",
            cfg.max_bytes
        );
        FetchEnvelope {
            count,
            truncated: true,
            data_location: DataLocation::None,
            orders: Some(Vec::new()),
            error: Some(base.error.clone().unwrap_or(message)),
            recommendation: Some(
                "Configure RESULTS_DIR so full results are written to blob storage".to_string(),
            ),
            ..base
        }
    }
}
