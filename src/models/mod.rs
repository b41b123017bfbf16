//! Data types passed between the fetch, bounding and reduce stages.
//!
//! - [`FetchTask`]: one symbol to retrieve.
//! - [`Order`]: a normalized order with provenance tags.
//! - [`FetchEnvelope`]: the size-bounded per-symbol result.
//! - [`AggregateResult`]: the reducer's summary.

pub mod envelope;
pub mod order;
pub mod summary;
pub mod task;

pub use envelope::{DataLocation, FetchEnvelope, SymbolBlob};
pub use order::{MarketDetail, MarketKind, Order, OrderError, RawOrder, TpslType};
pub use summary::{AggregateResult, CleanupReport, ErrorDetail, ErrorExample, Timing};
pub use task::{FetchTask, coerce_ms};
