//! Resilient order-history retrieval and aggregation for Bitget.
//!
//! A run takes a list of [`FetchTask`](models::FetchTask)s, retrieves each
//! symbol's spot and futures order history under a shared wall-clock
//! [`ExecutionBudget`](budget::ExecutionBudget), shrinks every per-symbol
//! result to a bounded [`FetchEnvelope`](models::FetchEnvelope), and merges
//! the envelopes into one globally sorted dataset plus a summary.
//!
//! Rate limiting, circuit breaking, adaptive page sizing and pagination
//! prediction are explicit components owned by the run and shared with
//! every fetch through [`FetchContext`](fetch::FetchContext).

pub mod auth;
pub mod bounder;
pub mod budget;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod keyed;
pub mod models;
pub mod page_sizer;
pub mod pagination;
pub mod rate_limit;
pub mod reducer;
pub mod scheduler;
pub mod storage;
pub mod sweep;

pub use error::{Result, SweepError};
