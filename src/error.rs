//! Crate-level error types.
//!
//! [`SweepError`] unifies the fatal error sources (configuration, HTTP,
//! JSON, storage) behind a single enum so callers can match on the variant
//! they care about while still using the `?` operator for easy propagation.
//!
//! Failures that belong to a single fetch task are *not* `SweepError`s: they
//! are [`ApiError`]s carrying an [`ErrorCategory`], captured by the
//! orchestrator and reported in the envelope instead of aborting the run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Top-level error type returned by fallible setup and storage APIs.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Required configuration or credentials are missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP client could not be built or a request failed outright.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The blob store rejected a read, write, or delete.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failure taxonomy shared by fetch envelopes and the aggregate summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SymbolNotFound,
    AuthError,
    PermissionError,
    RateLimit,
    ServerError,
    Timeout,
    NetworkError,
    StorageError,
    InvalidRequest,
    ApiError,
    Unknown,
}

impl ErrorCategory {
    /// Returns the wire name used as a key in `error_summary`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SymbolNotFound => "symbol_not_found",
            Self::AuthError => "auth_error",
            Self::PermissionError => "permission_error",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::StorageError => "storage_error",
            Self::InvalidRequest => "invalid_request",
            Self::ApiError => "api_error",
            Self::Unknown => "unknown",
        }
    }

    /// Classifies a free-text error message.
    ///
    /// Envelopes produced by older workers only carry an error string, so
    /// the reducer falls back to keyword matching. Rules are checked in
    /// order; the first hit wins.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.trim().is_empty() {
            return Self::Unknown;
        }
        if lower.contains("does not exist") {
            return Self::SymbolNotFound;
        }
        if lower.contains("authentication failed") || lower.contains("api credentials") {
            return Self::AuthError;
        }
        if lower.contains("access forbidden") || lower.contains("permissions") {
            return Self::PermissionError;
        }
        if lower.contains("rate limit") || lower.contains("too many requests") {
            return Self::RateLimit;
        }
        if lower.contains("server error") || lower.contains("try again later") {
            return Self::ServerError;
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::Timeout;
        }
        if lower.contains("network") || lower.contains("connection") {
            return Self::NetworkError;
        }
        if lower.contains("storage") || lower.contains("s3") || lower.contains("blob") {
            return Self::StorageError;
        }
        if lower.contains("invalid request") {
            return Self::InvalidRequest;
        }
        Self::ApiError
    }

    /// Returns `true` if the transport layer should retry this failure.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Timeout | Self::NetworkError
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitget business code for an unknown instrument.
pub const CODE_SYMBOL_NOT_FOUND: &str = "40034";

/// A failed exchange call after transport retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category}: {message}")]
pub struct ApiError {
    pub category: ErrorCategory,
    /// HTTP status, when the failure came with a response.
    pub status: Option<u16>,
    /// Bitget business code (`"40034"`, ...), when the body carried one.
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Builds an error from an HTTP status and an optional business code.
    pub fn from_status(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let category = match status {
            401 => ErrorCategory::AuthError,
            403 => ErrorCategory::PermissionError,
            429 => ErrorCategory::RateLimit,
            500..=599 => ErrorCategory::ServerError,
            _ if is_symbol_not_found(code.as_deref(), &message) => ErrorCategory::SymbolNotFound,
            400..=499 => ErrorCategory::InvalidRequest,
            _ => ErrorCategory::ApiError,
        };
        Self {
            category,
            status: Some(status),
            code,
            message,
        }
    }

    /// Builds an error from a 2xx body whose business code signals failure.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        let category = if is_symbol_not_found(Some(&code), &message) {
            ErrorCategory::SymbolNotFound
        } else {
            ErrorCategory::ApiError
        };
        Self {
            category,
            status: None,
            code: Some(code),
            message,
        }
    }

    /// Returns the maximum window span in days if the exchange rejected the
    /// request because its time range was too wide.
    pub fn max_range_days(&self) -> Option<u32> {
        if self.message.contains("cannot be greater than 30 days") {
            Some(30)
        } else if self.message.contains("cannot be greater than 90 days") {
            Some(90)
        } else {
            None
        }
    }

    /// Returns `true` if the Bitget business code matches `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Renders the human-facing message placed in fetch envelopes.
    ///
    /// The wording is chosen so [`ErrorCategory::from_message`] maps it back
    /// to the same category.
    pub fn describe(&self, symbol: &str) -> String {
        match self.category {
            ErrorCategory::SymbolNotFound => format!("Symbol '{symbol}' does not exist on Bitget"),
            ErrorCategory::AuthError => "Authentication failed - check API credentials".to_string(),
            ErrorCategory::PermissionError => "Access forbidden - check API permissions".to_string(),
            ErrorCategory::RateLimit => {
                "Rate limit exceeded - too many requests (retries exhausted)".to_string()
            }
            ErrorCategory::ServerError => "Bitget server error - try again later".to_string(),
            ErrorCategory::Timeout => format!("Request timeout for '{symbol}': {}", self.message),
            ErrorCategory::NetworkError => {
                "Network connection error to Bitget API (retries exhausted)".to_string()
            }
            ErrorCategory::StorageError => format!("Storage failed: {}", self.message),
            ErrorCategory::InvalidRequest => {
                format!("Invalid request for '{symbol}': {}", truncate(&self.message, 200))
            }
            ErrorCategory::ApiError | ErrorCategory::Unknown => format!(
                "Bitget API error for symbol '{symbol}': {}",
                truncate(&self.message, 200)
            ),
        }
    }
}

fn is_symbol_not_found(code: Option<&str>, message: &str) -> bool {
    code == Some(CODE_SYMBOL_NOT_FOUND)
        || (message.contains("Parameter") && message.contains("does not exist"))
}

/// Truncates `s` to at most `max` characters on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
