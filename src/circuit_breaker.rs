//! Per-key circuit breaker for persistently failing endpoints.
//!
//! Each key (a symbol, or a symbol plus sub-market such as
//! `BTCUSDT_normal` / `BTCUSDT_UMCBL`) runs its own state machine:
//!
//! ```text
//! CLOSED --(failures >= threshold)--> OPEN --(recovery timeout)--> HALF_OPEN
//!    ^                                  ^                              |
//!    |                                  +-------(any failure)---------+
//!    +------------------(successes >= success threshold)--------------+
//! ```
//!
//! [`CircuitBreaker::can_execute`] is the sole gate callers consult before
//! issuing a request for a key.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::keyed::KeyedState;

/// Thresholds for opening and closing the circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Default: 3
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed. Default: 30s
    pub recovery_timeout: Duration,
    /// Successes in HALF_OPEN needed to close again. Default: 2
    pub success_threshold: u32,
    /// When `false`, every call is allowed and nothing is recorded.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Position in the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Counters tracked for one key.
#[derive(Debug, Clone, Default)]
struct BreakerEntry {
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    state: BreakerState,
}

/// Registry of per-key breakers sharing one configuration.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: KeyedState<BreakerEntry>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: KeyedState::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns `false` while the circuit for `key` is open.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to
    /// HALF_OPEN here and lets the call through.
    pub fn can_execute(&self, key: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        self.entries.with(key, |entry| match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let recovered = entry
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    entry.state = BreakerState::HalfOpen;
                    entry.success_count = 0;
                    info!(key, "circuit half-open, allowing trial call");
                }
                recovered
            }
        })
    }

    /// Records a completed call for `key`.
    pub fn record_success(&self, key: &str) {
        if !self.config.enabled {
            return;
        }

        self.entries.with(key, |entry| {
            entry.failure_count = 0;
            if entry.state == BreakerState::HalfOpen {
                entry.success_count += 1;
                if entry.success_count >= self.config.success_threshold {
                    entry.state = BreakerState::Closed;
                    entry.success_count = 0;
                    info!(key, "circuit closed");
                }
            }
        });
    }

    /// Records a failed call for `key`.
    pub fn record_failure(&self, key: &str, reason: &str) {
        if !self.config.enabled {
            return;
        }

        self.entries.with(key, |entry| {
            entry.failure_count += 1;
            entry.last_failure = Some(Instant::now());

            let reopen = entry.state == BreakerState::HalfOpen;
            if reopen || entry.failure_count >= self.config.failure_threshold {
                if entry.state != BreakerState::Open {
                    warn!(
                        key,
                        failures = entry.failure_count,
                        reason,
                        "circuit opened"
                    );
                }
                entry.state = BreakerState::Open;
                entry.success_count = 0;
            }
        });
    }

    /// Current state for `key` without triggering the OPEN → HALF_OPEN transition.
    pub fn state(&self, key: &str) -> BreakerState {
        self.entries.with(key, |entry| entry.state)
    }

    /// Current consecutive failure count for `key`.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.entries.with(key, |entry| entry.failure_count)
    }
}
