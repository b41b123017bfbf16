//! Adaptive page sizing from observed latency.
//!
//! Keeps an exponential moving average of response time and result count
//! per `(symbol, market)` and nudges the proposed page size up while the
//! endpoint is fast and down while it is slow.

use std::time::Duration;

use tracing::debug;

use crate::keyed::KeyedState;

/// Tuning knobs. The latency thresholds are empirical and kept configurable.
#[derive(Debug, Clone)]
pub struct PageSizerConfig {
    /// Size used until enough samples exist. Default: 100
    pub default_size: u32,
    /// Default: 50
    pub min_size: u32,
    /// Default: 100
    pub max_size: u32,
    /// Adjustment applied between proposals. Default: 20
    pub step: u32,
    /// Shrink step used by [`AdaptivePageSizer::adjust_in_flight`]. Default: 10
    pub shrink_step: u32,
    /// Average latency below which the size grows. Default: 1s
    pub fast_latency: Duration,
    /// Average latency above which the size shrinks. Default: 3s
    pub slow_latency: Duration,
    /// EMA smoothing factor. Default: 0.3
    pub alpha: f64,
    /// Samples required before proposals leave the default. Default: 2
    pub min_samples: u32,
    /// When `false`, always propose `default_size`.
    pub enabled: bool,
}

impl Default for PageSizerConfig {
    fn default() -> Self {
        Self {
            default_size: 100,
            min_size: 50,
            max_size: 100,
            step: 20,
            shrink_step: 10,
            fast_latency: Duration::from_secs(1),
            slow_latency: Duration::from_secs(3),
            alpha: 0.3,
            min_samples: 2,
            enabled: true,
        }
    }
}

impl PageSizerConfig {
    #[must_use]
    pub fn with_bounds(mut self, min_size: u32, max_size: u32) -> Self {
        self.min_size = min_size.min(max_size);
        self.max_size = max_size.max(min_size);
        self
    }

    #[must_use]
    pub fn with_default_size(mut self, size: u32) -> Self {
        self.default_size = size;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn clamp(&self, size: u32) -> u32 {
        size.clamp(self.min_size, self.max_size)
    }
}

/// Moving averages for one `(symbol, market)` key.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveStats {
    pub avg_latency_secs: f64,
    pub avg_results: f64,
    pub samples: u32,
    pub last_page_size: u32,
    /// `None` until the first proposal after warm-up.
    pub proposed: Option<u32>,
}

/// Shared page-size tuner.
#[derive(Debug, Default)]
pub struct AdaptivePageSizer {
    config: PageSizerConfig,
    stats: KeyedState<AdaptiveStats>,
}

fn stats_key(symbol: &str, market: &str) -> String {
    format!("{symbol}_{market}")
}

impl AdaptivePageSizer {
    #[must_use]
    pub fn new(config: PageSizerConfig) -> Self {
        Self {
            config,
            stats: KeyedState::new(),
        }
    }

    pub fn config(&self) -> &PageSizerConfig {
        &self.config
    }

    /// Proposes the page size for the next request on `(symbol, market)`.
    ///
    /// The result always lies within `[min_size, max_size]`.
    pub fn propose_size(&self, symbol: &str, market: &str) -> u32 {
        let cfg = &self.config;
        let default = cfg.clamp(cfg.default_size);
        if !cfg.enabled {
            return default;
        }

        self.stats.with(&stats_key(symbol, market), |stats| {
            if stats.samples < cfg.min_samples {
                return default;
            }

            let current = stats.proposed.unwrap_or(default);
            let avg = stats.avg_latency_secs;
            let next = if avg < cfg.fast_latency.as_secs_f64() && current < cfg.max_size {
                current.saturating_add(cfg.step)
            } else if avg > cfg.slow_latency.as_secs_f64() && current > cfg.min_size {
                current.saturating_sub(cfg.step)
            } else {
                current
            };
            let next = cfg.clamp(next);
            if next != current {
                debug!(symbol, market, from = current, to = next, "page size adjusted");
            }
            stats.proposed = Some(next);
            next
        })
    }

    /// Folds one completed page fetch into the moving averages.
    pub fn record(
        &self,
        symbol: &str,
        market: &str,
        latency: Duration,
        result_count: usize,
        page_size: u32,
    ) {
        if !self.config.enabled {
            return;
        }

        let alpha = self.config.alpha;
        let latency = latency.as_secs_f64();
        let results = result_count as f64;
        self.stats.with(&stats_key(symbol, market), |stats| {
            if stats.samples == 0 {
                stats.avg_latency_secs = latency;
                stats.avg_results = results;
            } else {
                stats.avg_latency_secs = alpha * latency + (1.0 - alpha) * stats.avg_latency_secs;
                stats.avg_results = alpha * results + (1.0 - alpha) * stats.avg_results;
            }
            stats.samples += 1;
            stats.last_page_size = page_size;
        });
    }

    /// Adjusts the size used inside a running pagination loop.
    ///
    /// After more than two pages, a completely full page grows the size by
    /// `step` and a page under half full shrinks it by `shrink_step`.
    pub fn adjust_in_flight(&self, current: u32, pages_done: u32, page_len: usize) -> u32 {
        let cfg = &self.config;
        if !cfg.enabled || pages_done <= 2 {
            return current;
        }

        let next = if page_len >= current as usize && current < cfg.max_size {
            current.saturating_add(cfg.step)
        } else if (page_len as f64) < f64::from(current) * 0.5 && current > cfg.min_size {
            current.saturating_sub(cfg.shrink_step)
        } else {
            current
        };
        cfg.clamp(next)
    }

    /// Snapshot of the stats for `(symbol, market)`.
    pub fn stats(&self, symbol: &str, market: &str) -> AdaptiveStats {
        self.stats.with(&stats_key(symbol, market), |stats| stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> AdaptivePageSizer {
        AdaptivePageSizer::new(
            PageSizerConfig::default()
                .with_bounds(20, 200)
                .with_default_size(100),
        )
    }

    #[test]
    fn default_until_two_samples() {
        let sizer = sizer();
        assert_eq!(sizer.propose_size("BTCUSDT", "spot_normal"), 100);
        sizer.record("BTCUSDT", "spot_normal", Duration::from_millis(100), 100, 100);
        assert_eq!(sizer.propose_size("BTCUSDT", "spot_normal"), 100);
    }

    #[test]
    fn fast_responses_grow_monotonically_to_max() {
        let sizer = sizer();
        for _ in 0..2 {
            sizer.record("BTCUSDT", "spot_normal", Duration::from_millis(200), 100, 100);
        }

        let mut previous = 100;
        for _ in 0..10 {
            let next = sizer.propose_size("BTCUSDT", "spot_normal");
            assert!(next >= previous);
            assert!(next <= 200);
            previous = next;
        }
        assert_eq!(previous, 200);
    }

    #[test]
    fn slow_responses_shrink_to_min() {
        let sizer = sizer();
        for _ in 0..3 {
            sizer.record("ETHUSDT", "spot_tpsl", Duration::from_secs(5), 10, 100);
        }
        for _ in 0..10 {
            let size = sizer.propose_size("ETHUSDT", "spot_tpsl");
            assert!((20..=200).contains(&size));
        }
        assert_eq!(sizer.propose_size("ETHUSDT", "spot_tpsl"), 20);
    }

    #[test]
    fn moderate_latency_holds() {
        let sizer = sizer();
        for _ in 0..2 {
            sizer.record("SOLUSDT", "spot_normal", Duration::from_secs(2), 50, 100);
        }
        assert_eq!(sizer.propose_size("SOLUSDT", "spot_normal"), 100);
        assert_eq!(sizer.propose_size("SOLUSDT", "spot_normal"), 100);
    }

    #[test]
    fn moving_average_uses_alpha() {
        let sizer = sizer();
        sizer.record("X", "m", Duration::from_secs(1), 10, 100);
        sizer.record("X", "m", Duration::from_secs(2), 20, 100);
        let stats = sizer.stats("X", "m");
        assert!((stats.avg_latency_secs - 1.3).abs() < 1e-9);
        assert!((stats.avg_results - 13.0).abs() < 1e-9);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn keys_are_independent() {
        let sizer = sizer();
        for _ in 0..2 {
            sizer.record("A", "spot_normal", Duration::from_secs(5), 1, 100);
        }
        assert_eq!(sizer.propose_size("B", "spot_normal"), 100);
    }

    #[test]
    fn disabled_sizer_returns_default() {
        let sizer = AdaptivePageSizer::new(PageSizerConfig::default().with_enabled(false));
        for _ in 0..5 {
            sizer.record("A", "m", Duration::from_millis(1), 100, 100);
        }
        assert_eq!(sizer.propose_size("A", "m"), 100);
        assert_eq!(sizer.adjust_in_flight(100, 5, 1), 100);
    }

    #[test]
    fn in_flight_adjustment_waits_for_third_page() {
        let sizer = sizer();
        assert_eq!(sizer.adjust_in_flight(100, 2, 100), 100);
        assert_eq!(sizer.adjust_in_flight(100, 3, 100), 120);
        assert_eq!(sizer.adjust_in_flight(100, 3, 10), 90);
        assert_eq!(sizer.adjust_in_flight(100, 3, 70), 100);
    }
}
