//! Early-stop prediction for backward pagination.
//!
//! The history endpoints give no total count, so the only signal that a
//! symbol has run out of orders is how full recent pages were. The
//! predictor keeps the last few fill counts per key and stops paging once
//! they consistently fall off.

use std::collections::VecDeque;

use tracing::debug;

use crate::keyed::KeyedState;

/// Fill-count history retained per key.
const HISTORY_LEN: usize = 10;

/// Samples needed before the pattern rules apply.
const MIN_SAMPLES: usize = 3;

/// Fill ratio under which three pages in a row mean "no more data".
const LOW_FILL: f64 = 0.3;

/// Fill ratio under which a falling trend stops pagination.
const TREND_FILL: f64 = 0.2;

/// Continue threshold once the rules pass (and before enough samples).
const CONTINUE_FILL: f64 = 0.5;

/// Continue threshold when smart prediction is disabled.
const PLAIN_CONTINUE_FILL: f64 = 0.8;

/// Recent per-page result counts for one key.
#[derive(Debug, Clone, Default)]
pub struct PaginationPattern {
    fills: VecDeque<usize>,
}

impl PaginationPattern {
    fn push(&mut self, results: usize) {
        self.fills.push_back(results);
        while self.fills.len() > HISTORY_LEN {
            self.fills.pop_front();
        }
    }

    fn last_three(&self) -> Option<[usize; 3]> {
        let n = self.fills.len();
        if n < MIN_SAMPLES {
            return None;
        }
        Some([self.fills[n - 3], self.fills[n - 2], self.fills[n - 1]])
    }
}

/// Shared predictor; one pattern per key.
#[derive(Debug)]
pub struct PaginationPredictor {
    smart: bool,
    patterns: KeyedState<PaginationPattern>,
}

impl Default for PaginationPredictor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PaginationPredictor {
    /// `smart = false` falls back to "continue while pages are ≥ 80% full".
    #[must_use]
    pub fn new(smart: bool) -> Self {
        Self {
            smart,
            patterns: KeyedState::new(),
        }
    }

    /// Records `results_in_page` and decides whether another page is worth
    /// requesting.
    pub fn should_continue(
        &self,
        key: &str,
        page_index: u32,
        results_in_page: usize,
        page_limit: u32,
    ) -> bool {
        let limit = f64::from(page_limit);
        let results = results_in_page as f64;

        if !self.smart {
            return results >= limit * PLAIN_CONTINUE_FILL;
        }

        self.patterns.with(key, |pattern| {
            pattern.push(results_in_page);

            if let Some(recent) = pattern.last_three() {
                if recent.iter().all(|r| (*r as f64) < limit * LOW_FILL) {
                    debug!(key, page_index, ?recent, "three sparse pages, stopping");
                    return false;
                }

                let decreasing = recent.windows(2).all(|w| w[0] > w[1]);
                if decreasing && results < limit * TREND_FILL {
                    debug!(key, page_index, ?recent, "falling fill trend, stopping");
                    return false;
                }
            }

            results >= limit * CONTINUE_FILL
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_heuristic_before_three_samples() {
        let predictor = PaginationPredictor::default();
        assert!(predictor.should_continue("k", 0, 50, 100));
        assert!(!predictor.should_continue("k2", 0, 49, 100));
    }

    #[test]
    fn three_sparse_pages_stop() {
        let predictor = PaginationPredictor::default();
        // Each page is 5% full; the first two already fail the 50% rule on
        // their own, the third trips the sparse-pattern rule.
        predictor.should_continue("k", 0, 5, 100);
        predictor.should_continue("k", 1, 5, 100);
        assert!(!predictor.should_continue("k", 2, 5, 100));
    }

    #[test]
    fn full_pages_keep_going() {
        let predictor = PaginationPredictor::default();
        for page in 0..15 {
            assert!(predictor.should_continue("k", page, 100, 100));
        }
    }

    #[test]
    fn decreasing_trend_with_low_last_page_stops() {
        let predictor = PaginationPredictor::default();
        assert!(predictor.should_continue("k", 0, 90, 100));
        assert!(predictor.should_continue("k", 1, 60, 100));
        assert!(!predictor.should_continue("k", 2, 15, 100));
    }

    #[test]
    fn decreasing_trend_with_healthy_last_page_continues() {
        let predictor = PaginationPredictor::default();
        predictor.should_continue("k", 0, 100, 100);
        predictor.should_continue("k", 1, 90, 100);
        assert!(predictor.should_continue("k", 2, 80, 100));
    }

    #[test]
    fn plain_mode_uses_eighty_percent() {
        let predictor = PaginationPredictor::new(false);
        assert!(predictor.should_continue("k", 0, 80, 100));
        assert!(!predictor.should_continue("k", 0, 79, 100));
    }

    #[test]
    fn history_is_bounded() {
        let mut pattern = PaginationPattern::default();
        for i in 0..25 {
            pattern.push(i);
        }
        assert_eq!(pattern.fills.len(), HISTORY_LEN);
        assert_eq!(pattern.last_three(), Some([22, 23, 24]));
    }
}
