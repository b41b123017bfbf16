//! Sliding-window request limiter per API category.
//!
//! Bitget allows roughly 20 req/s on the spot history endpoints and 10 req/s
//! on the mix (futures) endpoints; the defaults stay below both. Each
//! category keeps the instants of requests issued in the trailing second
//! behind its own lock, so spot and futures traffic never contend.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::budget::{DeadlineExceeded, ExecutionBudget};

/// Width of the sliding window.
const WINDOW: Duration = Duration::from_secs(1);

/// Longest single sleep before the window is re-evaluated.
const MAX_WAIT_STEP: Duration = Duration::from_millis(500);

/// Which upstream rate-limit bucket a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCategory {
    Spot,
    Futures,
}

impl ApiCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
        }
    }
}

/// Requests per second allowed in each category.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub spot: usize,
    pub futures: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            spot: 15,
            futures: 8,
        }
    }
}

/// One category's window of recent request instants.
#[derive(Debug)]
struct Window {
    limit: usize,
    issued: Mutex<VecDeque<Instant>>,
}

impl Window {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            issued: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a slot and returns `None`, or returns how long until the
    /// oldest entry leaves the window.
    fn try_reserve(&self, now: Instant) -> Option<Duration> {
        let mut issued = self.issued.lock();
        while issued
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            issued.pop_front();
        }

        if issued.len() < self.limit {
            issued.push_back(now);
            return None;
        }

        let oldest = issued.front().copied().unwrap_or(now);
        Some(WINDOW.saturating_sub(now.duration_since(oldest)))
    }

    fn in_window(&self, now: Instant) -> usize {
        self.issued
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count()
    }
}

/// Shared limiter consulted before every exchange request.
#[derive(Debug)]
pub struct RateLimiter {
    spot: Window,
    futures: Window,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            spot: Window::new(limits.spot),
            futures: Window::new(limits.futures),
        }
    }

    fn window(&self, category: ApiCategory) -> &Window {
        match category {
            ApiCategory::Spot => &self.spot,
            ApiCategory::Futures => &self.futures,
        }
    }

    /// Waits until a request slot is free in `category`, then claims it.
    ///
    /// Sleeps in steps of at most 500 ms, re-checking both the window and
    /// the budget after every step. The lock is never held across a sleep.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineExceeded`] if the budget runs out before a slot
    /// frees up, including when it is already spent on entry.
    pub async fn acquire(
        &self,
        category: ApiCategory,
        budget: &ExecutionBudget,
    ) -> Result<(), DeadlineExceeded> {
        let context = format!("rate limiting {}", category.as_str());
        let window = self.window(category);

        loop {
            budget.check(&context)?;

            let Some(wait) = window.try_reserve(Instant::now()) else {
                return Ok(());
            };

            let step = wait.min(MAX_WAIT_STEP).min(budget.remaining());
            debug!(
                category = category.as_str(),
                wait_ms = step.as_millis() as u64,
                "rate limit reached, waiting"
            );
            tokio::time::sleep(step.max(Duration::from_millis(1))).await;
        }
    }

    /// Number of requests recorded for `category` in the trailing second.
    pub fn in_flight_window(&self, category: ApiCategory) -> usize {
        self.window(category).in_window(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn budget() -> ExecutionBudget {
        ExecutionBudget::new(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(RateLimits { spot: 3, futures: 2 });
        let budget = budget();
        let start = Instant::now();

        for _ in 0..3 {
            assert_ok!(limiter.acquire(ApiCategory::Spot, &budget).await);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight_window(ApiCategory::Spot), 3);
        assert_eq!(limiter.in_flight_window(ApiCategory::Futures), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_window_to_slide() {
        let limiter = RateLimiter::new(RateLimits { spot: 2, futures: 2 });
        let budget = budget();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire(ApiCategory::Futures, &budget).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_limit() {
        let limit = 4;
        let limiter = RateLimiter::new(RateLimits {
            spot: limit,
            futures: limit,
        });
        let budget = budget();
        let mut stamps = Vec::new();

        for _ in 0..20 {
            limiter.acquire(ApiCategory::Spot, &budget).await.unwrap();
            stamps.push(Instant::now());
            tokio::time::advance(Duration::from_millis(37)).await;
        }

        for (i, t) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .filter(|s| s.duration_since(*t) < WINDOW)
                .count();
            assert!(in_window <= limit, "{in_window} requests within 1s");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spent_budget_fails_immediately() {
        let limiter = RateLimiter::default();
        let budget = ExecutionBudget::new(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        let err = assert_err!(limiter.acquire(ApiCategory::Spot, &budget).await);
        assert!(err.context.contains("spot"));
        assert_eq!(limiter.in_flight_window(ApiCategory::Spot), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_expiring_while_waiting_aborts() {
        let limiter = RateLimiter::new(RateLimits { spot: 1, futures: 1 });
        let budget = ExecutionBudget::new(Duration::from_millis(300));

        assert_ok!(limiter.acquire(ApiCategory::Spot, &budget).await);
        assert_err!(limiter.acquire(ApiCategory::Spot, &budget).await);
    }
}
