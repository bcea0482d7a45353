//! Adaptive rate limiting for RPC traffic, built on governor.
//!
//! A search fans out up to nineteen quotes at once and a report runs several
//! searches side by side, so every RPC call waits on a shared limiter whose
//! quota shrinks when the endpoint starts failing and recovers once it
//! calms down.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);

/// Rate limiter shared by every concurrent RPC call of one client.
pub struct AdaptiveRateLimiter {
    /// Swapped out whole when the quota changes
    limiter: RwLock<Arc<DefaultDirectRateLimiter>>,
    state: Mutex<QuotaState>,
}

struct QuotaState {
    base_quota: u32,
    current_quota: u32,
    min_quota: u32,
    max_quota: u32,
    /// Outcome of the most recent calls, newest last
    outcomes: VecDeque<bool>,
    window_size: usize,
    error_threshold: f64,
    last_adjustment: Instant,
}

impl QuotaState {
    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn due_for_adjustment(&self) -> bool {
        self.outcomes.len() >= self.window_size / 2
            && self.last_adjustment.elapsed() >= ADJUSTMENT_INTERVAL
    }

    /// New quota for the current error rate, if it should change.
    fn next_quota(&self) -> Option<u32> {
        let error_rate = self.error_rate();
        let next = if error_rate > self.error_threshold {
            let factor = 1.0 - (error_rate - self.error_threshold) * 0.5;
            ((self.current_quota as f64 * factor) as u32).max(self.min_quota)
        } else if error_rate < self.error_threshold * 0.5 {
            let factor = 1.0 + (self.error_threshold * 0.5 - error_rate) * 0.2;
            // at least one step up so small quotas can recover
            let raised = ((self.current_quota as f64 * factor) as u32).max(self.current_quota + 1);
            raised.min(self.max_quota).min(self.base_quota)
        } else {
            self.current_quota
        };
        (next != self.current_quota).then_some(next)
    }
}

impl AdaptiveRateLimiter {
    pub fn new(requests_per_second: u32, error_window_size: usize, error_threshold: f64) -> Self {
        let base = requests_per_second.max(1);
        Self {
            limiter: RwLock::new(Arc::new(direct_limiter(base))),
            state: Mutex::new(QuotaState {
                base_quota: base,
                current_quota: base,
                min_quota: (base / 4).max(1),
                max_quota: base * 2,
                outcomes: VecDeque::with_capacity(error_window_size),
                window_size: error_window_size.max(1),
                error_threshold: error_threshold.clamp(0.0, 1.0),
                last_adjustment: Instant::now(),
            }),
        }
    }

    /// Wait until the current quota admits one more request.
    pub async fn until_ready(&self) {
        let limiter = match self.limiter.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        limiter.until_ready().await;
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    #[instrument(skip(self))]
    fn record(&self, success: bool) {
        let mut state = self.state();
        state.outcomes.push_back(success);
        while state.outcomes.len() > state.window_size {
            state.outcomes.pop_front();
        }

        if !state.due_for_adjustment() {
            return;
        }
        if let Some(next) = state.next_quota() {
            let error_rate = state.error_rate();
            if next < state.current_quota {
                warn!(
                    "RPC error rate {:.1}%, reducing quota from {} to {} req/s",
                    error_rate * 100.0,
                    state.current_quota,
                    next
                );
            } else {
                debug!(
                    "RPC error rate {:.1}%, raising quota from {} to {} req/s",
                    error_rate * 100.0,
                    state.current_quota,
                    next
                );
            }
            state.current_quota = next;
            state.last_adjustment = Instant::now();
            self.install(next);
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let state = self.state();
        RateLimitStats {
            base_quota: state.base_quota,
            current_quota: state.current_quota,
            error_rate: state.error_rate(),
            total_requests: state.outcomes.len(),
            successful_requests: state.outcomes.iter().filter(|ok| **ok).count(),
        }
    }

    /// Back to the base quota with an empty history.
    pub fn reset(&self) {
        let mut state = self.state();
        state.current_quota = state.base_quota;
        state.outcomes.clear();
        state.last_adjustment = Instant::now();
        self.install(state.base_quota);
    }

    fn install(&self, quota: u32) {
        let replacement = Arc::new(direct_limiter(quota));
        match self.limiter.write() {
            Ok(mut guard) => *guard = replacement,
            Err(poisoned) => *poisoned.into_inner() = replacement,
        }
    }

    fn state(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn direct_limiter(requests_per_second: u32) -> DefaultDirectRateLimiter {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(per_second))
}

#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub base_quota: u32,
    pub current_quota: u32,
    pub error_rate: f64,
    pub total_requests: usize,
    pub successful_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(limiter: &AdaptiveRateLimiter) {
        limiter.state().last_adjustment = Instant::now() - Duration::from_secs(60);
    }

    #[test]
    fn test_creation() {
        let limiter = AdaptiveRateLimiter::new(20, 100, 0.2);
        let state = limiter.state();
        assert_eq!(state.base_quota, 20);
        assert_eq!(state.current_quota, 20);
        assert_eq!(state.min_quota, 5);
        assert_eq!(state.max_quota, 40);
    }

    #[tokio::test]
    async fn test_until_ready_admits_first_request() {
        let limiter = AdaptiveRateLimiter::new(10, 100, 0.2);
        tokio::time::timeout(Duration::from_secs(1), limiter.until_ready())
            .await
            .unwrap();
    }

    #[test]
    fn test_stats_track_outcomes() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2);
        limiter.record_success();
        limiter.record_failure();
        limiter.record_success();

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert!((stats.error_rate - 0.333).abs() < 0.01);
    }

    #[test]
    fn test_window_is_bounded() {
        let limiter = AdaptiveRateLimiter::new(20, 5, 0.2);
        for _ in 0..10 {
            limiter.record_success();
        }
        assert_eq!(limiter.stats().total_requests, 5);
    }

    #[test]
    fn test_no_adjustment_inside_interval() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2);
        for _ in 0..10 {
            limiter.record_failure();
        }
        assert_eq!(limiter.stats().current_quota, 20);
    }

    #[test]
    fn test_quota_drops_on_errors_and_recovers() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2);
        for _ in 0..9 {
            limiter.record_failure();
        }
        backdate(&limiter);
        limiter.record_failure();

        let reduced = limiter.stats().current_quota;
        assert!(reduced < 20);
        assert!(reduced >= 5);

        for _ in 0..9 {
            limiter.record_success();
        }
        backdate(&limiter);
        limiter.record_success();
        assert!(limiter.stats().current_quota > reduced);
    }

    #[test]
    fn test_reset() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2);
        for _ in 0..9 {
            limiter.record_failure();
        }
        backdate(&limiter);
        limiter.record_failure();
        limiter.reset();

        let stats = limiter.stats();
        assert_eq!(stats.current_quota, 20);
        assert_eq!(stats.total_requests, 0);
    }
}
