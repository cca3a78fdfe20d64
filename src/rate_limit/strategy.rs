//! Rate limiting strategies.
//!
//! A strategy turns the state kept in a [`RateLimitStore`] into a
//! [`RateLimitDecision`]. Strategies hold only their immutable policy, so the
//! same instance serves every key and every request.

use super::bucket::TokenBucketParams;
use super::store::RateLimitStore;
use super::types::{RateLimitAlgorithm, RateLimitConfig, RateLimitDecision, RateLimitKey};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Decision procedure for one rate limiting algorithm
#[async_trait]
pub trait RateLimitStrategy: Send + Sync {
    /// Record the current request for `key` and decide whether it is admitted
    async fn evaluate(
        &self,
        store: &dyn RateLimitStore,
        key: &RateLimitKey,
        now_ms: u64,
    ) -> Result<RateLimitDecision>;

    fn algorithm(&self) -> RateLimitAlgorithm;
}

/// Build the strategy selected by a policy
pub fn strategy_for(config: &RateLimitConfig) -> Arc<dyn RateLimitStrategy> {
    match config.algorithm {
        RateLimitAlgorithm::FixedWindow => Arc::new(FixedWindow::new(config)),
        RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindow::new(config)),
        RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucket::new(config)),
    }
}

/// One counter per aligned window.
///
/// Cheap, but a client can spend a full quota at the end of one window and
/// another at the start of the next: up to twice the limit across the seam.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    limit: u64,
    window_ms: u64,
}

impl FixedWindow {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.limit as u64,
            window_ms: config.window_ms(),
        }
    }
}

#[async_trait]
impl RateLimitStrategy for FixedWindow {
    async fn evaluate(
        &self,
        store: &dyn RateLimitStore,
        key: &RateLimitKey,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let window_index = now_ms / self.window_ms;
        let window_end = (window_index + 1).saturating_mul(self.window_ms);

        let count = store
            .increment_with_expiry(&key.window_key(window_index), window_end.saturating_sub(now_ms))
            .await?;

        Ok(RateLimitDecision {
            limited: count > self.limit,
            remaining: self.limit.saturating_sub(count),
            reset_at_ms: window_end,
        })
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::FixedWindow
    }
}

/// Weight of the previous window's count at `now_ms`.
///
/// 1.0 at the first millisecond of the current window, falling linearly
/// toward 0.0 at its end. Uses the same epoch alignment as the window index.
pub fn previous_window_weight(now_ms: u64, window_ms: u64) -> f64 {
    1.0 - (now_ms % window_ms) as f64 / window_ms as f64
}

/// Sliding estimate of requests in the last `window_ms`, before flooring
pub fn weighted_estimate(current: u64, previous: u64, now_ms: u64, window_ms: u64) -> f64 {
    current as f64 + previous as f64 * previous_window_weight(now_ms, window_ms)
}

/// Sliding estimate of requests in the last `window_ms`
pub fn weighted_count(current: u64, previous: u64, now_ms: u64, window_ms: u64) -> u64 {
    weighted_estimate(current, previous, now_ms, window_ms).floor() as u64
}

/// Current window count plus a decaying share of the previous window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u64,
    window_ms: u64,
}

impl SlidingWindow {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.limit as u64,
            window_ms: config.window_ms(),
        }
    }
}

#[async_trait]
impl RateLimitStrategy for SlidingWindow {
    async fn evaluate(
        &self,
        store: &dyn RateLimitStore,
        key: &RateLimitKey,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let window_index = now_ms / self.window_ms;

        // Two windows, so the counter is still readable as "previous" for
        // the whole of the next window.
        let current = store
            .increment_with_expiry(&key.window_key(window_index), self.window_ms.saturating_mul(2))
            .await?;
        let previous = match window_index.checked_sub(1) {
            Some(index) => store.get(&key.window_key(index)).await?,
            None => 0,
        };

        let weighted = weighted_count(current, previous, now_ms, self.window_ms);

        Ok(RateLimitDecision {
            limited: weighted > self.limit,
            remaining: self.limit.saturating_sub(weighted),
            reset_at_ms: (window_index + 1).saturating_mul(self.window_ms),
        })
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::SlidingWindow
    }
}

/// Bursts up to `max_burst_size`, refilled at `limit / window_secs` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: RateLimitConfig,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl RateLimitStrategy for TokenBucket {
    async fn evaluate(
        &self,
        store: &dyn RateLimitStore,
        key: &RateLimitKey,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let params = TokenBucketParams::from_config(&self.config, now_ms);
        let mut decision = store.refill_and_consume(&key.to_string(), &params).await?;

        // A bucket larger than the limit must not advertise more than the limit.
        decision.remaining = decision.remaining.min(self.config.limit as u64);
        Ok(decision)
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::TokenBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::{Clock, ManualClock};
    use crate::rate_limit::local::LocalStore;
    use std::sync::Mutex;
    use std::time::Duration;

    const START_MS: u64 = 1_700_000_000_000;

    fn local_store(clock: &ManualClock) -> LocalStore {
        LocalStore::with_clock(Arc::new(clock.clone()))
    }

    /// Records increments instead of counting, to inspect keys and TTLs
    #[derive(Default)]
    struct RecordingStore {
        increments: Mutex<Vec<(String, u64)>>,
        reads: Mutex<Vec<String>>,
        value: u64,
    }

    #[async_trait]
    impl RateLimitStore for RecordingStore {
        async fn increment_with_expiry(&self, key: &str, ttl_ms: u64) -> Result<u64> {
            self.increments
                .lock()
                .unwrap()
                .push((key.to_string(), ttl_ms));
            Ok(self.value)
        }

        async fn get(&self, key: &str) -> Result<u64> {
            self.reads.lock().unwrap().push(key.to_string());
            Ok(self.value)
        }

        async fn refill_and_consume(
            &self,
            _key: &str,
            params: &TokenBucketParams,
        ) -> Result<RateLimitDecision> {
            Ok(RateLimitDecision::allowed(
                self.value,
                params.now_ms + params.window_ms,
            ))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn test_strategy_for_selects_algorithm() {
        for algorithm in [
            RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithm::TokenBucket,
        ] {
            let config = RateLimitConfig::new(10, 60, algorithm);
            assert_eq!(strategy_for(&config).algorithm(), algorithm);
        }
    }

    #[tokio::test]
    async fn test_fixed_window_key_and_ttl() {
        let store = RecordingStore {
            value: 1,
            ..Default::default()
        };
        let strategy = FixedWindow::new(&RateLimitConfig::new(10, 60, RateLimitAlgorithm::FixedWindow));
        let key = RateLimitKey::new("api", "10.0.0.1");

        // 15s into window 2
        let decision = strategy.evaluate(&store, &key, 135_000).await.unwrap();

        let increments = store.increments.lock().unwrap();
        assert_eq!(increments.as_slice(), &[("api:10.0.0.1:2".to_string(), 45_000)]);
        assert_eq!(decision.reset_at_ms, 180_000);
        assert_eq!(decision.remaining, 9);
    }

    #[tokio::test]
    async fn test_fixed_window_bound() {
        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);
        let strategy = FixedWindow::new(&RateLimitConfig::new(5, 60, RateLimitAlgorithm::FixedWindow));
        let key = RateLimitKey::new("api", "client");

        for i in 0..5 {
            let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
            assert!(!decision.limited, "Request {} should be allowed", i);
            assert_eq!(decision.remaining, 4 - i);
        }

        for _ in 0..3 {
            let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
            assert!(decision.limited);
            assert_eq!(decision.remaining, 0);
            assert!(decision.reset_at_ms > clock.now_ms());
        }
    }

    #[tokio::test]
    async fn test_fixed_window_rollover_resets_quota() {
        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);
        let strategy = FixedWindow::new(&RateLimitConfig::new(3, 10, RateLimitAlgorithm::FixedWindow));
        let key = RateLimitKey::new("api", "client");

        let mut reset_at = 0;
        for _ in 0..3 {
            reset_at = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().reset_at_ms;
        }
        assert!(strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited);

        clock.set(reset_at);
        let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
        assert!(!decision.limited);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn test_sliding_window_weight() {
        assert_eq!(previous_window_weight(60_000, 60_000), 1.0);
        assert_eq!(previous_window_weight(90_000, 60_000), 0.5);
        assert_eq!(weighted_count(3, 10, 90_000, 60_000), 8);
        assert_eq!(weighted_count(3, 10, 119_999, 60_000), 3);
    }

    #[test]
    fn test_sliding_window_monotonic_decay() {
        let window_ms = 10_000;
        let mut last = f64::MAX;
        let mut last_count = u64::MAX;

        for now_ms in (50_000..60_000).step_by(250) {
            let estimate = weighted_estimate(4, 20, now_ms, window_ms);
            let count = weighted_count(4, 20, now_ms, window_ms);
            assert!(estimate < last, "estimate must strictly decrease at {}", now_ms);
            assert!(count <= last_count);
            last = estimate;
            last_count = count;
        }
    }

    #[tokio::test]
    async fn test_sliding_window_reads_previous_window() {
        let store = RecordingStore {
            value: 2,
            ..Default::default()
        };
        let strategy =
            SlidingWindow::new(&RateLimitConfig::new(10, 60, RateLimitAlgorithm::SlidingWindow));
        let key = RateLimitKey::new("api", "10.0.0.1");

        let decision = strategy.evaluate(&store, &key, 150_000).await.unwrap();

        assert_eq!(
            store.increments.lock().unwrap().as_slice(),
            &[("api:10.0.0.1:2".to_string(), 120_000)]
        );
        assert_eq!(store.reads.lock().unwrap().as_slice(), &["api:10.0.0.1:1".to_string()]);
        // 2 + 2 * 0.5
        assert_eq!(decision.remaining, 7);
        assert_eq!(decision.reset_at_ms, 180_000);
    }

    #[tokio::test]
    async fn test_sliding_window_smooths_boundary() {
        let clock = ManualClock::new(100_000);
        let store = local_store(&clock);
        let strategy =
            SlidingWindow::new(&RateLimitConfig::new(10, 10, RateLimitAlgorithm::SlidingWindow));
        let key = RateLimitKey::new("api", "client");

        for _ in 0..10 {
            assert!(!strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited);
        }
        assert!(strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited);

        // Halfway through the next window the previous 11 still weigh 5.5
        clock.set(115_000);
        let mut allowed = 0;
        for _ in 0..10 {
            if !strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn test_token_bucket_burst_then_throttle() {
        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);
        let config = RateLimitConfig::new(5, 10, RateLimitAlgorithm::TokenBucket).with_max_burst_size(5);
        let strategy = TokenBucket::new(&config);
        let key = RateLimitKey::new("api", "client");

        for i in 0..5 {
            let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
            assert!(!decision.limited, "Request {} should be allowed", i);
            assert_eq!(decision.remaining, 4 - i);
        }

        let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
        assert!(decision.limited);
        assert_eq!(decision.reset_at_ms, START_MS + 2_000);

        clock.advance(Duration::from_secs(2));
        assert!(!strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited);
        assert!(strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap().limited);
    }

    #[tokio::test]
    async fn test_token_bucket_remaining_capped_at_limit() {
        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);
        let config = RateLimitConfig::new(5, 10, RateLimitAlgorithm::TokenBucket).with_max_burst_size(20);
        let strategy = TokenBucket::new(&config);
        let key = RateLimitKey::new("api", "client");

        let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
        assert!(!decision.limited);
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test]
    async fn test_decisions_stay_within_bounds() {
        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);
        let limit = 4;

        for algorithm in [
            RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithm::TokenBucket,
        ] {
            let strategy = strategy_for(&RateLimitConfig::new(limit, 2, algorithm));
            let key = RateLimitKey::new(algorithm.to_string(), "client");
            for step in 0..200u64 {
                clock.advance(Duration::from_millis(37 * (step % 5)));
                let now = clock.now_ms();
                let decision = strategy.evaluate(&store, &key, now).await.unwrap();
                assert!(decision.remaining <= limit as u64);
                assert!(decision.reset_at_ms > now, "{} reset must be in the future", algorithm);
                if decision.limited {
                    assert_eq!(decision.remaining, 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_long_windows_do_not_overflow() {
        use crate::rate_limit::types::MAX_WINDOW_SECS;

        let clock = ManualClock::new(START_MS);
        let store = local_store(&clock);

        for window_secs in [MAX_WINDOW_SECS, 10_000_000_000_000_000] {
            for algorithm in [
                RateLimitAlgorithm::FixedWindow,
                RateLimitAlgorithm::SlidingWindow,
                RateLimitAlgorithm::TokenBucket,
            ] {
                let strategy = strategy_for(&RateLimitConfig::new(3, window_secs, algorithm));
                let key = RateLimitKey::new(format!("{}-{}", algorithm, window_secs), "client");

                for _ in 0..3 {
                    let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
                    assert!(!decision.limited);
                    assert!(decision.reset_at_ms > clock.now_ms());
                }
                let decision = strategy.evaluate(&store, &key, clock.now_ms()).await.unwrap();
                assert!(decision.limited, "{} over {}s must still limit", algorithm, window_secs);
            }
        }
    }
}
