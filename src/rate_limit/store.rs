use super::bucket::TokenBucketParams;
use super::types::RateLimitDecision;
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for rate limit state.
///
/// Implemented by [`LocalStore`](super::local::LocalStore) for a single
/// process and by [`RedisStore`](super::redis::RedisStore) when several
/// instances must share counters. Strategies only talk to this trait, so each
/// one works unchanged over either backend.
///
/// Every mutation must be atomic with respect to concurrent callers of the
/// same store: two requests for one key may never both observe the state
/// before the other's write.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment a counter, creating it at zero if absent.
    ///
    /// The expiry is set only when the counter is created; later increments
    /// do not extend it. Returns the post-increment value.
    async fn increment_with_expiry(&self, key: &str, ttl_ms: u64) -> Result<u64>;

    /// Read a counter without modifying it. Missing or expired counters read as 0.
    async fn get(&self, key: &str) -> Result<u64>;

    /// Run the token bucket refill-then-consume step as one atomic unit.
    async fn refill_and_consume(
        &self,
        key: &str,
        params: &TokenBucketParams,
    ) -> Result<RateLimitDecision>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

