//! Token bucket arithmetic.
//!
//! [`refill_and_consume`] is the exact sequence the Redis script in
//! `lua_scripts::TOKEN_BUCKET_SCRIPT` runs. Any change here must be mirrored
//! there; floor/ceil placement decides who gets admitted at the boundaries.

use super::types::{RateLimitConfig, RateLimitDecision};

/// Parameters of a single refill-then-consume step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketParams {
    /// Current time (epoch milliseconds)
    pub now_ms: u64,
    /// Tokens added per second
    pub refill_rate_per_sec: f64,
    /// Bucket capacity
    pub max_tokens: u32,
    /// Window length, used for the reset time of admitted requests
    pub window_ms: u64,
    /// How long an untouched bucket is kept by the store
    pub ttl_ms: u64,
}

impl TokenBucketParams {
    /// Derive parameters from a policy at `now_ms`
    pub fn from_config(config: &RateLimitConfig, now_ms: u64) -> Self {
        let refill_rate_per_sec = config.refill_rate_per_sec();
        let max_tokens = config.burst_size();
        let window_ms = config.window_ms();

        // Once a bucket could have refilled completely it is equivalent to a
        // fresh one, so it may expire.
        let full_refill_ms = (max_tokens as f64 / refill_rate_per_sec * 1000.0).ceil() as u64;

        Self {
            now_ms,
            refill_rate_per_sec,
            max_tokens,
            window_ms,
            ttl_ms: window_ms.saturating_mul(2).max(full_refill_ms),
        }
    }
}

/// Persisted bucket state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

impl BucketState {
    /// A full bucket whose refill clock starts now
    pub fn full(max_tokens: u32, now_ms: u64) -> Self {
        Self {
            tokens: max_tokens as f64,
            last_refill_ms: now_ms,
        }
    }
}

/// Refill the bucket for elapsed time, then try to take one token.
///
/// Returns the state to store and the decision. `remaining` is the raw token
/// count; the strategy clamps it to the configured limit.
pub fn refill_and_consume(
    state: Option<BucketState>,
    params: &TokenBucketParams,
) -> (BucketState, RateLimitDecision) {
    let now = params.now_ms;
    let max_tokens = params.max_tokens as f64;
    let BucketState {
        tokens,
        mut last_refill_ms,
    } = state.unwrap_or_else(|| BucketState::full(params.max_tokens, now));

    let elapsed_secs = now.saturating_sub(last_refill_ms) as f64 / 1000.0;
    let new_tokens = max_tokens.min(tokens + (elapsed_secs * params.refill_rate_per_sec).floor());

    // Only move the refill clock when whole tokens were added, so partial
    // progress toward the next token is kept.
    if new_tokens > tokens {
        last_refill_ms = now;
    }

    if new_tokens >= 1.0 {
        let left = new_tokens - 1.0;
        let state = BucketState {
            tokens: left,
            last_refill_ms,
        };
        return (
            state,
            RateLimitDecision::allowed(left as u64, now.saturating_add(params.window_ms)),
        );
    }

    let wait_ms = ((1.0 - tokens) * (1000.0 / params.refill_rate_per_sec)).ceil() as u64;
    let state = BucketState {
        tokens: new_tokens,
        last_refill_ms,
    };
    (state, RateLimitDecision::limited(now.saturating_add(wait_ms)))
}
