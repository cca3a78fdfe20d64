use crate::error::{RateLimitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    /// Counter per fixed window (simple, permits a burst at the seam)
    #[default]
    FixedWindow,
    /// Weighted blend of the current and previous window
    SlidingWindow,
    /// Burst up to a ceiling, refilled at a constant rate
    TokenBucket,
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimitAlgorithm::FixedWindow => "fixed-window",
            RateLimitAlgorithm::SlidingWindow => "sliding-window",
            RateLimitAlgorithm::TokenBucket => "token-bucket",
        };
        f.write_str(name)
    }
}

/// Rate limit policy
///
/// Built once when the limiter is constructed and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed per window
    pub limit: u32,
    /// Time window for the limit (in seconds)
    pub window_secs: u64,
    /// Algorithm used to evaluate requests
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
    /// Bucket capacity for the token bucket (defaults to `limit`)
    #[serde(default)]
    pub max_burst_size: Option<u32>,
    /// Prefix separating independently configured limiters
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,
}

/// Longest accepted window (one year)
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

fn default_key_namespace() -> String {
    "rate-limit".to_string()
}

impl RateLimitConfig {
    /// Create a policy with the default namespace and no explicit burst
    pub fn new(limit: u32, window_secs: u64, algorithm: RateLimitAlgorithm) -> Self {
        Self {
            limit,
            window_secs,
            algorithm,
            max_burst_size: None,
            key_namespace: default_key_namespace(),
        }
    }

    /// Set the token bucket capacity
    pub fn with_max_burst_size(mut self, burst: u32) -> Self {
        self.max_burst_size = Some(burst);
        self
    }

    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key_namespace = namespace.into();
        self
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }

    /// Get burst size (defaults to limit if not specified)
    pub fn burst_size(&self) -> u32 {
        self.max_burst_size.unwrap_or(self.limit)
    }

    /// Tokens granted per second by the token bucket
    pub fn refill_rate_per_sec(&self) -> f64 {
        self.limit as f64 / self.window_secs as f64
    }

    /// Reject policies that can never admit a request
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(RateLimitError::Config(
                "Rate limit must be > 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(RateLimitError::Config(
                "Rate limit window must be > 0".to_string(),
            ));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(RateLimitError::Config(format!(
                "Rate limit window must be at most {} seconds, got {}",
                MAX_WINDOW_SECS, self.window_secs
            )));
        }
        if self.max_burst_size == Some(0) {
            return Err(RateLimitError::Config(
                "Max burst size must be > 0".to_string(),
            ));
        }
        if self.key_namespace.is_empty() {
            return Err(RateLimitError::Config(
                "Key namespace cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a single strategy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request must be rejected
    pub limited: bool,
    /// Requests left before the limit is hit
    pub remaining: u64,
    /// When the quota resets (epoch milliseconds)
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Create an allowed decision
    pub fn allowed(remaining: u64, reset_at_ms: u64) -> Self {
        Self {
            limited: false,
            remaining,
            reset_at_ms,
        }
    }

    /// Create a rejected decision
    pub fn limited(reset_at_ms: u64) -> Self {
        Self {
            limited: true,
            remaining: 0,
            reset_at_ms,
        }
    }

    /// Whole seconds until reset, rounded up, for `Retry-After`
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Partition key: `namespace:client_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Namespace of the limiter that owns the key
    pub namespace: String,
    /// Identifier of the caller (e.g. IP address, API key)
    pub client_id: String,
}

impl RateLimitKey {
    /// Create a new rate limit key
    pub fn new(namespace: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            client_id: client_id.into(),
        }
    }

    /// Key for a counter belonging to a specific window
    pub fn window_key(&self, window_index: u64) -> String {
        format!("{}:{}", self, window_index)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.client_id)
    }
}
