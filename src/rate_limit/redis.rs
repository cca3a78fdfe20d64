use super::bucket::TokenBucketParams;
use super::lua_scripts::{INCREMENT_WITH_EXPIRY_SCRIPT, TOKEN_BUCKET_SCRIPT};
use super::store::RateLimitStore;
use super::types::RateLimitDecision;
use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use tracing::{debug, info};

/// Redis-backed rate limit store shared by every limiter instance.
///
/// Counters and buckets are only mutated through server-side scripts, so
/// each operation is a single atomic round trip regardless of how many
/// processes talk to the same Redis.
pub struct RedisStore {
    /// Redis connection manager (cheap to clone, reconnects on failure)
    connection: ConnectionManager,
    increment_script: Script,
    token_bucket_script: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis rate limit store");

        Ok(Self::with_connection(connection))
    }

    /// Wrap an existing connection manager
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_script: Script::new(INCREMENT_WITH_EXPIRY_SCRIPT),
            token_bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }
}

/// Convert the `[limited, remaining, reset_at]` script reply
fn decision_from_reply(reply: &[i64]) -> Result<RateLimitDecision> {
    match reply {
        [limited, remaining, reset_at] => Ok(RateLimitDecision {
            limited: *limited == 1,
            remaining: (*remaining).max(0) as u64,
            reset_at_ms: (*reset_at).max(0) as u64,
        }),
        other => Err(RateLimitError::Backend(format!(
            "Unexpected token bucket reply with {} elements",
            other.len()
        ))),
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment_with_expiry(&self, key: &str, ttl_ms: u64) -> Result<u64> {
        let mut connection = self.connection.clone();
        let value = self
            .increment_script
            .key(key)
            .arg(ttl_ms)
            .invoke_async::<_, u64>(&mut connection)
            .await?;

        debug!("Counter {} incremented to {}", key, value);
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let mut connection = self.connection.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<u64>>(&mut connection)
            .await?;

        Ok(value.unwrap_or(0))
    }

    async fn refill_and_consume(
        &self,
        key: &str,
        params: &TokenBucketParams,
    ) -> Result<RateLimitDecision> {
        let mut connection = self.connection.clone();
        let reply = self
            .token_bucket_script
            .key(key)
            .arg(params.now_ms)
            .arg(params.refill_rate_per_sec)
            .arg(params.max_tokens)
            .arg(params.window_ms)
            .arg(params.ttl_ms)
            .invoke_async::<_, Vec<i64>>(&mut connection)
            .await?;

        decision_from_reply(&reply)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
