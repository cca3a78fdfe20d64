use super::clock::{Clock, SystemClock};
use super::local::{LocalStore, DEFAULT_SWEEP_INTERVAL};
use super::redis::RedisStore;
use super::store::RateLimitStore;
use super::strategy::{strategy_for, RateLimitStrategy};
use super::types::{RateLimitConfig, RateLimitDecision, RateLimitKey};
use crate::error::{RateLimitError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default upper bound on a single backend call
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Rate limiter service: one policy, one strategy, one store
pub struct RateLimiterService {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    strategy: Arc<dyn RateLimitStrategy>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl RateLimiterService {
    /// Create a service over an existing store
    ///
    /// Fails if the policy can never admit a request.
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Result<Self> {
        config.validate()?;

        info!(
            "Initializing {} rate limiter on {} store (limit={}, window={}s, namespace={})",
            config.algorithm,
            store.name(),
            config.limit,
            config.window_secs,
            config.key_namespace
        );

        Ok(Self {
            strategy: strategy_for(&config),
            config,
            store,
            clock: Arc::new(SystemClock::new()),
            timeout: DEFAULT_BACKEND_TIMEOUT,
        })
    }

    /// Create a service with an in-process store
    ///
    /// Inside a Tokio runtime a background sweeper evicts expired entries.
    pub fn local_only(config: RateLimitConfig) -> Result<Self> {
        let store = Arc::new(LocalStore::new());
        if tokio::runtime::Handle::try_current().is_ok() {
            store.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
        }
        Self::new(config, store)
    }

    /// Create a service backed by Redis
    ///
    /// A failed ping is logged but does not prevent construction: requests
    /// fail open until Redis becomes reachable.
    pub async fn with_redis(config: RateLimitConfig, redis_url: &str) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(redis_url).await?;

        match store.ping().await {
            Ok(()) => info!("Redis connection successful"),
            Err(e) => warn!("Redis ping failed: {}, requests will fail open", e),
        }

        Self::new(config, Arc::new(store))
    }

    /// Use a different clock (shared with the store in tests)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every backend call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record a request from `client_id` and decide whether it is admitted
    pub async fn check(&self, client_id: &str) -> Result<RateLimitDecision> {
        self.check_at(client_id, self.clock.now_ms()).await
    }

    /// Like [`check`](Self::check), evaluated at a caller-supplied `now_ms`
    ///
    /// Callers that derive more values from the decision (such as
    /// `Retry-After`) pass the same instant to both.
    pub async fn check_at(&self, client_id: &str, now_ms: u64) -> Result<RateLimitDecision> {
        let key = RateLimitKey::new(self.config.key_namespace.as_str(), client_id);

        let decision = tokio::time::timeout(
            self.timeout,
            self.strategy.evaluate(self.store.as_ref(), &key, now_ms),
        )
        .await
        .map_err(|_| RateLimitError::Timeout(self.timeout))??;

        debug!(
            "{} check for key {}: limited={}, remaining={}, reset_at={}",
            self.config.algorithm, key, decision.limited, decision.remaining, decision.reset_at_ms
        );

        Ok(decision)
    }

    /// Current time according to the service clock (epoch ms)
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Name of the backing store
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }
}
