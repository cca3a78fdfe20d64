use super::bucket::{self, BucketState, TokenBucketParams};
use super::clock::{Clock, SystemClock};
use super::store::RateLimitStore;
use super::types::RateLimitDecision;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Sweep interval used when no explicit one is configured
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    state: BucketState,
    expires_at_ms: u64,
}

/// In-process rate limit store.
///
/// Each key lives in a `DashMap` shard and is read and written while the
/// shard lock is held, so concurrent requests in this process never lose an
/// update. State is not shared with other processes: deployments running
/// more than one instance must use [`RedisStore`](super::redis::RedisStore)
/// to enforce a single limit.
///
/// Expired entries read as absent and are overwritten in place. They are only
/// removed from the maps by [`LocalStore::purge_expired`], normally run off
/// the request path by [`LocalStore::spawn_sweeper`].
pub struct LocalStore {
    counters: DashMap<String, Counter>,
    buckets: DashMap<String, Bucket>,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Create a store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Number of live entries (counters and buckets)
    pub fn len(&self) -> usize {
        self.counters.len() + self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired counter and bucket, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.len();

        self.counters.retain(|_, counter| counter.expires_at_ms > now);
        self.buckets.retain(|_, bucket| bucket.expires_at_ms > now);

        let removed = before.saturating_sub(self.len());
        if removed > 0 {
            debug!("Evicted {} expired rate limit entries", removed);
        }
        removed
    }

    /// Sweep expired entries every `interval` until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.purge_expired();
                    }
                    None => break,
                }
            }
            debug!("Local rate limit store dropped, sweeper exiting");
        })
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for LocalStore {
    async fn increment_with_expiry(&self, key: &str, ttl_ms: u64) -> Result<u64> {
        let now = self.clock.now_ms();
        let fresh = Counter {
            value: 0,
            expires_at_ms: now.saturating_add(ttl_ms),
        };

        let value = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(fresh);
            if counter.expires_at_ms <= now {
                *counter = fresh;
            }
            counter.value += 1;
            counter.value
        };

        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let now = self.clock.now_ms();
        let value = self
            .counters
            .get(key)
            .filter(|counter| counter.expires_at_ms > now)
            .map(|counter| counter.value)
            .unwrap_or(0);
        Ok(value)
    }

    async fn refill_and_consume(
        &self,
        key: &str,
        params: &TokenBucketParams,
    ) -> Result<RateLimitDecision> {
        let now = params.now_ms;
        let expires_at_ms = now.saturating_add(params.ttl_ms);

        let decision = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let live = (current.expires_at_ms > now).then_some(current.state);
                let (state, decision) = bucket::refill_and_consume(live, params);
                entry.insert(Bucket {
                    state,
                    expires_at_ms,
                });
                decision
            }
            Entry::Vacant(entry) => {
                let (state, decision) = bucket::refill_and_consume(None, params);
                entry.insert(Bucket {
                    state,
                    expires_at_ms,
                });
                decision
            }
        };

        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
