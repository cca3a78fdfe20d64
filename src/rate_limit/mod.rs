//! Rate limiting module
//!
//! Admission control for inbound requests with three interchangeable
//! algorithms over two interchangeable stores:
//!
//! - **Fixed Window**: one counter per aligned window (cheap, bursty at the seam)
//! - **Sliding Window**: current window plus a decaying share of the previous one
//! - **Token Bucket**: bursts up to a ceiling, refilled at a constant rate
//!
//! State lives either in-process ([`LocalStore`]) or in Redis ([`RedisStore`]),
//! where every mutation runs as a single atomic script so that several
//! instances enforce one shared limit.
//!
//! # Features
//!
//! - Partitioning by client IP or any custom key
//! - Rate limit headers in responses (`X-RateLimit-*`, `Retry-After`)
//! - Fail-open on backend errors and timeouts
//!
//! # Example
//!
//! ```rust,no_run
//! use admission::rate_limit::{
//!     rate_limit_middleware, RateLimitAlgorithm, RateLimitConfig, RateLimitMiddleware,
//!     RateLimiterService,
//! };
//! use axum::{routing::get, Router};
//! use std::sync::Arc;
//!
//! # fn main() -> admission::error::Result<()> {
//! let config = RateLimitConfig::new(100, 60, RateLimitAlgorithm::SlidingWindow);
//!
//! // Create local-only rate limiter
//! let service = RateLimiterService::local_only(config)?;
//!
//! // Or create Redis-backed rate limiter
//! // let service = RateLimiterService::with_redis(config, "redis://localhost:6379").await?;
//!
//! let limiter = RateLimitMiddleware::new(Arc::new(service))
//!     .with_skip(|request| request.uri().path() == "/health");
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "OK" }))
//!     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod clock;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::LocalStore;
pub use middleware::{
    apply_rate_limit_headers, client_ip, default_rejection, rate_limit_middleware,
    MiddlewareOptions, RateLimitMiddleware,
};
pub use self::redis::RedisStore;
pub use service::RateLimiterService;
pub use store::RateLimitStore;
pub use strategy::{strategy_for, FixedWindow, RateLimitStrategy, SlidingWindow, TokenBucket};
pub use types::{RateLimitAlgorithm, RateLimitConfig, RateLimitDecision, RateLimitKey};
