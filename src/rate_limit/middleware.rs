use super::service::RateLimiterService;
use super::types::{RateLimitDecision, RateLimitKey};
use crate::error::{RateLimitError, Result};
use crate::metrics::{record_backend_error, record_decision};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_RESOURCE: HeaderName = HeaderName::from_static("x-ratelimit-resource");

/// Client identifier used when the caller address is unavailable
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the partition key for a request
pub type KeyResolver = Arc<dyn Fn(&Request) -> String + Send + Sync>;
/// Requests for which this returns true bypass the limiter
pub type SkipPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
/// Builds the response sent to a rejected client
pub type RejectionHandler =
    Arc<dyn Fn(&RateLimitDecision, &MiddlewareOptions) -> Response + Send + Sync>;

/// Response behaviour of the middleware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiddlewareOptions {
    /// Send `X-RateLimit-*` on admitted responses too, not only on rejections
    #[serde(default = "default_true")]
    pub always_send_headers: bool,
    /// Value of `X-RateLimit-Resource` on rejections
    #[serde(default = "default_header_name")]
    pub header_name: String,
    /// Status code of rejections
    #[serde(default = "default_status_code")]
    pub status_code: u16,
}

fn default_true() -> bool {
    true
}

fn default_header_name() -> String {
    "Global".to_string()
}

fn default_status_code() -> u16 {
    StatusCode::TOO_MANY_REQUESTS.as_u16()
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            always_send_headers: default_true(),
            header_name: default_header_name(),
            status_code: default_status_code(),
        }
    }
}

impl MiddlewareOptions {
    /// Validate the status code and resource header value
    pub fn validate(&self) -> Result<()> {
        let status = StatusCode::from_u16(self.status_code).map_err(|_| {
            RateLimitError::Config(format!("Invalid status code: {}", self.status_code))
        })?;
        if !(status.is_client_error() || status.is_server_error()) {
            return Err(RateLimitError::Config(format!(
                "Rejection status code must be 4xx or 5xx, got {}",
                self.status_code
            )));
        }

        if HeaderValue::from_str(&self.header_name).is_err() {
            return Err(RateLimitError::Config(format!(
                "Invalid resource header value: {:?}",
                self.header_name
            )));
        }

        Ok(())
    }

    /// Rejection status, falling back to 429 if unvalidated options hold garbage
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    /// The rate limiter service
    service: Arc<RateLimiterService>,
    options: Arc<MiddlewareOptions>,
    key_resolver: KeyResolver,
    skip: Option<SkipPredicate>,
    on_limited: RejectionHandler,
}

impl RateLimitMiddleware {
    /// Create a middleware keyed by client IP with default options
    pub fn new(service: Arc<RateLimiterService>) -> Self {
        Self {
            service,
            options: Arc::new(MiddlewareOptions::default()),
            key_resolver: Arc::new(client_ip),
            skip: None,
            on_limited: Arc::new(default_rejection),
        }
    }

    /// Replace the response options
    pub fn with_options(mut self, options: MiddlewareOptions) -> Result<Self> {
        options.validate()?;
        self.options = Arc::new(options);
        Ok(self)
    }

    /// Partition requests by something other than the client IP
    pub fn with_key_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_resolver = Arc::new(resolver);
        self
    }

    /// Let matching requests through without counting them
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Replace the 429 JSON response
    pub fn with_rejection_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RateLimitDecision, &MiddlewareOptions) -> Response + Send + Sync + 'static,
    {
        self.on_limited = Arc::new(handler);
        self
    }

    pub fn options(&self) -> &MiddlewareOptions {
        &self.options
    }

    /// Apply rate limiting to a request
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        if self.skip.as_ref().is_some_and(|skip| skip(&request)) {
            record_decision("skipped");
            return next.run(request).await;
        }

        let mut client_id = (self.key_resolver)(&request);
        if client_id.is_empty() {
            client_id = UNKNOWN_CLIENT.to_string();
        }

        let now_ms = self.service.now_ms();
        let decision = match self.service.check_at(&client_id, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                // Fail open: a limiter outage must not take the service down.
                error!(
                    "Rate limit backend failure for client {}, allowing request: {}",
                    client_id, e
                );
                record_backend_error(self.service.store_name());
                return next.run(request).await;
            }
        };

        let limit = self.service.config().limit;

        if decision.limited {
            let key = RateLimitKey::new(self.service.config().key_namespace.as_str(), client_id);
            warn!(
                "Rate limit exceeded for key: {} (limit={}, remaining={}, reset_at={})",
                key, limit, decision.remaining, decision.reset_at_ms
            );
            record_decision("limited");

            let mut response = (self.on_limited)(&decision, &self.options);
            apply_rate_limit_headers(
                response.headers_mut(),
                limit,
                &decision,
                now_ms,
                Some(self.options.header_name.as_str()),
            );
            return response;
        }

        debug!(
            "Rate limit check passed for client {}, remaining: {}",
            client_id, decision.remaining
        );
        record_decision("allowed");

        let mut response = next.run(request).await;
        if self.options.always_send_headers {
            apply_rate_limit_headers(response.headers_mut(), limit, &decision, now_ms, None);
        }
        response
    }
}

/// Axum middleware function for rate limiting
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
/// ```
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    limiter.handle(request, next).await
}

/// Default key resolver: the caller's IP address, or `"unknown"`
pub fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Default rejection: configured status with a JSON error body
pub fn default_rejection(_decision: &RateLimitDecision, options: &MiddlewareOptions) -> Response {
    let body = serde_json::json!({
        "error": "Too Many Requests",
        "message": "You have exceeded the rate limit. Please try again later.",
    });

    (options.status(), Json(body)).into_response()
}

/// Set `X-RateLimit-*` headers, plus `Retry-After` and the resource name on rejections
pub fn apply_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    decision: &RateLimitDecision,
    now_ms: u64,
    resource: Option<&str>,
) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_ms));

    if decision.limited {
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs(now_ms)),
        );
        if let Some(value) = resource.and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(X_RATELIMIT_RESOURCE, value);
        }
    }
}
