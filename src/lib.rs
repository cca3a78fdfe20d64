pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

use crate::config::{AdmissionConfig, BackendConfig, BackendKind};
use crate::error::{RateLimitError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{
    rate_limit_middleware, LocalStore, RateLimitMiddleware, RateLimitStore, RateLimiterService,
    RedisStore,
};
use axum::{routing::get, Router as AxumRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Paths that are never rate limited
const UNLIMITED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Build the configured rate limit store
pub async fn build_store(backend: &BackendConfig) -> Result<Arc<dyn RateLimitStore>> {
    match backend.kind {
        BackendKind::Local => {
            let store = Arc::new(LocalStore::new());
            if let Some(interval) = backend.sweep_interval() {
                store.spawn_sweeper(interval);
            }
            warn!("Using in-process rate limit store: limits are per instance, not shared");
            Ok(store)
        }
        BackendKind::Shared => {
            let url = backend.redis_url.as_deref().ok_or_else(|| {
                RateLimitError::Config("Shared backend requires redis_url".to_string())
            })?;
            let store = RedisStore::connect(url).await?;
            if let Err(e) = store.ping().await {
                warn!("Redis ping failed: {}, requests will fail open", e);
            }
            Ok(Arc::new(store))
        }
    }
}

/// Build the rate limiting middleware described by `config`
pub async fn build_limiter(config: &AdmissionConfig) -> Result<RateLimitMiddleware> {
    let store = build_store(&config.backend).await?;
    let service = RateLimiterService::new(config.rate_limit.clone(), store)?
        .with_timeout(config.backend.timeout());

    RateLimitMiddleware::new(Arc::new(service))
        .with_options(config.middleware.clone())
        .map(|limiter| {
            limiter.with_skip(|request| UNLIMITED_PATHS.contains(&request.uri().path()))
        })
}

/// Build the HTTP application with the limiter in front of every route
pub fn build_app(limiter: RateLimitMiddleware, metrics: Option<MetricsService>) -> AxumRouter {
    let mut app = AxumRouter::new()
        .route("/", get(|| async { "OK" }))
        .route("/health", get(|| async { "OK" }));

    if let Some(metrics) = metrics {
        app = app.route("/metrics", get(metrics_handler).with_state(metrics));
    }

    app.layer(axum::middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ))
    .layer(TraceLayer::new_for_http())
}

/// Initialize the rate limited server
pub async fn init_server(config: AdmissionConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting admission server");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let limiter = build_limiter(&config).await?;
    let metrics = MetricsService::new()?;
    let app = build_app(limiter, Some(metrics));

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| RateLimitError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
///
/// Set `ADMISSION_LOG_FORMAT=json` for structured JSON output.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "admission=debug,tower_http=debug".into());

    let json = std::env::var("ADMISSION_LOG_FORMAT").is_ok_and(|format| format == "json");

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
