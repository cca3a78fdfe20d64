use crate::error::{RateLimitError, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            RateLimitError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        // Register all metrics with descriptions
        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "rate_limit_requests_total",
            "Requests seen by the rate limiter, by outcome (allowed, limited, skipped)"
        );
        describe_counter!(
            "rate_limit_backend_errors_total",
            "Backend failures and timeouts that let a request through unchecked"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record the outcome of one rate limit check
pub fn record_decision(outcome: &'static str) {
    counter!("rate_limit_requests_total", "outcome" => outcome).increment(1);
}

/// Record a backend failure that was failed open
pub fn record_backend_error(store: &'static str) {
    counter!("rate_limit_backend_errors_total", "store" => store).increment(1);
}
