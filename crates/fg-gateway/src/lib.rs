//! Gateway application wiring: state, router, and the HTTP boundary.
//! `main.rs` is a thin CLI shell around [`build_app`].
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::Utc;
use fg_config::GatewayConfig;
use fg_http_executor::{HttpExecutor, HttpExecutorConfig};
use fg_retry::RetryConfig;
use fg_shell_executor::{ShellExecutor, ShellExecutorConfig};
use fg_telemetry::MetricsAccumulator;
use serde_json::json;
use tower_http::cors::CorsLayer;

pub mod dispatch;
pub mod middleware;
pub mod response;

/// Version reported on `/health`, taken from this crate's own manifest.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state handed to every route handler.
pub struct AppState {
    pub config: GatewayConfig,
    pub retry_config: RetryConfig,
    pub metrics: Arc<MetricsAccumulator>,
    pub http_executor: Arc<HttpExecutor>,
    pub shell_executor: Arc<ShellExecutor>,
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the per-crate config structs each sibling crate expects from
    /// the one `fg-config` source of truth, then build the executors.
    pub fn new(config: GatewayConfig) -> Self {
        let retry_config = RetryConfig {
            max_attempts: config.retry.max_attempts,
            base_delay_ms: config.retry.base_delay_ms,
            max_delay_ms: config.retry.max_delay_ms,
            jitter_fraction: config.retry.jitter_fraction,
            per_attempt_timeout_ms: config.retry.per_attempt_timeout_ms,
        };

        let http_config = HttpExecutorConfig {
            max_response_body_bytes: config.max_response_body_bytes(),
            default_timeout: std::time::Duration::from_secs(config.http.default_timeout_sec),
            filtered_headers: config.http.filtered_headers.clone(),
            transient_status_codes: config.retry.transient_status_codes.clone(),
        };

        let shell_config = ShellExecutorConfig {
            allowed_commands: config.shell.allowed_commands.clone(),
        };

        Self {
            config,
            retry_config,
            metrics: Arc::new(MetricsAccumulator::new()),
            http_executor: Arc::new(HttpExecutor::new(http_config)),
            shell_executor: Arc::new(ShellExecutor::new(shell_config)),
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router with all gateway routes, wrapped in the
/// ambient middleware stack.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = middleware::CorsConfig::default().to_cors_layer();

    Router::new()
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/api/{*path}", any(dispatch::dispatch))
        .route("/api", any(dispatch::dispatch))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    Json(json!({
        "timestamp": Utc::now(),
        "instance": state.config.service.instance_id,
        "metrics": snapshot,
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
