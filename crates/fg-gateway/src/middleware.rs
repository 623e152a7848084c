//! Middleware stack for the gateway's HTTP boundary.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

/// Assigns an `X-Request-Id` response header when the inbound request didn't
/// carry one, independent of the envelope's own `request_id` (which is only
/// derived once validation reaches the dispatch controller).
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let had_id = req.headers().get("x-request-id").cloned();
    let mut resp = next.run(req).await;
    let id = had_id.unwrap_or_else(|| {
        HeaderValue::from_str(&Uuid::new_v4().to_string()).expect("uuid renders to a valid header value")
    });
    resp.headers_mut().entry("x-request-id").or_insert(id);
    resp
}

/// Logs method, path, status and duration for every request, including
/// `/ping` and `/metrics`.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    let duration = start.elapsed();
    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = duration.as_millis() as u64,
        "request completed"
    );

    resp
}

/// Configuration for the gateway's `CorsLayer`. Off by default; an empty
/// allow-list permits no cross-origin requests.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins; an empty list disables cross-origin access entirely.
    pub allowed_origins: Vec<String>,
    /// Allowed methods.
    pub allowed_methods: Vec<String>,
    /// Allowed headers.
    pub allowed_headers: Vec<String>,
}

impl CorsConfig {
    /// Build the corresponding [`CorsLayer`]. With an empty allow-list, no
    /// origin is ever permitted.
    pub fn to_cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self.allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
        let methods: Vec<axum::http::Method> = self.allowed_methods.iter().filter_map(|m| m.parse().ok()).collect();
        let headers: Vec<axum::http::HeaderName> = self.allowed_headers.iter().filter_map(|h| h.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::list(methods))
            .allow_headers(AllowHeaders::list(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cors_config_permits_no_origin() {
        let layer = CorsConfig::default().to_cors_layer();
        // CorsLayer has no public introspection; this just proves construction
        // doesn't panic with an empty allow-list.
        let _ = layer;
    }
}
