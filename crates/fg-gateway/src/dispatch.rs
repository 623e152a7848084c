//! Dispatch controller: the core per-request pipeline sitting behind
//! every `{GET,POST,PUT,PATCH,DELETE} /api/{*path}` call.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use fg_core::{CaseInsensitiveMap, Executor, RequestEnvelopeBuilder, SystemClock, ValidationOutcome};
use fg_error::ErrorCode;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{response, AppState};

/// Entry point wired to the `/api/{*path}` route for every method.
pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let max_body_bytes = state.config.max_body_bytes();

    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(len) = content_length {
        if len > max_body_bytes as u64 {
            let request_id = extract_request_id(req.headers());
            return rejection_response(
                ErrorCode::BodyTooLarge,
                format!("Content-Length {len} exceeds the {max_body_bytes}-byte limit"),
                &request_id,
            );
        }
    }

    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let headers = collect_headers(&parts.headers);
    let request_id = headers.get("X-Request-Id").map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
    let correlation_id = headers.get("X-Correlation-Id").map(str::to_string);

    let should_read_body = matches!(method, Method::POST | Method::PUT | Method::PATCH)
        || headers.get("Content-Type").map(|ct| ct.to_ascii_lowercase().contains("json")).unwrap_or(false);

    let body_text = if should_read_body {
        match axum::body::to_bytes(body, max_body_bytes).await {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => {
                return rejection_response(
                    ErrorCode::BodyTooLarge,
                    format!("body exceeds the {max_body_bytes}-byte limit"),
                    &request_id,
                );
            }
        }
    } else {
        None
    };

    let path = decode_path(parts.uri.path());
    let query = decode_query(parts.uri.query());

    let mut builder = RequestEnvelopeBuilder::new(request_id.clone(), method.as_str(), path);
    if let Some(corr) = &correlation_id {
        builder = builder.correlation_id(corr.clone());
    }
    for (k, v) in &query {
        builder = builder.query(k, v);
    }
    for (k, v) in headers.iter() {
        builder = builder.header(k, v);
    }
    if let Some(b) = &body_text {
        builder = builder.body(b.clone());
    }
    let envelope = builder.build();

    if let ValidationOutcome::Invalid { code, message } = fg_core::validate(Some(&envelope), content_length, max_body_bytes) {
        state.metrics.record_invalid();
        return rejection_response(code, message, &request_id);
    }

    let executor_type = envelope
        .headers()
        .get("X-Executor-Type")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "http".to_string());

    let executor: Arc<dyn Executor> = match executor_type.as_str() {
        "http" => state.http_executor.clone(),
        "shell" => state.shell_executor.clone(),
        other => {
            state.metrics.record_bad_executor();
            return rejection_response(
                ErrorCode::UnsupportedExecutor,
                format!("unsupported X-Executor-Type: {other}"),
                &request_id,
            );
        }
    };

    let outer_cancel = CancellationToken::new();
    let result = fg_retry::run(&state.retry_config, &request_id, &outer_cancel, &SystemClock, move |_attempt, cancel| {
        let executor = executor.clone();
        let envelope = envelope.clone();
        async move { executor.execute(&envelope, cancel).await }
    })
    .await;

    let first_started = result.attempts.first().map(|a| a.started_at).unwrap_or_else(Utc::now);
    let last_completed = result.final_result().completed_at;
    let latency_ms = (last_completed - first_started).num_milliseconds().max(0) as f64;
    state.metrics.record_dispatch(result.overall_success(), result.attempt_count(), latency_ms);

    let status = response::dispatch_status_code(&result);
    let body = response::dispatch_body(&request_id, correlation_id.as_deref(), &executor_type, &result);

    let mut resp = (StatusCode::from_u16(status).unwrap_or(StatusCode::OK), Json(body)).into_response();
    set_traceability_headers(&mut resp, &request_id, correlation_id.as_deref(), &state.config.service.instance_id, &executor_type, result.attempt_count());
    resp
}

fn extract_request_id(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn collect_headers(headers: &axum::http::HeaderMap) -> CaseInsensitiveMap {
    let mut map = CaseInsensitiveMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str(), value);
        }
    }
    map
}

fn decode_path(raw: &str) -> String {
    let stripped = raw.strip_prefix("/api").unwrap_or(raw);
    percent_encoding::percent_decode_str(stripped).decode_utf8_lossy().into_owned()
}

fn decode_query(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else { return Vec::new() };
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn rejection_response(code: ErrorCode, message: String, request_id: &str) -> Response {
    let body = response::rejection_body(code, &message, request_id, Utc::now());
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn set_traceability_headers(
    resp: &mut Response,
    request_id: &str,
    correlation_id: Option<&str>,
    instance_id: &str,
    executor_type: &str,
    attempts: u32,
) {
    let headers = resp.headers_mut();
    if let Ok(v) = request_id.parse() {
        headers.insert("X-Request-Id", v);
    }
    if let Some(corr) = correlation_id {
        if let Ok(v) = corr.parse() {
            headers.insert("X-Correlation-Id", v);
        }
    }
    if let Ok(v) = instance_id.parse() {
        headers.insert("X-Instance-Id", v);
    }
    if let Ok(v) = executor_type.parse() {
        headers.insert("X-Executor", v);
    }
    if let Ok(v) = attempts.to_string().parse() {
        headers.insert("X-Attempts", v);
    }
}
