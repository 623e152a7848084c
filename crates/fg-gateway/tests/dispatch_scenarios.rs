//! End-to-end dispatch scenarios exercised against the Axum router
//! in-process via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fg_config::GatewayConfig;
use fg_gateway::{build_app, AppState};
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::{method as wm_method, path as wm_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(GatewayConfig::default()))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// `GET /ping` -> 200, body `pong`.
#[tokio::test]
async fn ping_returns_pong() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"pong");
}

/// `GET /api/x` with no headers -> 200, executor-level `BadConfiguration`
/// failure (the http executor is selected by default and has no
/// `X-Forward-Base`), `attempts == 1`.
#[tokio::test]
async fn missing_forward_base_is_executor_level_failure() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(Request::builder().uri("/api/x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["overall_status"], "Failure");
    assert_eq!(json["executor_result"]["error_code"], "BadConfiguration");
    assert_eq!(json["attempts"], 1);
}

/// shell executor selected, no `X-PS-Command` -> 400 before dispatch
/// ever reaches an executor.
#[tokio::test]
async fn shell_without_ps_command_is_validation_rejection() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/anything")
                .header("X-Executor-Type", "shell")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "MissingPsCommand");
    assert!(json.get("request_id").is_some());
}

/// allowlisted `Get-Mailbox` shell command succeeds on the first attempt.
#[tokio::test]
async fn shell_get_mailbox_succeeds() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mailbox")
                .header("X-Executor-Type", "shell")
                .header("X-PS-Command", "Get-Mailbox")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["overall_status"], "Success");
    assert!(json["executor_result"]["ps_command"]
        .as_str()
        .unwrap()
        .contains("Get-Mailbox -ResultSize 100"));
    let stdout = json["executor_result"]["ps_stdout"].as_array().unwrap();
    assert!(stdout.iter().any(|l| l == "Simulated output"));
    assert_eq!(json["attempts"], 1);
}

/// a shell command outside the allowlist is a permanent
/// `CommandNotAllowed` failure, not retried.
#[tokio::test]
async fn shell_disallowed_command_is_command_not_allowed() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mailbox")
                .header("X-Executor-Type", "shell")
                .header("X-PS-Command", "Remove-Mailbox")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["executor_result"]["error_code"], "CommandNotAllowed");
    assert_eq!(json["attempts"], 1);
}

/// an upstream that returns transient 503 twice then 200 is retried to
/// success, with the `X-Attempts` header reflecting the attempt count and
/// `requests.retried` incremented by exactly one.
#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let server = MockServer::start().await;
    Mock::given(wm_method("GET"))
        .and(wm_path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(wm_method("GET"))
        .and(wm_path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let state = test_state();
    let before = state.metrics.snapshot().retried;
    let app = build_app(state.clone());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/flaky")
                .header("X-Forward-Base", server.uri())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let attempts_header = resp
        .headers()
        .get("X-Attempts")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert_eq!(attempts_header, "3");
    let json = body_json(resp).await;
    assert_eq!(json["overall_status"], "Success");
    assert_eq!(json["attempts"], 3);

    let after = state.metrics.snapshot().retried;
    assert_eq!(after - before, 1);
}

/// a body larger than `max_body_bytes` is rejected before dispatch, with
/// the configured size (in KB) surfaced in the message.
#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = GatewayConfig::default();
    config.service.max_request_body_kb = 1;
    let state = Arc::new(AppState::new(config));
    let app = build_app(state);

    let oversized = "x".repeat(1024 * 1024 + 1);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/x")
                .header("content-type", "application/json")
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "BodyTooLarge");
    assert!(json["message"].as_str().unwrap().contains("1024"));
}

/// Envelope echo property: request_id and correlation_id on
/// the response always match what was sent (or generated) on the request.
#[tokio::test]
async fn envelope_echoes_request_and_correlation_id() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/x")
                .header("X-Request-Id", "rid-echo-1")
                .header("X-Correlation-Id", "corr-echo-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["request_id"], "rid-echo-1");
    assert_eq!(json["correlation_id"], "corr-echo-1");
}

/// Unknown executor type is rejected with HTTP 400 and the
/// `requests.badexecutor` counter is incremented.
#[tokio::test]
async fn unknown_executor_type_is_rejected() {
    let state = test_state();
    let before = state.metrics.snapshot().bad_executor;
    let app = build_app(state.clone());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/x")
                .header("X-Executor-Type", "carrier-pigeon")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "UnsupportedExecutor");
    assert_eq!(state.metrics.snapshot().bad_executor - before, 1);
}

/// `GET /metrics` reports the documented shape.
#[tokio::test]
async fn metrics_endpoint_reports_expected_shape() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(json.get("timestamp").is_some());
    assert!(json.get("instance").is_some());
    assert!(json["metrics"].get("total").is_some());
    assert!(json["metrics"].get("p95_latency_ms").is_some());
}
