//! HTTP-forwarding executor.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fg_core::{
    CaseInsensitiveMap, ExecutionOutcome, ExecutionResult, Executor, FailurePayload, RequestEnvelope, SuccessPayload,
};
use fg_error::ErrorCode;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Method, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 512 * 1024;

/// Query parameter keys masked when the target URL is logged. The
/// outbound request itself always uses the original values.
const MASKED_QUERY_KEYS: &[&str] = &["api_key", "apikey", "token", "secret", "password", "pwd"];

/// Header names that are always stripped regardless of configuration
/// `X-*`, `sec-*` (case-insensitive) and `Host`.
fn is_structurally_filtered(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("x-") || lower.starts_with("sec-") || lower == "host"
}

/// Configuration consumed by [`HttpExecutor`]. Mirrors the `http.*` tree in
/// `fg-config`; kept as plain fields here so this crate stays a sibling of
/// `fg-config` rather than a dependent of it.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Response bodies longer than this are truncated with a marker appended.
    pub max_response_body_bytes: usize,
    /// Transport-level timeout, floor for the per-attempt timeout.
    pub default_timeout: Duration,
    /// Additional header names never forwarded, beyond the structural set.
    pub filtered_headers: BTreeSet<String>,
    /// Upstream status codes classified as transient rather than permanent.
    pub transient_status_codes: BTreeSet<u16>,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            default_timeout: Duration::from_secs(15),
            filtered_headers: ["Authorization", "Proxy-Authorization", "Cookie"]
                .into_iter()
                .map(String::from)
                .collect(),
            transient_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

/// Forwards a request to the upstream named by the `X-Forward-Base` header.
pub struct HttpExecutor {
    client: Client,
    config: HttpExecutorConfig,
}

impl HttpExecutor {
    /// Build an executor with its own `reqwest` client, configured for
    /// transport-level decompression and a floor transport timeout.
    pub fn new(config: HttpExecutorConfig) -> Self {
        let client = Client::builder()
            .timeout(config.default_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client, config }
    }

    fn is_header_filtered(&self, name: &str) -> bool {
        is_structurally_filtered(name) || self.config.filtered_headers.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    fn build_target_url(base: &Url, envelope: &RequestEnvelope) -> Url {
        let mut url = base.clone();

        let merged_path = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            envelope.path().trim_start_matches('/')
        );
        url.set_path(&merged_path);

        let mut pairs: Vec<(String, String)> = base
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .filter(|(k, _)| !envelope.query().contains_key(k))
            .collect();
        pairs.extend(envelope.query().iter().map(|(k, v)| (k.to_string(), v.to_string())));

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            let qs = pairs
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, NON_ALPHANUMERIC),
                        utf8_percent_encode(v, NON_ALPHANUMERIC)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&qs));
        }
        url
    }

    /// Render `url` with masked query values, for logging only.
    fn masked_url(url: &Url) -> String {
        let mut masked = url.clone();
        let rebuilt: Vec<(String, String)> = masked
            .query_pairs()
            .map(|(k, v)| {
                let value = if MASKED_QUERY_KEYS.iter().any(|m| m.eq_ignore_ascii_case(&k)) {
                    "***MASKED***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), value)
            })
            .collect();
        if rebuilt.is_empty() {
            masked.set_query(None);
        } else {
            let qs = rebuilt
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            masked.set_query(Some(&qs));
        }
        masked.to_string()
    }

    fn build_headers(&self, envelope: &RequestEnvelope) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in envelope.headers().iter() {
            if self.is_header_filtered(name) {
                continue;
            }
            let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(header_value) = reqwest::header::HeaderValue::from_str(value) else {
                continue;
            };
            headers.append(header_name, header_value);
        }
        headers
    }

    fn collect_response_headers(response: &reqwest::Response) -> CaseInsensitiveMap {
        let mut collected: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in response.headers().iter() {
            let value = value.to_str().unwrap_or("").to_string();
            if let Some(entry) = collected.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name.as_str())) {
                entry.1.push(value);
            } else {
                collected.push((name.as_str().to_string(), vec![value]));
            }
        }
        collected.into_iter().map(|(k, vs)| (k, vs.join(";"))).collect()
    }

    fn truncate_body(&self, bytes: &[u8]) -> String {
        if bytes.len() <= self.config.max_response_body_bytes {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let orig = bytes.len();
        let max = self.config.max_response_body_bytes;
        let mut cut = max;
        while cut > 0 && !bytes.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut text = String::from_utf8_lossy(&bytes[..cut]).into_owned();
        text.push_str(&format!("...[truncated from {orig} to {max} bytes]"));
        text
    }

    fn classify_status(&self, status: u16) -> Classification {
        if (200..300).contains(&status) {
            Classification::Success
        } else if self.config.transient_status_codes.contains(&status) {
            Classification::Transient
        } else {
            Classification::Permanent
        }
    }
}

enum Classification {
    Success,
    Transient,
    Permanent,
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, envelope: &RequestEnvelope, cancel: CancellationToken) -> ExecutionResult {
        let started_at = Utc::now();

        let Some(base_str) = envelope.headers().get("X-Forward-Base") else {
            return ExecutionResult::new(
                0,
                started_at,
                Utc::now(),
                ExecutionOutcome::PermanentFailure(FailurePayload::new(
                    ErrorCode::BadConfiguration,
                    "X-Forward-Base header is required",
                )),
            );
        };

        let base = match Url::parse(base_str) {
            Ok(url) => url,
            Err(err) => {
                return ExecutionResult::new(
                    0,
                    started_at,
                    Utc::now(),
                    ExecutionOutcome::PermanentFailure(FailurePayload::new(
                        ErrorCode::InvalidUri,
                        format!("X-Forward-Base is not a valid absolute URL: {err}"),
                    )),
                );
            }
        };

        let target = Self::build_target_url(&base, envelope);
        debug!(target: "gateway.http_executor", url = %Self::masked_url(&target), "forwarding request");

        let method = match Method::from_bytes(envelope.method().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return ExecutionResult::new(
                    0,
                    started_at,
                    Utc::now(),
                    ExecutionOutcome::PermanentFailure(FailurePayload::new(
                        ErrorCode::InvalidHttpMethod,
                        format!("{} is not a usable HTTP method", envelope.method()),
                    )),
                );
            }
        };

        let mut builder = self.client.request(method.clone(), target).headers(self.build_headers(envelope));

        if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            if let Some(body) = envelope.body() {
                if !body.is_empty() {
                    builder = builder
                        .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
                        .body(body.to_string());
                }
            }
        }

        let send_future = builder.send();

        let response = tokio::select! {
            biased;
            result = send_future => result,
            _ = cancel.cancelled() => {
                warn!(target: "gateway.http_executor", "cancelled while waiting for upstream response");
                return ExecutionResult::new(
                    0,
                    started_at,
                    Utc::now(),
                    ExecutionOutcome::TransientFailure(FailurePayload::new(ErrorCode::Timeout, "request cancelled before completion")),
                );
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let code = if err.is_builder() {
                    ErrorCode::InvalidUri
                } else {
                    ErrorCode::NetworkError
                };
                let outcome = if code == ErrorCode::InvalidUri {
                    ExecutionOutcome::PermanentFailure(FailurePayload::new(code, err.to_string()))
                } else {
                    ExecutionOutcome::TransientFailure(FailurePayload::new(code, err.to_string()))
                };
                return ExecutionResult::new(0, started_at, Utc::now(), outcome);
            }
        };

        let status = response.status().as_u16();
        let response_headers = Self::collect_response_headers(&response);
        let body_future = response.bytes();

        let body_bytes = tokio::select! {
            biased;
            result = body_future => result,
            _ = cancel.cancelled() => {
                warn!(target: "gateway.http_executor", "cancelled while reading upstream response body");
                return ExecutionResult::new(
                    0,
                    started_at,
                    Utc::now(),
                    ExecutionOutcome::TransientFailure(FailurePayload::new(ErrorCode::Timeout, "request cancelled before completion")),
                );
            }
        };

        let body_bytes = match body_bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                return ExecutionResult::new(
                    0,
                    started_at,
                    Utc::now(),
                    ExecutionOutcome::TransientFailure(FailurePayload::new(ErrorCode::NetworkError, err.to_string())),
                );
            }
        };
        let response_body = self.truncate_body(&body_bytes);
        let completed_at = Utc::now();

        let outcome = match self.classify_status(status) {
            Classification::Success => ExecutionOutcome::Success(SuccessPayload::Http {
                status_code: status,
                response_headers,
                response_body: Some(response_body),
            }),
            Classification::Transient => ExecutionOutcome::TransientFailure(
                FailurePayload::new(ErrorCode::NetworkError, format!("upstream returned transient status {status}"))
                    .with_http_detail(status, response_headers, Some(response_body)),
            ),
            Classification::Permanent => ExecutionOutcome::PermanentFailure(
                FailurePayload::new(ErrorCode::NetworkError, format!("upstream returned status {status}"))
                    .with_http_detail(status, response_headers, Some(response_body)),
            ),
        };

        ExecutionResult::new(0, started_at, completed_at, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::RequestEnvelopeBuilder;
    use wiremock::matchers::{method as wm_method, path as wm_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> HttpExecutor {
        HttpExecutor::new(HttpExecutorConfig::default())
    }

    #[test]
    fn structurally_filtered_headers_cover_x_and_sec_prefixes() {
        assert!(is_structurally_filtered("X-Request-Id"));
        assert!(is_structurally_filtered("sec-fetch-mode"));
        assert!(is_structurally_filtered("Host"));
        assert!(!is_structurally_filtered("Content-Type"));
    }

    #[test]
    fn default_deny_list_headers_are_filtered() {
        let exec = executor();
        assert!(exec.is_header_filtered("authorization"));
        assert!(exec.is_header_filtered("Cookie"));
        assert!(!exec.is_header_filtered("Accept"));
    }

    #[test]
    fn build_target_url_joins_base_and_envelope_path() {
        let base = Url::parse("http://upstream.example/api/").unwrap();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/mailbox/123").build();
        let target = HttpExecutor::build_target_url(&base, &envelope);
        assert_eq!(target.path(), "/api/mailbox/123");
    }

    #[test]
    fn build_target_url_merges_query_envelope_wins() {
        let base = Url::parse("http://upstream.example/api?tenant=a&region=east").unwrap();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/x").query("tenant", "b").build();
        let target = HttpExecutor::build_target_url(&base, &envelope);
        let pairs: Vec<(String, String)> = target.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(pairs.contains(&("tenant".to_string(), "b".to_string())));
        assert!(pairs.contains(&("region".to_string(), "east".to_string())));
    }

    #[test]
    fn masked_url_redacts_sensitive_query_keys() {
        let url = Url::parse("http://upstream.example/x?api_key=shh&region=east").unwrap();
        let masked = HttpExecutor::masked_url(&url);
        assert!(masked.contains("api_key=***MASKED***"));
        assert!(masked.contains("region=east"));
    }

    #[test]
    fn truncate_body_appends_marker_when_over_limit() {
        let mut exec = executor();
        exec.config.max_response_body_bytes = 4;
        let truncated = exec.truncate_body(b"abcdefgh");
        assert!(truncated.starts_with("abcd"));
        assert!(truncated.contains("truncated from 8 to 4 bytes"));
    }

    #[test]
    fn truncate_body_passes_through_when_under_limit() {
        let exec = executor();
        assert_eq!(exec.truncate_body(b"hi"), "hi");
    }

    #[test]
    fn classify_status_buckets_match_spec_defaults() {
        let exec = executor();
        assert!(matches!(exec.classify_status(200), Classification::Success));
        assert!(matches!(exec.classify_status(503), Classification::Transient));
        assert!(matches!(exec.classify_status(404), Classification::Permanent));
    }

    #[tokio::test]
    async fn invalid_forward_base_is_permanent() {
        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/x")
            .header("X-Forward-Base", "not a url")
            .build();
        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert!(!result.is_transient());
        assert!(!result.is_success());
        assert_eq!(result.outcome.failure().unwrap().error_code, ErrorCode::InvalidUri);
    }

    #[tokio::test]
    async fn missing_forward_base_is_permanent() {
        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/x").build();
        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert_eq!(result.outcome.failure().unwrap().error_code, ErrorCode::BadConfiguration);
    }

    #[tokio::test]
    async fn successful_get_returns_success_outcome() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/items"))
            .and(query_param("q", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/items")
            .query("q", "1")
            .header("X-Forward-Base", server.uri())
            .build();

        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert!(result.is_success());
        match result.outcome {
            ExecutionOutcome::Success(SuccessPayload::Http { status_code, response_body, .. }) => {
                assert_eq!(status_code, 200);
                assert_eq!(response_body.as_deref(), Some("ok"));
            }
            _ => panic!("expected http success"),
        }
    }

    #[tokio::test]
    async fn transient_status_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/flaky")
            .header("X-Forward-Base", server.uri())
            .build();

        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert!(result.is_transient());
        let failure = result.outcome.failure().unwrap();
        assert_eq!(failure.status_code, Some(503));
    }

    #[tokio::test]
    async fn permanent_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/missing")
            .header("X-Forward-Base", server.uri())
            .build();

        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert!(!result.is_transient());
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn cancellation_during_response_produces_prompt_timeout() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok").set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/slow")
            .header("X-Forward-Base", server.uri())
            .build();

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });

        let started = std::time::Instant::now();
        let result = exec.execute(&envelope, cancel).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(result.is_transient());
        assert_eq!(result.outcome.failure().unwrap().error_code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn authorization_header_is_not_forwarded() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/secure"))
            .respond_with(move |req: &wiremock::Request| {
                if req.headers.get("authorization").is_some() {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&server)
            .await;

        let exec = executor();
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/secure")
            .header("X-Forward-Base", server.uri())
            .header("Authorization", "Bearer secret")
            .build();

        let result = exec.execute(&envelope, CancellationToken::new()).await;
        assert!(result.is_success());
    }
}
