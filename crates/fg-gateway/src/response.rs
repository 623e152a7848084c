//! Response envelope construction.

use chrono::{DateTime, Utc};
use fg_core::{ExecutionOutcome, SuccessPayload};
use fg_error::ErrorCode;
use fg_retry::RetryResult;
use serde_json::{json, Value};

/// Shape the `executor_result` field takes, per executor family and outcome.
fn executor_result_json(outcome: &ExecutionOutcome) -> Value {
    match outcome {
        ExecutionOutcome::Success(SuccessPayload::Http { status_code, response_headers, response_body }) => {
            let headers: serde_json::Map<String, Value> = response_headers
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect();
            json!({
                "http_status": status_code,
                "headers": headers,
                "body": response_body,
            })
        }
        ExecutionOutcome::Success(SuccessPayload::Shell { command, stdout, stderr, objects }) => {
            json!({
                "ps_command": command,
                "ps_stdout": stdout,
                "ps_stderr": stderr,
                "ps_objects": objects,
            })
        }
        ExecutionOutcome::TransientFailure(failure) | ExecutionOutcome::PermanentFailure(failure) => {
            json!({
                "error_code": failure.error_code,
                "error": failure.error_message,
                "is_transient": matches!(outcome, ExecutionOutcome::TransientFailure(_)),
                "status_code": failure.status_code,
            })
        }
    }
}

/// Build the full dispatch response body from a completed retry run.
pub fn dispatch_body(
    request_id: &str,
    correlation_id: Option<&str>,
    executor_type: &str,
    result: &RetryResult,
) -> Value {
    let started_at = result.attempts.first().map(|a| a.started_at).unwrap_or_else(Utc::now);
    let completed_at = result.final_result().completed_at;

    let attempt_summaries: Vec<Value> = result
        .attempts
        .iter()
        .map(|attempt| {
            let message = attempt.outcome.failure().map(|f| f.error_message.clone());
            json!({
                "attempt": attempt.attempt,
                "outcome": outcome_label(&attempt.outcome),
                "message": message,
            })
        })
        .collect();

    json!({
        "request_id": request_id,
        "correlation_id": correlation_id,
        "executor_type": executor_type,
        "started_at": started_at,
        "completed_at": completed_at,
        "overall_status": if result.overall_success() { "Success" } else { "Failure" },
        "attempts": result.attempt_count(),
        "attempt_summaries": attempt_summaries,
        "executor_result": executor_result_json(&result.final_result().outcome),
    })
}

/// HTTP status to answer a dispatch response with: the downstream HTTP
/// executor's own status code on success, `200` for every other case
/// (shell success, any failure).
pub fn dispatch_status_code(result: &RetryResult) -> u16 {
    match &result.final_result().outcome {
        ExecutionOutcome::Success(SuccessPayload::Http { status_code, .. }) => *status_code,
        _ => 200,
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success(_) => "Success",
        ExecutionOutcome::TransientFailure(_) => "TransientFailure",
        ExecutionOutcome::PermanentFailure(_) => "PermanentFailure",
    }
}

/// Build a validation/unsupported-executor rejection body.
///
/// The wire `code` is the precise [`ErrorCode`] that fired (e.g.
/// `MissingPsCommand`, `BodyTooLarge`), not a single generic tag, so a
/// client can tell "body too large" apart from "missing header".
pub fn rejection_body(code: ErrorCode, message: &str, request_id: &str, timestamp: DateTime<Utc>) -> Value {
    json!({
        "code": code,
        "message": message,
        "request_id": request_id,
        "timestamp": timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fg_core::{CaseInsensitiveMap, ExecutionResult, FailurePayload};

    fn success_result() -> RetryResult {
        let now = Utc::now();
        RetryResult {
            attempts: vec![ExecutionResult::new(
                1,
                now,
                now,
                ExecutionOutcome::Success(SuccessPayload::Http {
                    status_code: 201,
                    response_headers: CaseInsensitiveMap::new(),
                    response_body: Some("created".to_string()),
                }),
            )],
        }
    }

    #[test]
    fn dispatch_status_code_uses_http_status_on_success() {
        assert_eq!(dispatch_status_code(&success_result()), 201);
    }

    #[test]
    fn dispatch_status_code_is_200_on_failure() {
        let now = Utc::now();
        let result = RetryResult {
            attempts: vec![ExecutionResult::new(
                1,
                now,
                now,
                ExecutionOutcome::PermanentFailure(FailurePayload::new(ErrorCode::BadConfiguration, "no base")),
            )],
        };
        assert_eq!(dispatch_status_code(&result), 200);
    }

    #[test]
    fn dispatch_body_echoes_request_and_correlation_id() {
        let result = success_result();
        let body = dispatch_body("rid-1", Some("corr-1"), "http", &result);
        assert_eq!(body["request_id"], "rid-1");
        assert_eq!(body["correlation_id"], "corr-1");
        assert_eq!(body["overall_status"], "Success");
        assert_eq!(body["attempts"], 1);
    }

    #[test]
    fn rejection_body_has_wire_shape() {
        let body = rejection_body(ErrorCode::MissingPsCommand, "missing", "rid-2", Utc::now());
        assert_eq!(body["code"], "MissingPsCommand");
        assert_eq!(body["message"], "missing");
        assert_eq!(body["request_id"], "rid-2");
    }
}
