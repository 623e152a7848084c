//! Request envelope validation.
//!
//! Deliberately config-agnostic: callers pass in the already-resolved
//! `max_body_bytes` limit rather than a `fg-config` type, keeping this crate
//! a sibling of `fg-config` rather than a dependent of it.

use fg_error::ErrorCode;

use crate::envelope::{RequestEnvelope, ALLOWED_METHODS};

/// The result of validating a request envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The envelope passed every rule.
    Valid,
    /// The envelope failed the named rule.
    Invalid {
        /// The closed-set error code identifying which rule failed.
        code: ErrorCode,
        /// A human-readable explanation.
        message: String,
    },
}

impl ValidationOutcome {
    /// Whether validation succeeded.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// Validate a request envelope against the ordered rules below. Rules are
/// evaluated in order; the first failure wins.
///
/// `envelope` is `Option` to make rule 1 ("envelope non-null") meaningful;
/// `content_length` is the parsed `Content-Length` header value, if present
/// and numeric.
///
/// Rules 3 and 4 key off the literal `X-Executor-Type` header value, not the
/// dispatch-time default. An absent header means neither rule fires here —
/// the dispatch controller still defaults an unset header to the `http`
/// executor, but that default executor then enforces its own required
/// headers at runtime (surfacing as `BadConfiguration` on the execution
/// result, not as a validation rejection).
pub fn validate(
    envelope: Option<&RequestEnvelope>,
    content_length: Option<u64>,
    max_body_bytes: usize,
) -> ValidationOutcome {
    let Some(envelope) = envelope else {
        return ValidationOutcome::Invalid {
            code: ErrorCode::NullRequest,
            message: "request envelope is null".to_string(),
        };
    };

    if envelope.request_id().is_empty() {
        return ValidationOutcome::Invalid {
            code: ErrorCode::MissingRequestId,
            message: "request_id must be non-empty".to_string(),
        };
    }

    let executor_type = envelope.headers().get("X-Executor-Type").map(|s| s.to_ascii_lowercase());

    if executor_type.as_deref() == Some("shell") && !envelope.headers().contains_key("X-PS-Command") {
        return ValidationOutcome::Invalid {
            code: ErrorCode::MissingPsCommand,
            message: "X-PS-Command header is required when X-Executor-Type is shell".to_string(),
        };
    }

    if executor_type.as_deref() == Some("http") && !envelope.headers().contains_key("X-Forward-Base") {
        return ValidationOutcome::Invalid {
            code: ErrorCode::MissingForwardBase,
            message: "X-Forward-Base header is required when X-Executor-Type is http".to_string(),
        };
    }

    if let Some(len) = content_length {
        if len > max_body_bytes as u64 {
            return ValidationOutcome::Invalid {
                code: ErrorCode::BodyTooLarge,
                message: format!("Content-Length {len} exceeds the {max_body_bytes}-byte limit"),
            };
        }
    }

    if envelope.body_len() > max_body_bytes {
        return ValidationOutcome::Invalid {
            code: ErrorCode::BodyTooLarge,
            message: format!(
                "body of {} bytes exceeds the {max_body_bytes}-byte limit",
                envelope.body_len()
            ),
        };
    }

    if !ALLOWED_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(envelope.method()))
    {
        return ValidationOutcome::Invalid {
            code: ErrorCode::InvalidHttpMethod,
            message: format!("method {} is not one of the allowed methods", envelope.method()),
        };
    }

    ValidationOutcome::Valid
}
