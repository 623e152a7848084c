//! Execution outcomes produced by executors and consumed by the retry
//! controller.

use chrono::{DateTime, Utc};
use fg_error::ErrorCode;

use crate::envelope::CaseInsensitiveMap;

/// The payload of a successful attempt, shaped per executor family.
#[derive(Debug, Clone, PartialEq)]
pub enum SuccessPayload {
    /// HTTP executor success.
    Http {
        /// 2xx status code returned by the upstream.
        status_code: u16,
        /// Upstream response headers, multi-valued headers joined by `;`.
        response_headers: CaseInsensitiveMap,
        /// Response body text, possibly truncated with a marker appended.
        response_body: Option<String>,
    },
    /// Shell executor success.
    Shell {
        /// The fully rendered command line that was "run".
        command: String,
        /// Ordered stdout lines.
        stdout: Vec<String>,
        /// Ordered stderr lines.
        stderr: Vec<String>,
        /// Ordered structured records produced by the simulated session.
        objects: Vec<serde_json::Value>,
    },
}

/// The payload of a failed attempt, transient or permanent.
#[derive(Debug, Clone, PartialEq)]
pub struct FailurePayload {
    /// Short machine-readable failure tag.
    pub error_code: ErrorCode,
    /// Human-readable failure description.
    pub error_message: String,
    /// Upstream status code, when the failure originated from an HTTP
    /// response rather than a transport or validation error.
    pub status_code: Option<u16>,
    /// Upstream response headers, present under the same condition as
    /// `status_code`.
    pub response_headers: Option<CaseInsensitiveMap>,
    /// Upstream response body, present under the same condition as
    /// `status_code`.
    pub response_body: Option<String>,
}

impl FailurePayload {
    /// A failure with no upstream HTTP detail (validation errors, shell
    /// failures, transport errors, timeouts).
    pub fn new(error_code: ErrorCode, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
            status_code: None,
            response_headers: None,
            response_body: None,
        }
    }

    /// Attach the upstream HTTP response detail that accompanies a non-2xx
    /// classification.
    pub fn with_http_detail(
        mut self,
        status_code: u16,
        response_headers: CaseInsensitiveMap,
        response_body: Option<String>,
    ) -> Self {
        self.status_code = Some(status_code);
        self.response_headers = Some(response_headers);
        self.response_body = response_body;
        self
    }
}

/// The discriminated outcome of one attempt. The enum shape itself enforces
/// the invariant `success ⇒ ¬transient` — there is no independent boolean
/// that could drift out of sync with the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The attempt succeeded.
    Success(SuccessPayload),
    /// The attempt failed in a way that may succeed on retry.
    TransientFailure(FailurePayload),
    /// The attempt failed in a way retrying will not fix.
    PermanentFailure(FailurePayload),
}

impl ExecutionOutcome {
    /// Whether this outcome is `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    /// Whether this outcome is `TransientFailure`.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionOutcome::TransientFailure(_))
    }

    /// The stable lowercase-with-underscores tag used in response envelopes
    /// and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success(_) => "success",
            ExecutionOutcome::TransientFailure(_) => "transient_failure",
            ExecutionOutcome::PermanentFailure(_) => "permanent_failure",
        }
    }

    /// The failure payload, if this outcome is not a success.
    pub fn failure(&self) -> Option<&FailurePayload> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::TransientFailure(f) | ExecutionOutcome::PermanentFailure(f) => Some(f),
        }
    }
}

/// One attempt's full result: outcome plus the timing and ordinal the retry
/// controller stamps onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// 1-based attempt ordinal, set by the retry controller.
    pub attempt: u32,
    /// When this attempt began.
    pub started_at: DateTime<Utc>,
    /// When this attempt ended; always `>= started_at`.
    pub completed_at: DateTime<Utc>,
    /// The outcome itself.
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    /// Construct a result, stamping `attempt` afterwards via
    /// [`ExecutionResult::with_attempt`] if the caller doesn't know it yet.
    pub fn new(attempt: u32, started_at: DateTime<Utc>, completed_at: DateTime<Utc>, outcome: ExecutionOutcome) -> Self {
        debug_assert!(completed_at >= started_at, "completed_at must not precede started_at");
        Self {
            attempt,
            started_at,
            completed_at,
            outcome,
        }
    }

    /// Return a copy with `attempt` overwritten, used by the retry
    /// controller when an executor doesn't know its own ordinal.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Whether the attempt failed transiently (eligible for retry).
    pub fn is_transient(&self) -> bool {
        self.outcome.is_transient()
    }

    /// The outcome tag (`"success"`, `"transient_failure"`, `"permanent_failure"`).
    pub fn outcome_tag(&self) -> &'static str {
        self.outcome.tag()
    }
}
