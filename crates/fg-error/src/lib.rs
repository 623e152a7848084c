//! Unified error taxonomy with stable error codes for the gateway.
//!
//! Every gateway error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`GatewayError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request-shape validation failures, surfaced as HTTP 400 before dispatch.
    Validation,
    /// Missing or malformed executor configuration (e.g. no forward base).
    Configuration,
    /// Outbound transport-level failures (DNS, connect, read).
    Network,
    /// Per-attempt or per-phase deadline exceeded.
    Timeout,
    /// Failures raised by the HTTP-forwarding executor.
    HttpExecutor,
    /// Failures raised by the remote-shell executor.
    ShellExecutor,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::HttpExecutor => "http_executor",
            Self::ShellExecutor => "shell_executor",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to its short tag (e.g. `"BadConfiguration"`),
/// used both as the wire `error_code` field on
/// a failed [execution result](https://docs.rs/fg-core) and in validation
/// error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A required executor configuration header is missing (no non-transient retry).
    BadConfiguration,
    /// The configured forward base could not be parsed as a URI.
    InvalidUri,
    /// A transport-level error occurred while forwarding the request.
    NetworkError,
    /// An attempt exceeded its deadline.
    Timeout,
    /// An executor raised an exception instead of returning a result.
    ExecutorException,
    /// The shell executor was not given a command to run.
    MissingCommand,
    /// The requested shell command is not in the configured allowlist.
    CommandNotAllowed,
    /// The shell executor's simulated session failed.
    PsFailure,
    /// The dispatch controller received an unsupported `X-Executor-Type`.
    UnsupportedExecutor,

    /// Validation: the request envelope itself was absent.
    NullRequest,
    /// Validation: `request_id` was empty.
    MissingRequestId,
    /// Validation: shell executor selected without `X-PS-Command`.
    MissingPsCommand,
    /// Validation: http executor selected without `X-Forward-Base`.
    MissingForwardBase,
    /// Validation: request body exceeded the configured maximum.
    BodyTooLarge,
    /// Validation: `method` is not one of the allowed HTTP methods.
    InvalidHttpMethod,

    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadConfiguration => ErrorCategory::Configuration,
            Self::InvalidUri => ErrorCategory::Configuration,
            Self::NetworkError => ErrorCategory::Network,
            Self::Timeout => ErrorCategory::Timeout,
            Self::ExecutorException => ErrorCategory::Internal,
            Self::MissingCommand | Self::CommandNotAllowed | Self::PsFailure => {
                ErrorCategory::ShellExecutor
            }
            Self::UnsupportedExecutor => ErrorCategory::Validation,
            Self::NullRequest
            | Self::MissingRequestId
            | Self::MissingPsCommand
            | Self::MissingForwardBase
            | Self::BodyTooLarge
            | Self::InvalidHttpMethod => ErrorCategory::Validation,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g. `"BadConfiguration"`).
    ///
    /// This is the exact string used on the wire; it intentionally does not
    /// follow Rust's usual `SCREAMING_SNAKE_CASE` error-code convention
    /// because the external contract fixes these tags verbatim.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadConfiguration => "BadConfiguration",
            Self::InvalidUri => "InvalidUri",
            Self::NetworkError => "NetworkError",
            Self::Timeout => "Timeout",
            Self::ExecutorException => "ExecutorException",
            Self::MissingCommand => "MissingCommand",
            Self::CommandNotAllowed => "CommandNotAllowed",
            Self::PsFailure => "PSFailure",
            Self::UnsupportedExecutor => "UnsupportedExecutor",
            Self::NullRequest => "NullRequest",
            Self::MissingRequestId => "MissingRequestId",
            Self::MissingPsCommand => "MissingPsCommand",
            Self::MissingForwardBase => "MissingForwardBase",
            Self::BodyTooLarge => "BodyTooLarge",
            Self::InvalidHttpMethod => "InvalidHttpMethod",
            Self::Internal => "Internal",
        }
    }

    /// Whether this code is unconditionally transient (retryable) or
    /// unconditionally permanent, independent of any runtime message.
    ///
    /// Returns `None` for [`ErrorCode::PsFailure`], whose transience depends
    /// on the failure message (`busy`/`timeout`/`unavailable`) and must be
    /// decided by the caller — see the shell executor's classifier.
    pub fn fixed_transience(&self) -> Option<bool> {
        match self {
            Self::NetworkError | Self::Timeout | Self::ExecutorException => Some(true),
            Self::BadConfiguration
            | Self::InvalidUri
            | Self::MissingCommand
            | Self::CommandNotAllowed
            | Self::UnsupportedExecutor
            | Self::NullRequest
            | Self::MissingRequestId
            | Self::MissingPsCommand
            | Self::MissingForwardBase
            | Self::BodyTooLarge
            | Self::InvalidHttpMethod => Some(false),
            Self::PsFailure => None,
            Self::Internal => Some(false),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown error code: {s}")))
    }
}

impl ErrorCode {
    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "BadConfiguration" => Self::BadConfiguration,
            "InvalidUri" => Self::InvalidUri,
            "NetworkError" => Self::NetworkError,
            "Timeout" => Self::Timeout,
            "ExecutorException" => Self::ExecutorException,
            "MissingCommand" => Self::MissingCommand,
            "CommandNotAllowed" => Self::CommandNotAllowed,
            "PSFailure" => Self::PsFailure,
            "UnsupportedExecutor" => Self::UnsupportedExecutor,
            "NullRequest" => Self::NullRequest,
            "MissingRequestId" => Self::MissingRequestId,
            "MissingPsCommand" => Self::MissingPsCommand,
            "MissingForwardBase" => Self::MissingForwardBase,
            "BodyTooLarge" => Self::BodyTooLarge,
            "InvalidHttpMethod" => Self::InvalidHttpMethod,
            "Internal" => Self::Internal,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Unified gateway error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use fg_error::{GatewayError, ErrorCode};
///
/// let err = GatewayError::new(ErrorCode::Timeout, "attempt exceeded its deadline")
///     .with_context("attempt", 2)
///     .with_context("per_attempt_timeout_ms", 10_000);
/// ```
pub struct GatewayError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl GatewayError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("GatewayError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`GatewayError`] (without the opaque source).
///
/// Mirrors the dispatch-response error body shape used for both validation
/// rejections (`{code, message, request_id, timestamp}`) and failure-shaped
/// `executor_result`s (`{error_code, error, is_transient}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&GatewayError> for GatewayErrorDto {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<GatewayErrorDto> for GatewayError {
    fn from(dto: GatewayErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
