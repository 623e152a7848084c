//! Configuration loading, validation, and merging for the gateway.
//!
//! This crate provides [`GatewayConfig`] — the top-level runtime settings
//! tree (service / retry / http / shell) — together with helpers for
//! loading from TOML files, applying environment overrides, merging
//! overlays, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// `retry.per_attempt_timeout_ms` is unusually large.
    LargePerAttemptTimeout {
        /// The configured value, in milliseconds.
        ms: u64,
    },
    /// `http.default_timeout_sec` is unusually large.
    LargeHttpTimeout {
        /// The configured value, in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargePerAttemptTimeout { ms } => {
                write!(f, "retry.per_attempt_timeout_ms is unusually large ({ms}ms)")
            }
            ConfigWarning::LargeHttpTimeout { secs } => {
                write!(f, "http.default_timeout_sec is unusually large ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Service-level settings (instance id, body size cap).
    pub service: ServiceConfig,
    /// Retry controller settings.
    pub retry: RetryConfig,
    /// HTTP-forwarding executor settings.
    pub http: HttpConfig,
    /// Remote-shell executor settings.
    pub shell: ShellConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The single, shared maximum request body size in bytes.
    ///
    /// Both the `Content-Length` check and the streaming check use this one
    /// value, rather than two independently configured limits.
    pub fn max_body_bytes(&self) -> usize {
        self.service.max_request_body_kb.saturating_mul(1024)
    }

    /// The maximum HTTP response body size in bytes before truncation.
    pub fn max_response_body_bytes(&self) -> usize {
        self.http.max_response_body_kb.saturating_mul(1024)
    }
}

/// Service-level settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identifier echoed in `/metrics` and response headers.
    pub instance_id: String,
    /// Maximum accepted request body size, in kilobytes.
    pub max_request_body_kb: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instance_id: "remote-executor-01".to_string(),
            max_request_body_kb: 1000,
        }
    }
}

/// Retry controller settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (≥ 1).
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the exponential component of the backoff, in milliseconds.
    pub max_delay_ms: u64,
    /// Fraction of the exponential delay used as the upper bound of the
    /// additive jitter term, in `[0, 1]`.
    pub jitter_fraction: f64,
    /// Per-attempt deadline, in milliseconds.
    pub per_attempt_timeout_ms: u64,
    /// HTTP status codes classified as transient failures.
    pub transient_status_codes: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter_fraction: 0.25,
            per_attempt_timeout_ms: 10_000,
            transient_status_codes: BTreeSet::from([408, 429, 500, 502, 503, 504]),
        }
    }
}

/// HTTP-forwarding executor settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum forwarded response body size, in kilobytes, before truncation.
    pub max_response_body_kb: usize,
    /// Default outbound transport timeout, in seconds.
    pub default_timeout_sec: u64,
    /// Header names never forwarded upstream (case-insensitive).
    pub filtered_headers: BTreeSet<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_response_body_kb: 512,
            default_timeout_sec: 15,
            filtered_headers: BTreeSet::from([
                "Authorization".to_string(),
                "Proxy-Authorization".to_string(),
                "Cookie".to_string(),
            ]),
        }
    }
}

/// Remote-shell executor settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Allowlisted command names (case-insensitive exact match).
    pub allowed_commands: BTreeSet<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allowed_commands: BTreeSet::from([
                "Get-Mailbox".to_string(),
                "Get-User".to_string(),
                "Get-DistributionGroup".to_string(),
            ]),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which `retry.per_attempt_timeout_ms` generates a warning.
const LARGE_PER_ATTEMPT_TIMEOUT_MS: u64 = 60_000;

/// Threshold above which `http.default_timeout_sec` generates a warning.
const LARGE_HTTP_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`GatewayConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`GatewayConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => GatewayConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`GatewayConfig`].
pub fn parse_toml(content: &str) -> Result<GatewayConfig, ConfigError> {
    toml::from_str::<GatewayConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables follow `GATEWAY_<SECTION>__<KEY>` (double underscore
/// is the path separator):
/// - `GATEWAY_SERVICE__INSTANCE_ID`, `GATEWAY_SERVICE__MAX_REQUEST_BODY_KB`
/// - `GATEWAY_RETRY__MAX_ATTEMPTS`, `GATEWAY_RETRY__BASE_DELAY_MS`,
///   `GATEWAY_RETRY__MAX_DELAY_MS`, `GATEWAY_RETRY__JITTER_FRACTION`,
///   `GATEWAY_RETRY__PER_ATTEMPT_TIMEOUT_MS`
/// - `GATEWAY_HTTP__MAX_RESPONSE_BODY_KB`, `GATEWAY_HTTP__DEFAULT_TIMEOUT_SEC`
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(val) = std::env::var("GATEWAY_SERVICE__INSTANCE_ID") {
        config.service.instance_id = val;
    }
    if let Some(v) = parse_env::<usize>("GATEWAY_SERVICE__MAX_REQUEST_BODY_KB") {
        config.service.max_request_body_kb = v;
    }
    if let Some(v) = parse_env::<u32>("GATEWAY_RETRY__MAX_ATTEMPTS") {
        config.retry.max_attempts = v;
    }
    if let Some(v) = parse_env::<u64>("GATEWAY_RETRY__BASE_DELAY_MS") {
        config.retry.base_delay_ms = v;
    }
    if let Some(v) = parse_env::<u64>("GATEWAY_RETRY__MAX_DELAY_MS") {
        config.retry.max_delay_ms = v;
    }
    if let Some(v) = parse_env::<f64>("GATEWAY_RETRY__JITTER_FRACTION") {
        config.retry.jitter_fraction = v;
    }
    if let Some(v) = parse_env::<u64>("GATEWAY_RETRY__PER_ATTEMPT_TIMEOUT_MS") {
        config.retry.per_attempt_timeout_ms = v;
    }
    if let Some(v) = parse_env::<usize>("GATEWAY_HTTP__MAX_RESPONSE_BODY_KB") {
        config.http.max_response_body_kb = v;
    }
    if let Some(v) = parse_env::<u64>("GATEWAY_HTTP__DEFAULT_TIMEOUT_SEC") {
        config.http.default_timeout_sec = v;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero `max_attempts`, empty shell allowlist, out-of-range
/// jitter fraction) are returned as a [`ConfigError::ValidationError`]; soft
/// issues come back as warnings.
pub fn validate_config(config: &GatewayConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".into());
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_fraction) {
        errors.push(format!(
            "retry.jitter_fraction must be in [0, 1], got {}",
            config.retry.jitter_fraction
        ));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        errors.push("retry.max_delay_ms must be >= retry.base_delay_ms".into());
    }
    if config.shell.allowed_commands.is_empty() {
        errors.push("shell.allowed_commands must not be empty".into());
    }
    if config.service.max_request_body_kb == 0 {
        errors.push("service.max_request_body_kb must be at least 1".into());
    }
    if config.http.max_response_body_kb == 0 {
        errors.push("http.max_response_body_kb must be at least 1".into());
    }

    if config.retry.per_attempt_timeout_ms > LARGE_PER_ATTEMPT_TIMEOUT_MS {
        warnings.push(ConfigWarning::LargePerAttemptTimeout {
            ms: config.retry.per_attempt_timeout_ms,
        });
    }
    if config.http.default_timeout_sec > LARGE_HTTP_TIMEOUT_SECS {
        warnings.push(ConfigWarning::LargeHttpTimeout {
            secs: config.http.default_timeout_sec,
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Every field in `overlay` wins over `base`,
/// evaluated field-by-field (there are no optional fields at this layer, so
/// the overlay value is always taken — this mirrors a defaults-then-file
/// then-env layering where each later layer fully replaces the field).
pub fn merge_configs(base: GatewayConfig, overlay: GatewayConfig) -> GatewayConfig {
    let default = GatewayConfig::default();

    let service = ServiceConfig {
        instance_id: pick(&overlay.service.instance_id, &default.service.instance_id, &base.service.instance_id),
        max_request_body_kb: pick_num(
            overlay.service.max_request_body_kb,
            default.service.max_request_body_kb,
            base.service.max_request_body_kb,
        ),
    };

    let retry = RetryConfig {
        max_attempts: pick_num(overlay.retry.max_attempts, default.retry.max_attempts, base.retry.max_attempts),
        base_delay_ms: pick_num(overlay.retry.base_delay_ms, default.retry.base_delay_ms, base.retry.base_delay_ms),
        max_delay_ms: pick_num(overlay.retry.max_delay_ms, default.retry.max_delay_ms, base.retry.max_delay_ms),
        jitter_fraction: if (overlay.retry.jitter_fraction - default.retry.jitter_fraction).abs() > f64::EPSILON {
            overlay.retry.jitter_fraction
        } else {
            base.retry.jitter_fraction
        },
        per_attempt_timeout_ms: pick_num(
            overlay.retry.per_attempt_timeout_ms,
            default.retry.per_attempt_timeout_ms,
            base.retry.per_attempt_timeout_ms,
        ),
        transient_status_codes: if overlay.retry.transient_status_codes != default.retry.transient_status_codes {
            overlay.retry.transient_status_codes
        } else {
            base.retry.transient_status_codes
        },
    };

    let http = HttpConfig {
        max_response_body_kb: pick_num(
            overlay.http.max_response_body_kb,
            default.http.max_response_body_kb,
            base.http.max_response_body_kb,
        ),
        default_timeout_sec: pick_num(
            overlay.http.default_timeout_sec,
            default.http.default_timeout_sec,
            base.http.default_timeout_sec,
        ),
        filtered_headers: if overlay.http.filtered_headers != default.http.filtered_headers {
            overlay.http.filtered_headers
        } else {
            base.http.filtered_headers
        },
    };

    let shell = ShellConfig {
        allowed_commands: if overlay.shell.allowed_commands != default.shell.allowed_commands {
            overlay.shell.allowed_commands
        } else {
            base.shell.allowed_commands
        },
    };

    GatewayConfig {
        service,
        retry,
        http,
        shell,
    }
}

fn pick(overlay: &str, default: &str, base: &str) -> String {
    if overlay != default {
        overlay.to_string()
    } else {
        base.to_string()
    }
}

fn pick_num<T: PartialEq>(overlay: T, default: T, base: T) -> T {
    if overlay != default { overlay } else { base }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
