//! Generic async retry controller with exponential backoff and jitter.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::time::Duration;

use fg_core::{Clock, ExecutionOutcome, ExecutionResult, FailurePayload};
use fg_error::ErrorCode;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration governing attempt count, per-attempt timeout and backoff
/// shape. All fields correspond to `retry.*` settings in `fg-config`; this
/// crate keeps its own copy rather than depending on `fg-config` directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on the exponential term, before jitter, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1]`; additive, never negative.
    pub jitter_fraction: f64,
    /// Per-attempt deadline, in milliseconds.
    pub per_attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_fraction: 0.25,
            per_attempt_timeout_ms: 10_000,
        }
    }
}

/// The ordered, non-empty history of attempts produced by [`run`]. The last
/// element is always the terminal outcome.
#[derive(Debug, Clone)]
pub struct RetryResult {
    /// One entry per attempt made, in order.
    pub attempts: Vec<ExecutionResult>,
}

impl RetryResult {
    /// The terminal attempt.
    pub fn final_result(&self) -> &ExecutionResult {
        self.attempts.last().expect("retry history is never empty")
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Whether the terminal attempt succeeded.
    pub fn overall_success(&self) -> bool {
        self.final_result().is_success()
    }
}

/// Exponential backoff with additive jitter:
/// `exp = min(max_delay_ms, base_delay_ms * 2^(attempt-1))`,
/// `jitter = uniform(0, exp * jitter_fraction)`, `delay = exp + jitter`.
pub fn backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(63);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let exp_ms = config.base_delay_ms.saturating_mul(multiplier).min(config.max_delay_ms);

    let jitter_fraction = config.jitter_fraction.clamp(0.0, 1.0);
    let jitter_ceiling_ms = exp_ms as f64 * jitter_fraction;
    let jitter_ms = if jitter_ceiling_ms > 0.0 {
        rand::thread_rng().gen_range(0.0..=jitter_ceiling_ms)
    } else {
        0.0
    };

    Duration::from_millis(exp_ms) + Duration::from_millis(jitter_ms.round() as u64)
}

/// Run `action` up to `config.max_attempts` times, retrying transient
/// failures with exponential backoff between attempts.
///
/// `outer` is the caller's own cancellation signal (e.g. the inbound
/// connection's). Each attempt gets a child token derived from `outer` via
/// [`CancellationToken::child_token`], so cancelling `outer` cancels every
/// in-flight attempt without this controller needing to track them
/// individually; cancelling `outer` also short-circuits further retries.
/// On top of that, this controller races its own per-attempt deadline
/// timer — only a cancellation *caused by that timer* is classified as a
/// transient `Timeout` outcome; an `action` that reacts to `outer`
/// cancelling instead returns whatever its own cancellation handling
/// produces, and this loop stops retrying after observing it.
///
/// `action` receives the 1-based attempt ordinal and the per-attempt
/// [`CancellationToken`]; well-behaved actions honor it and return
/// promptly. If `action` panics, the panic is caught and translated into a
/// transient `ExecutorException` outcome rather than unwinding through the
/// loop.
pub async fn run<F, Fut>(
    config: &RetryConfig,
    request_id: &str,
    outer: &CancellationToken,
    clock: &dyn Clock,
    mut action: F,
) -> RetryResult
where
    F: FnMut(u32, CancellationToken) -> Fut,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = Vec::new();

    for attempt in 1..=max_attempts {
        let attempt_cancel = outer.child_token();
        let timer_cancel = attempt_cancel.clone();
        let started_at = clock.now();

        let join_handle = tokio::spawn(action(attempt, attempt_cancel));

        let sleep = tokio::time::sleep(Duration::from_millis(config.per_attempt_timeout_ms));
        tokio::pin!(sleep);
        tokio::pin!(join_handle);

        let result = tokio::select! {
            biased;
            joined = &mut join_handle => match joined {
                Ok(outcome) => outcome.with_attempt(attempt),
                Err(join_err) => {
                    warn!(target: "gateway.retry", request_id, attempt, error = %join_err, "executor panicked");
                    ExecutionResult::new(
                        attempt,
                        started_at,
                        clock.now(),
                        ExecutionOutcome::TransientFailure(FailurePayload::new(
                            ErrorCode::ExecutorException,
                            format!("executor panicked: {join_err}"),
                        )),
                    )
                }
            },
            _ = &mut sleep => {
                timer_cancel.cancel();
                join_handle.abort();
                warn!(target: "gateway.retry", request_id, attempt, "per-attempt timeout exceeded");
                ExecutionResult::new(
                    attempt,
                    started_at,
                    clock.now(),
                    ExecutionOutcome::TransientFailure(FailurePayload::new(
                        ErrorCode::Timeout,
                        "per-attempt timeout exceeded",
                    )),
                )
            }
        };

        let is_transient = result.is_transient();
        debug!(
            target: "gateway.retry",
            request_id,
            attempt,
            outcome = result.outcome_tag(),
            "attempt completed"
        );
        attempts.push(result);

        if !is_transient || attempt == max_attempts || outer.is_cancelled() {
            break;
        }

        let delay = backoff(config, attempt);
        debug!(
            target: "gateway.retry",
            request_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        tokio::select! {
            biased;
            _ = outer.cancelled() => {
                debug!(target: "gateway.retry", request_id, attempt, "outer cancellation during backoff, stopping retries");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    RetryResult { attempts }
}
