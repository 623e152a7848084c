// SPDX-License-Identifier: MIT OR Apache-2.0
//! Allowlisted remote-shell simulator executor.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod lifecycle;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fg_core::{ExecutionOutcome, ExecutionResult, Executor, FailurePayload, RequestEnvelope, SuccessPayload};
use fg_error::ErrorCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleState, LifecycleTransition};

const CONNECT_DELAY: Duration = Duration::from_millis(20);
const DISCONNECT_DELAY: Duration = Duration::from_millis(10);

const DEFAULT_RESULT_SIZE: &str = "100";
const DEFAULT_MAX_RESULTS: u32 = 100;

/// Configuration consumed by [`ShellExecutor`]. Mirrors the `shell.*` tree
/// in `fg-config`; kept as a plain field here to avoid a cross-crate
/// dependency.
#[derive(Debug, Clone)]
pub struct ShellExecutorConfig {
    /// Commands accepted by the allowlist, matched case-insensitively.
    pub allowed_commands: BTreeSet<String>,
}

impl Default for ShellExecutorConfig {
    fn default() -> Self {
        Self {
            allowed_commands: ["Get-Mailbox", "Get-User", "Get-DistributionGroup"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Simulates a three-phase remote PowerShell session (connect, execute,
/// disconnect) against an allowlist of commands, without shelling out to a
/// real process.
pub struct ShellExecutor {
    config: ShellExecutorConfig,
}

impl ShellExecutor {
    /// Build a new executor from the allowlist configuration.
    pub fn new(config: ShellExecutorConfig) -> Self {
        Self { config }
    }

    fn is_allowed(&self, command: &str) -> bool {
        self.config.allowed_commands.iter().any(|c| c.eq_ignore_ascii_case(command))
    }

    fn render_command_line(command: &str, filter: Option<&str>, result_size: &str) -> String {
        let mut line = command.to_string();
        if let Some(filter) = filter {
            line.push_str(&format!(" -Filter \"{filter}\""));
        }
        line.push_str(&format!(" -ResultSize {result_size}"));
        line
    }

    fn generate_output(command: &str, filter: Option<&str>, result_size: &str, max_results: u32) -> (Vec<String>, Vec<serde_json::Value>) {
        let mut stdout = Vec::new();
        let mut objects = Vec::new();

        match command {
            "Get-Mailbox" => {
                let count = max_results.min(5);
                for i in 0..count {
                    let mailbox_type = ["UserMailbox", "SharedMailbox", "RoomMailbox", "EquipmentMailbox"][i as usize % 4];
                    let record = serde_json::json!({
                        "DisplayName": format!("Mailbox User {i}"),
                        "PrimarySmtpAddress": format!("user{i}@example.com"),
                        "MailboxType": mailbox_type,
                        "DatabaseName": format!("DB{:02}", i % 4),
                    });
                    stdout.push(record.to_string());
                    objects.push(record);
                }
            }
            "Get-User" => {
                let count = max_results.min(3);
                for i in 0..count {
                    let department = ["Engineering", "Sales", "Support"][i as usize % 3];
                    let record = serde_json::json!({
                        "Name": format!("User {i}"),
                        "UserPrincipalName": format!("user{i}@example.com"),
                        "Department": department,
                    });
                    stdout.push(record.to_string());
                    objects.push(record);
                }
            }
            other => {
                stdout.push(format!(
                    "{other} filter={} resultSize={result_size}",
                    filter.unwrap_or("<none>")
                ));
            }
        }

        stdout.push("Simulated output".to_string());
        (stdout, objects)
    }

    async fn sleep_honoring_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    fn disconnect(manager: &mut LifecycleManager) {
        if let Err(err) = manager.transition(LifecycleState::Stopping, Some("disconnecting".to_string())) {
            warn!(target: "gateway.shell_executor", error = %err, "disconnect transition to Stopping failed");
            return;
        }
        if let Err(err) = manager.transition(LifecycleState::Stopped, Some("disconnected".to_string())) {
            warn!(target: "gateway.shell_executor", error = %err, "disconnect transition to Stopped failed");
        }
    }
}

fn classify_other_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["busy", "timeout", "unavailable"].iter().any(|needle| lower.contains(needle))
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, envelope: &RequestEnvelope, cancel: CancellationToken) -> ExecutionResult {
        let started_at = Utc::now();

        let Some(command) = envelope.headers().get("X-PS-Command") else {
            return ExecutionResult::new(
                0,
                started_at,
                Utc::now(),
                ExecutionOutcome::PermanentFailure(FailurePayload::new(ErrorCode::MissingCommand, "X-PS-Command header is required")),
            );
        };

        if !self.is_allowed(command) {
            let allowed = self.config.allowed_commands.iter().cloned().collect::<Vec<_>>().join(", ");
            return ExecutionResult::new(
                0,
                started_at,
                Utc::now(),
                ExecutionOutcome::PermanentFailure(FailurePayload::new(
                    ErrorCode::CommandNotAllowed,
                    format!("command {command} is not in the allowed list: {allowed}"),
                )),
            );
        }

        let filter = envelope.headers().get("X-PS-Filter");
        let result_size = envelope.headers().get("X-PS-ResultSize").unwrap_or(DEFAULT_RESULT_SIZE);
        let max_results: u32 = envelope
            .headers()
            .get("X-PS-MaxResults")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let mut manager = LifecycleManager::new();

        // Connect phase.
        if Self::sleep_honoring_cancel(CONNECT_DELAY, &cancel).await {
            return timeout_result(started_at);
        }
        if let Err(err) = manager.transition(LifecycleState::Starting, Some("connecting".to_string())) {
            return failure_result(started_at, err.to_string());
        }
        if let Err(err) = manager.transition(LifecycleState::Ready, Some("connected".to_string())) {
            return failure_result(started_at, err.to_string());
        }

        // Execute phase.
        if let Err(err) = manager.transition(LifecycleState::Running, Some("executing".to_string())) {
            Self::disconnect(&mut manager);
            return failure_result(started_at, err.to_string());
        }

        if Self::sleep_honoring_cancel(Duration::from_millis(5), &cancel).await {
            Self::disconnect(&mut manager);
            return timeout_result(started_at);
        }

        let command_line = Self::render_command_line(command, filter, result_size);
        let (stdout, objects) = Self::generate_output(command, filter, result_size, max_results);
        debug!(target: "gateway.shell_executor", command_line = %command_line, "simulated session executed");

        if let Err(err) = manager.transition(LifecycleState::Ready, Some("executed".to_string())) {
            Self::disconnect(&mut manager);
            return failure_result(started_at, err.to_string());
        }

        // Disconnect phase — guaranteed on every exit path above; here it's the
        // normal-completion path.
        if Self::sleep_honoring_cancel(DISCONNECT_DELAY, &cancel).await {
            Self::disconnect(&mut manager);
            return timeout_result(started_at);
        }
        Self::disconnect(&mut manager);

        ExecutionResult::new(
            0,
            started_at,
            Utc::now(),
            ExecutionOutcome::Success(SuccessPayload::Shell {
                command: command_line,
                stdout,
                stderr: Vec::new(),
                objects,
            }),
        )
    }
}

fn timeout_result(started_at: chrono::DateTime<Utc>) -> ExecutionResult {
    ExecutionResult::new(
        0,
        started_at,
        Utc::now(),
        ExecutionOutcome::TransientFailure(FailurePayload::new(ErrorCode::Timeout, "cancelled during simulated session")),
    )
}

fn failure_result(started_at: chrono::DateTime<Utc>, message: String) -> ExecutionResult {
    let transient = classify_other_failure(&message);
    let payload = FailurePayload::new(ErrorCode::PsFailure, message);
    let outcome = if transient {
        ExecutionOutcome::TransientFailure(payload)
    } else {
        ExecutionOutcome::PermanentFailure(payload)
    };
    ExecutionResult::new(0, started_at, Utc::now(), outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::RequestEnvelopeBuilder;

    fn executor() -> ShellExecutor {
        ShellExecutor::new(ShellExecutorConfig::default())
    }

    #[tokio::test]
    async fn missing_command_is_permanent() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x").build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        assert!(!result.is_transient());
        assert_eq!(result.outcome.failure().unwrap().error_code, ErrorCode::MissingCommand);
    }

    #[tokio::test]
    async fn disallowed_command_is_permanent_and_lists_allowed() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Remove-Mailbox")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        let failure = result.outcome.failure().unwrap();
        assert_eq!(failure.error_code, ErrorCode::CommandNotAllowed);
        assert!(failure.error_message.contains("Get-Mailbox"));
    }

    #[tokio::test]
    async fn allowed_command_is_case_insensitive() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "get-mailbox")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn get_mailbox_produces_records_and_simulated_output_line() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Get-Mailbox")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        match result.outcome {
            ExecutionOutcome::Success(SuccessPayload::Shell { command, stdout, objects, .. }) => {
                assert!(command.contains("Get-Mailbox -ResultSize 100"));
                assert_eq!(objects.len(), 5);
                assert_eq!(stdout.last().unwrap(), "Simulated output");
            }
            _ => panic!("expected shell success"),
        }
    }

    #[tokio::test]
    async fn get_user_caps_at_three_records() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Get-User")
            .header("X-PS-MaxResults", "50")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        match result.outcome {
            ExecutionOutcome::Success(SuccessPayload::Shell { objects, .. }) => assert_eq!(objects.len(), 3),
            _ => panic!("expected shell success"),
        }
    }

    #[tokio::test]
    async fn other_allowlisted_command_echoes_textually() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Get-DistributionGroup")
            .header("X-PS-Filter", "Name -like 'eng*'")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        match result.outcome {
            ExecutionOutcome::Success(SuccessPayload::Shell { stdout, objects, command, .. }) => {
                assert!(objects.is_empty());
                assert!(stdout[0].contains("Get-DistributionGroup"));
                assert!(command.contains("-Filter"));
            }
            _ => panic!("expected shell success"),
        }
    }

    #[tokio::test]
    async fn command_line_includes_filter_when_present() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Get-User")
            .header("X-PS-Filter", "Department -eq 'Sales'")
            .build();
        let result = executor().execute(&envelope, CancellationToken::new()).await;
        match result.outcome {
            ExecutionOutcome::Success(SuccessPayload::Shell { command, .. }) => {
                assert!(command.contains("-Filter \"Department -eq 'Sales'\""));
            }
            _ => panic!("expected shell success"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_transient_timeout() {
        let envelope = RequestEnvelopeBuilder::new("rid-1", "POST", "/x")
            .header("X-PS-Command", "Get-Mailbox")
            .build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor().execute(&envelope, cancel).await;
        assert!(result.is_transient());
        assert_eq!(result.outcome.failure().unwrap().error_code, ErrorCode::Timeout);
    }

    #[test]
    fn classify_other_failure_matches_keywords_case_insensitively() {
        assert!(classify_other_failure("sidecar BUSY right now"));
        assert!(classify_other_failure("operation timeout"));
        assert!(classify_other_failure("service unavailable"));
        assert!(!classify_other_failure("completely unrelated error"));
    }
}
