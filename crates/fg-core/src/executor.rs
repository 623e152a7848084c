//! The executor contract shared by every concrete executor.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::RequestEnvelope;
use crate::result::ExecutionResult;

/// A single attempt at forwarding a request, implemented once per executor
/// family (HTTP, shell).
///
/// Implementations must not panic or propagate errors out of `execute` —
/// every recognized failure mode is translated into an `ExecutionResult`.
/// Implementations must honor `cancel` and return promptly with a transient
/// `Timeout` result once it fires.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable lowercase tag identifying this executor, e.g. `"http"` or
    /// `"shell"`.
    fn name(&self) -> &'static str;

    /// Run one attempt against `envelope`, honoring `cancel` for the
    /// per-attempt deadline.
    async fn execute(&self, envelope: &RequestEnvelope, cancel: CancellationToken) -> ExecutionResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RequestEnvelopeBuilder;
    use crate::result::{ExecutionOutcome, SuccessPayload};
    use chrono::Utc;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _envelope: &RequestEnvelope, _cancel: CancellationToken) -> ExecutionResult {
            let now = Utc::now();
            ExecutionResult::new(
                1,
                now,
                now,
                ExecutionOutcome::Success(SuccessPayload::Shell {
                    command: "echo".into(),
                    stdout: vec!["Simulated output".into()],
                    stderr: vec![],
                    objects: vec![],
                }),
            )
        }
    }

    #[tokio::test]
    async fn executor_trait_object_is_callable() {
        let executor: Box<dyn Executor> = Box::new(EchoExecutor);
        let envelope = RequestEnvelopeBuilder::new("rid-1", "GET", "/x").build();
        let result = executor.execute(&envelope, CancellationToken::new()).await;
        assert_eq!(executor.name(), "echo");
        assert!(result.is_success());
    }
}
