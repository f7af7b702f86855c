use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use toolsmith_core::ExecutionStatus;
use tracing::{error, warn};

use super::IsolationBackend;
use crate::error::ExecutorError;
use crate::protocol::{self, WorkerRequest, WorkerResponse};

/// In-process isolation: the interpreter runs on its own OS thread and a
/// watchdog raises its interrupt flag at the deadline. The caller is released
/// at the deadline whether or not the thread has noticed yet.
#[derive(Debug, Default)]
pub struct ThreadBackend;

#[async_trait]
impl IsolationBackend for ThreadBackend {
    async fn run(
        &self,
        request: WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResponse, ExecutorError> {
        let interrupt = Arc::new(AtomicBool::new(false));
        let flag = interrupt.clone();
        let handle =
            tokio::task::spawn_blocking(move || protocol::evaluate(request, Some(flag), false));

        match timeout(deadline, handle).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(join_err)) => {
                error!("Execution thread failed: {}", join_err);
                Ok(WorkerResponse::failure(
                    ExecutionStatus::RuntimeViolation,
                    "execution unit aborted",
                ))
            }
            Err(_) => {
                interrupt.store(true, Ordering::Relaxed);
                warn!("Execution timed out after {}ms", deadline.as_millis());
                Ok(WorkerResponse::failure(
                    ExecutionStatus::Timeout,
                    format!("deadline of {}ms exceeded", deadline.as_millis()),
                ))
            }
        }
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use toolsmith_core::Arguments;
    use toolsmith_policy::ValidatorPolicy;

    fn request(source: &str) -> WorkerRequest {
        WorkerRequest {
            source: source.to_string(),
            entry_point: "f".to_string(),
            arguments: Arguments::new(),
            policy: ValidatorPolicy::default(),
            output_cap: 4096,
            max_call_depth: 200,
        }
    }

    #[tokio::test]
    async fn test_returns_value() {
        let resp = ThreadBackend
            .run(request("def f():\n    return 41 + 1\n"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status, ExecutionStatus::Ok);
        assert_eq!(resp.value, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let started = Instant::now();
        let resp = ThreadBackend
            .run(
                request("def f():\n    while True:\n        pass\n"),
                Duration::from_millis(200),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
