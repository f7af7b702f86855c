//! What crosses the isolation boundary: one request in, one response out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use toolsmith_core::{Arguments, ExecutionResult, ExecutionStatus};
use toolsmith_policy::ValidatorPolicy;
use toolsmith_script::{ErrorKind, Limits, RunFailure, RunOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub source: String,
    pub entry_point: String,
    #[serde(default)]
    pub arguments: Arguments,
    pub policy: ValidatorPolicy,
    pub output_cap: usize,
    pub max_call_depth: usize,
}

impl WorkerRequest {
    fn limits(&self) -> Limits {
        Limits {
            max_call_depth: self.max_call_depth,
            output_cap: self.output_cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkerResponse {
    pub fn failure(status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            value: None,
            output: String::new(),
            output_truncated: false,
            message: Some(message.into()),
        }
    }

    pub fn from_run(result: Result<RunOutcome, RunFailure>) -> Self {
        match result {
            Ok(outcome) => Self {
                status: ExecutionStatus::Ok,
                value: Some(outcome.value),
                output: outcome.output,
                output_truncated: outcome.output_truncated,
                message: None,
            },
            Err(failure) => Self {
                status: status_for(failure.error.kind),
                value: None,
                output: failure.output,
                output_truncated: failure.output_truncated,
                message: Some(failure.error.to_string()),
            },
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        let result = match (self.status, self.value) {
            (ExecutionStatus::Ok, Some(value)) => ExecutionResult::ok(value, String::new(), false),
            (ExecutionStatus::Ok, None) => {
                ExecutionResult::failure(ExecutionStatus::RuntimeViolation, "execution unit returned no value")
            }
            (status, _) => ExecutionResult::failure(
                status,
                self.message.unwrap_or_else(|| status.to_string()),
            ),
        };
        result.with_output(self.output, self.output_truncated)
    }
}

/// Failure class of an interpreter error.
pub fn status_for(kind: ErrorKind) -> ExecutionStatus {
    match kind {
        ErrorKind::Raised => ExecutionStatus::RaisedError,
        ErrorKind::Violation | ErrorKind::Exhausted => ExecutionStatus::RuntimeViolation,
        ErrorKind::Interrupted => ExecutionStatus::Timeout,
    }
}

/// Run `request` to completion on this side of the boundary.
///
/// `inline` runs on the calling thread, which must already have an
/// interpreter-sized stack.
pub fn evaluate(request: WorkerRequest, interrupt: Option<Arc<AtomicBool>>, inline: bool) -> WorkerResponse {
    let limits = request.limits();
    let policy = Arc::new(request.policy);
    let result = if inline {
        toolsmith_script::run_tool_inline(
            &request.source,
            &request.entry_point,
            &request.arguments,
            policy,
            limits,
            interrupt,
        )
    } else {
        toolsmith_script::run_tool(
            &request.source,
            &request.entry_point,
            &request.arguments,
            policy,
            limits,
            interrupt,
        )
    };
    WorkerResponse::from_run(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(source: &str, entry: &str) -> WorkerRequest {
        WorkerRequest {
            source: source.to_string(),
            entry_point: entry.to_string(),
            arguments: Arguments::new(),
            policy: ValidatorPolicy::default(),
            output_cap: 16,
            max_call_depth: 50,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(status_for(ErrorKind::Raised), ExecutionStatus::RaisedError);
        assert_eq!(status_for(ErrorKind::Exhausted), ExecutionStatus::RuntimeViolation);
        assert_eq!(status_for(ErrorKind::Interrupted), ExecutionStatus::Timeout);
    }

    #[test]
    fn test_evaluate_ok_with_capped_output() {
        let resp = evaluate(
            request("def f():\n    print('x' * 40)\n    return [1, 2]\n", "f"),
            None,
            false,
        );
        assert_eq!(resp.status, ExecutionStatus::Ok);
        assert_eq!(resp.value, Some(json!([1, 2])));
        assert!(resp.output_truncated);
        assert!(resp.output.len() <= 16);
    }

    #[test]
    fn test_size_bound_is_the_tools_own_error() {
        let resp = evaluate(request("def f():\n    return [0] * 2000000\n", "f"), None, false);
        assert_eq!(resp.status, ExecutionStatus::RaisedError);
        assert!(resp.message.unwrap().starts_with("MemoryError"));
    }

    #[test]
    fn test_call_depth_comes_from_request() {
        let src = "def f(n):\n    return 0 if n == 0 else f(n - 1)\n";
        let mut req = request(src, "f");
        req.arguments.insert("n".into(), json!(100));
        let resp = evaluate(req, None, false);
        assert_eq!(resp.status, ExecutionStatus::RaisedError);
        assert!(resp.message.unwrap().starts_with("RecursionError"));
    }

    #[test]
    fn test_response_roundtrip_into_result() {
        let resp = WorkerResponse::failure(ExecutionStatus::RaisedError, "ValueError: bad");
        let wire = serde_json::to_string(&resp).unwrap();
        let result = serde_json::from_str::<WorkerResponse>(&wire).unwrap().into_result();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert_eq!(result.diagnostic_message(), Some("ValueError: bad"));
    }
}
