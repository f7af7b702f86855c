//! The worker side of the process backend. Reads one request from stdin,
//! writes one response to stdout, never logs to either.

use rlimit::{getrlimit, Resource};
use std::io::{Read, Write};
use toolsmith_script::INTERPRETER_STACK;

use crate::error::ExecutorError;
use crate::protocol::{self, WorkerRequest};

pub fn serve<R: Read, W: Write>(mut input: R, mut output: W) -> Result<(), ExecutorError> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let request: WorkerRequest = serde_json::from_slice(&raw)?;

    let response = protocol::evaluate(request, None, main_stack_is_large_enough());

    serde_json::to_writer(&mut output, &response)?;
    output.flush()?;
    Ok(())
}

/// Entry point shared by `toolsmith-worker` and `toolsmith worker`.
pub fn run() -> std::process::ExitCode {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    match serve(stdin.lock(), stdout.lock()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(_) => std::process::ExitCode::FAILURE,
    }
}

// Under the process backend thread creation is forbidden, so the interpreter
// has to use the main stack, which the parent sized through RLIMIT_STACK.
fn main_stack_is_large_enough() -> bool {
    match getrlimit(Resource::STACK) {
        Ok((soft, _)) => soft >= INTERPRETER_STACK as u64,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerResponse;
    use serde_json::json;
    use toolsmith_core::ExecutionStatus;

    #[test]
    fn test_serve_roundtrip() {
        let request = json!({
            "source": "def add(a, b):\n    print('adding')\n    return a + b\n",
            "entry_point": "add",
            "arguments": {"a": 2, "b": 5},
            "policy": toolsmith_policy::ValidatorPolicy::default(),
            "output_cap": 4096,
            "max_call_depth": 200,
        });
        let input = serde_json::to_vec(&request).unwrap();
        let mut output = Vec::new();
        serve(input.as_slice(), &mut output).unwrap();

        let response: WorkerResponse = serde_json::from_slice(&output).unwrap();
        assert_eq!(response.status, ExecutionStatus::Ok);
        assert_eq!(response.value, Some(json!(7)));
        assert_eq!(response.output, "adding\n");
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let mut output = Vec::new();
        assert!(serve(&b"not json"[..], &mut output).is_err());
        assert!(output.is_empty());
    }
}
