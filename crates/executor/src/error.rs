use thiserror::Error;
use toolsmith_policy::PolicyError;

/// Host-side failures of the executor itself. Anything the tool does wrong
/// is reported inside an `ExecutionResult` instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("Failed to start execution unit: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
