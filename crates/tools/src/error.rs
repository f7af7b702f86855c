use thiserror::Error;
use toolsmith_core::{CoreError, StoreError};
use toolsmith_executor::ExecutorError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid tool name: {0:?}")]
    InvalidName(String),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Version {version} of {name} not found")]
    VersionNotFound { name: String, version: u32 },
    #[error(transparent)]
    InvalidTransition(#[from] CoreError),
    #[error("{name} v{version} is older than registered v{registered}")]
    Superseded {
        name: String,
        version: u32,
        registered: u32,
    },
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}
