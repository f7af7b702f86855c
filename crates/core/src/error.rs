use thiserror::Error;

use crate::types::ToolState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid transition for {name} v{version}: {from} -> {to}")]
    InvalidTransition {
        name: String,
        version: u32,
        from: ToolState,
        to: ToolState,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid tool name: {0}")]
    InvalidName(String),
}
