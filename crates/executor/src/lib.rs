//! Sandbox executor: runs validated tool source in an isolated unit with a
//! hard wall-clock deadline and reports every outcome as data.

pub mod backend;
pub mod config;
pub mod error;
pub mod limits;
pub mod protocol;
pub mod sandbox;
pub mod sanitize;
pub mod schema;
pub mod worker;

pub use backend::{IsolationBackend, ProcessBackend, ThreadBackend};
pub use config::{ExecutorConfig, Isolation};
pub use error::ExecutorError;
pub use protocol::{WorkerRequest, WorkerResponse};
pub use sandbox::SandboxExecutor;
