use async_trait::async_trait;
use std::time::Duration;

use crate::error::ExecutorError;
use crate::protocol::{WorkerRequest, WorkerResponse};

mod process;
mod thread;

pub use process::ProcessBackend;
pub use thread::ThreadBackend;

/// One isolated execution unit per call, reclaimed by the deadline at the
/// latest.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    async fn run(
        &self,
        request: WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResponse, ExecutorError>;

    fn name(&self) -> &'static str;
}
