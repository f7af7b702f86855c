use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use toolsmith_core::ExecutionStatus;
use tracing::{debug, warn};

use super::IsolationBackend;
use crate::error::ExecutorError;
use crate::limits::{self, ResourceLimits};
use crate::protocol::{WorkerRequest, WorkerResponse};

// Responses carry at most the capped output plus one JSON value
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// Out-of-process isolation: a fresh worker per execution with a cleared
/// environment, its own process group and OS resource limits.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    memory_limit_bytes: u64,
    kill_grace: Duration,
}

impl ProcessBackend {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        memory_limit_bytes: u64,
        kill_grace: Duration,
    ) -> Self {
        Self {
            program: locate(program.into()),
            args,
            memory_limit_bytes,
            kill_grace,
        }
    }

    fn command(&self, deadline: Duration) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .current_dir("/")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let limits = ResourceLimits::for_execution(self.memory_limit_bytes, deadline);
            // SAFETY: the hook only issues setsid/unshare/setrlimit syscalls
            unsafe {
                cmd.pre_exec(move || limits::isolate(&limits));
            }
        }
        #[cfg(not(unix))]
        let _ = deadline;

        cmd
    }

    async fn exchange(child: &mut Child, payload: Vec<u8>) -> std::io::Result<(ExitStatus, Vec<u8>)> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout unavailable"))?;

        // A worker that dies while reading closes the pipe; its exit status
        // says why, so a failed write is not an error here.
        if let Err(e) = stdin.write_all(&payload).await {
            debug!("Worker closed stdin early: {}", e);
        }
        drop(stdin);

        let mut buf = Vec::new();
        stdout.take(MAX_RESPONSE_BYTES).read_to_end(&mut buf).await?;
        let status = child.wait().await?;
        Ok((status, buf))
    }

    async fn reclaim(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            limits::kill_group(pid);
        }
        let _ = child.start_kill();
        match timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to reap worker: {}", e),
            Err(_) => warn!(
                "Worker not reaped within {}ms of kill",
                self.kill_grace.as_millis()
            ),
        }
    }
}

#[async_trait]
impl IsolationBackend for ProcessBackend {
    async fn run(
        &self,
        request: WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResponse, ExecutorError> {
        let payload = serde_json::to_vec(&request)?;
        let mut child = self.command(deadline).spawn().map_err(ExecutorError::Spawn)?;

        let exchanged = timeout(deadline, Self::exchange(&mut child, payload)).await;
        let (status, stdout) = match exchanged {
            Ok(result) => result?,
            Err(_) => {
                self.reclaim(&mut child).await;
                warn!("Worker killed after {}ms deadline", deadline.as_millis());
                return Ok(WorkerResponse::failure(
                    ExecutionStatus::Timeout,
                    format!("deadline of {}ms exceeded", deadline.as_millis()),
                ));
            }
        };

        if !status.success() {
            return Ok(WorkerResponse::failure(
                ExecutionStatus::RuntimeViolation,
                describe_exit(status),
            ));
        }
        match serde_json::from_slice::<WorkerResponse>(&stdout) {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!("Unparseable worker response: {}", e);
                Ok(WorkerResponse::failure(
                    ExecutionStatus::RuntimeViolation,
                    "execution unit produced no valid response",
                ))
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// A bare program name is looked for next to the running executable first;
/// the worker's environment is cleared, so it has no `PATH` of its own.
fn locate(program: PathBuf) -> PathBuf {
    if program.components().count() != 1 {
        return program;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&program)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or(program)
}

fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("execution unit terminated by signal {signal}");
        }
    }
    match status.code() {
        Some(code) => format!("execution unit exited with status {code}"),
        None => "execution unit terminated abnormally".to_string(),
    }
}
