use rlimit::{getrlimit, setrlimit, Resource};
use std::io;
use std::time::Duration;
use toolsmith_script::INTERPRETER_STACK;

const OPEN_FILES_LIMIT: u64 = 16;
// Main-thread stack for the inline interpreter plus headroom for the worker itself
const STACK_LIMIT: u64 = INTERPRETER_STACK as u64 + 8 * 1024 * 1024;

/// OS resource ceilings for one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space: u64,
    pub cpu_seconds: u64,
    pub file_size: u64,
    pub open_files: u64,
    pub processes: u64,
    pub stack: u64,
}

impl ResourceLimits {
    /// CPU time is the deadline rounded up plus one second, so the wall-clock
    /// watchdog normally fires first.
    pub fn for_execution(memory_limit_bytes: u64, deadline: Duration) -> Self {
        let whole = deadline.as_secs() + u64::from(deadline.subsec_nanos() > 0);
        Self {
            address_space: memory_limit_bytes,
            cpu_seconds: whole + 1,
            file_size: 0,
            open_files: OPEN_FILES_LIMIT,
            processes: 0,
            stack: STACK_LIMIT,
        }
    }

    pub fn apply(&self) -> io::Result<()> {
        clamp(Resource::STACK, self.stack)?;
        clamp(Resource::AS, self.address_space)?;
        clamp(Resource::CPU, self.cpu_seconds)?;
        clamp(Resource::FSIZE, self.file_size)?;
        clamp(Resource::NOFILE, self.open_files)?;
        clamp(Resource::NPROC, self.processes)?;
        Ok(())
    }
}

/// Set both soft and hard limit to `value`, or to the existing hard limit if
/// that is lower.
fn clamp(resource: Resource, value: u64) -> io::Result<()> {
    let (_, hard) = getrlimit(resource)?;
    let target = value.min(hard);
    setrlimit(resource, target, target)
}

/// Runs in the forked child before exec: own session, fresh namespaces where
/// the kernel allows them, then the rlimits.
#[cfg(unix)]
pub fn isolate(limits: &ResourceLimits) -> io::Result<()> {
    // SAFETY: setsid has no memory-safety preconditions
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    enter_namespaces();
    limits.apply()
}

/// Best effort: unprivileged user namespaces may be disabled.
#[cfg(target_os = "linux")]
fn enter_namespaces() -> bool {
    // SAFETY: unshare only changes namespace membership of the calling process
    unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) == 0 }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn enter_namespaces() -> bool {
    false
}

/// SIGKILL the worker's whole process group.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    // SAFETY: plain syscall; a stale pgid only yields ESRCH
    unsafe {
        libc::killpg(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_limit_rounds_deadline_up() {
        let limits = ResourceLimits::for_execution(1 << 28, Duration::from_millis(5000));
        assert_eq!(limits.cpu_seconds, 6);
        let limits = ResourceLimits::for_execution(1 << 28, Duration::from_millis(1200));
        assert_eq!(limits.cpu_seconds, 3);
    }

    #[test]
    fn test_worker_cannot_write_or_fork() {
        let limits = ResourceLimits::for_execution(1 << 28, Duration::from_secs(1));
        assert_eq!(limits.file_size, 0);
        assert_eq!(limits.processes, 0);
        assert!(limits.stack >= INTERPRETER_STACK as u64);
        assert!(limits.address_space > limits.stack);
    }
}
