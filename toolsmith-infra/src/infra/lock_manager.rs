use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock timeout for tool: {0}")]
    Timeout(String),
}

#[derive(Default)]
struct Held {
    names: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Blocking per-name mutual exclusion with a bounded wait.
///
/// Only names currently held are tracked, so the set stays as small as the
/// number of in-flight critical sections.
#[derive(Clone)]
pub struct LockManager {
    held: Arc<Held>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Arc::new(Held::default()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn acquire(&self, name: &str) -> Result<NameLock, LockError> {
        let start = Instant::now();
        let deadline = start + self.timeout;

        let mut names = self.held.names.lock();
        while names.contains(name) {
            if self.held.released.wait_until(&mut names, deadline).timed_out() && names.contains(name) {
                return Err(LockError::Timeout(name.to_string()));
            }
        }
        names.insert(name.to_string());
        drop(names);

        Ok(NameLock {
            held: Arc::clone(&self.held),
            name: name.to_string(),
            wait_time: start.elapsed(),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.names.lock().contains(name)
    }
}

/// Held lock on one name; released on drop.
pub struct NameLock {
    held: Arc<Held>,
    name: String,
    wait_time: Duration,
}

impl NameLock {
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLock {
    fn drop(&mut self) {
        self.held.names.lock().remove(&self.name);
        // Waiters for other names re-check and sleep again.
        self.held.released.notify_all();
    }
}
