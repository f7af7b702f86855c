use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LifecycleError;

/// Holds one name's critical section; dropping it releases the name.
pub struct NameGuard {
    _inner: Box<dyn Send + Sync>,
}

impl NameGuard {
    pub fn new<T: Send + Sync + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Per-name exclusive sections around registry updates. Different names
/// never contend.
#[async_trait]
pub trait NameLocks: Send + Sync {
    async fn acquire(&self, name: &str) -> Result<NameGuard, LifecycleError>;
}

/// In-process locks with no timeout.
#[derive(Default)]
pub struct LocalNameLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalNameLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NameLocks for LocalNameLocks {
    async fn acquire(&self, name: &str) -> Result<NameGuard, LifecycleError> {
        let lock = self
            .locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(NameGuard::new(lock.lock_owned().await))
    }
}
