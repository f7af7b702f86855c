use async_trait::async_trait;
use toolsmith_tools::{LifecycleError, NameGuard, NameLocks};
use tracing::debug;

use crate::infra::lock_manager::LockManager;

/// Blocking acquisition runs on the blocking pool.
#[async_trait]
impl NameLocks for LockManager {
    async fn acquire(&self, name: &str) -> Result<NameGuard, LifecycleError> {
        let inner = self.clone();
        let key = name.to_string();

        let lock = tokio::task::spawn_blocking(move || {
            LockManager::acquire(&inner, &key).map_err(|e| LifecycleError::Lock(e.to_string()))
        })
        .await
        .map_err(|e| LifecycleError::Lock(e.to_string()))??;

        debug!("Acquired lock for {} after {:?}", lock.name(), lock.wait_time());
        Ok(NameGuard::new(lock))
    }
}
