use anyhow::{Context, Result};
use std::sync::Arc;
use toolsmith_executor::SandboxExecutor;
use toolsmith_infra::{AuditLogger, FileRegistryStore, LockManager};
use toolsmith_policy::ValidatorPolicy;
use toolsmith_tools::{LifecycleManager, ToolRegistry};
use tracing::info;

use crate::config::Config;

/// Everything a command needs, wired from one [`Config`].
pub struct Services {
    pub policy: Arc<ValidatorPolicy>,
    pub manager: Arc<LifecycleManager>,
    pub audit: Arc<AuditLogger>,
}

/// The configured policy file, or the built-in policy.
pub async fn load_policy(config: &Config) -> Result<ValidatorPolicy> {
    match &config.policy_file {
        Some(path) => ValidatorPolicy::load(path)
            .await
            .with_context(|| format!("Failed to load policy {}", path.display())),
        None => Ok(ValidatorPolicy::default()),
    }
}

pub async fn build(config: &Config) -> Result<Services> {
    let policy = Arc::new(load_policy(config).await?);

    let store = FileRegistryStore::new(&config.registry_dir)
        .with_context(|| format!("Failed to open registry {}", config.registry_dir.display()))?;
    let registry = Arc::new(ToolRegistry::open(Arc::new(store)).context("Failed to load registry")?);

    let executor = Arc::new(
        SandboxExecutor::new(policy.clone(), config.executor_config()?)
            .context("Failed to build sandbox executor")?,
    );
    let audit = Arc::new(
        AuditLogger::new(&config.audit_log)
            .with_context(|| format!("Failed to open audit log {}", config.audit_log.display()))?,
    );
    let locks = Arc::new(LockManager::new(config.lock_timeout()));

    info!(
        "Toolsmith ready: policy v{}, {} isolation, registry {}",
        policy.version,
        executor.backend_name(),
        config.registry_dir.display()
    );

    let manager = Arc::new(LifecycleManager::new(registry, executor, locks, audit.clone()));
    Ok(Services {
        policy,
        manager,
        audit,
    })
}
