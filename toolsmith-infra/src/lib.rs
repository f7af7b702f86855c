pub mod infra;

pub use infra::audit_logger::{AuditLogger, AuditLoggerError};
pub use infra::lock_manager::{LockError, LockManager, NameLock};
pub use infra::memory_store::InMemoryRegistryStore;
pub use infra::registry_store::FileRegistryStore;
