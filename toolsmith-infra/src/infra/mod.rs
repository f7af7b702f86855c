pub mod audit_adapter;
pub mod audit_logger;
pub mod lock_adapter;
pub mod lock_manager;
pub mod memory_store;
pub mod registry_store;
