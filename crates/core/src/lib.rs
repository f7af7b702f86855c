pub mod audit;
pub mod error;
pub mod store;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditSink, NullAuditSink};
pub use error::{CoreError, StoreError};
pub use store::RegistryStore;
pub use types::*;
