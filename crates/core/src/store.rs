use crate::error::StoreError;
use crate::types::ToolRecord;

/// Durable home of the tool registry.
///
/// Implementations must make `save` crash-safe: after a crash, `load_all`
/// returns either the previous or the new record for a name, never a
/// partially written one.
pub trait RegistryStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError>;
    fn save(&self, record: &ToolRecord) -> Result<(), StoreError>;
}
