use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use toolsmith_core::{RegistryStore, StoreError, ToolDefinition, ToolRecord};
use tracing::{debug, info};

/// One row of [`ToolRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolListing {
    pub name: String,
    pub registered_version: Option<u32>,
    pub latest_version: u32,
}

/// Read view of every tool record, backed by a durable store.
///
/// Records are swapped whole, so a reader sees either the previous or the
/// next state of a name and never a mix.
pub struct ToolRegistry {
    store: Arc<dyn RegistryStore>,
    records: RwLock<HashMap<String, Arc<ToolRecord>>>,
}

impl ToolRegistry {
    pub fn open(store: Arc<dyn RegistryStore>) -> Result<Self, StoreError> {
        let mut records = HashMap::new();
        for mut record in store.load_all()? {
            record.normalize();
            records.insert(record.name.clone(), Arc::new(record));
        }
        info!("Tool registry loaded: {} tool(s)", records.len());
        Ok(Self {
            store,
            records: RwLock::new(records),
        })
    }

    pub fn record(&self, name: &str) -> Option<Arc<ToolRecord>> {
        self.records.read().get(name).cloned()
    }

    /// The version currently callable under `name`.
    pub fn registered(&self, name: &str) -> Option<ToolDefinition> {
        self.record(name).and_then(|r| r.registered().cloned())
    }

    pub fn get(&self, name: &str, version: u32) -> Option<ToolDefinition> {
        self.record(name).and_then(|r| r.get(version).cloned())
    }

    /// Every version of `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<ToolDefinition> {
        self.record(name)
            .map(|r| r.versions.clone())
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<ToolListing> {
        let mut listing: Vec<ToolListing> = self
            .records
            .read()
            .values()
            .map(|r| ToolListing {
                name: r.name.clone(),
                registered_version: r.registered_version,
                latest_version: r.latest_version(),
            })
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }

    /// Function-calling schemas of every registered tool, by name.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let records = self.records.read();
        let mut registered: Vec<&ToolDefinition> =
            records.values().filter_map(|r| r.registered()).collect();
        registered.sort_by(|a, b| a.name.cmp(&b.name));
        registered.into_iter().map(|d| d.function_schema()).collect()
    }

    /// Persist `record`, then publish it. Callers hold the name's lock.
    pub(crate) async fn commit(&self, record: ToolRecord) -> Result<(), StoreError> {
        let store = self.store.clone();
        let record = Arc::new(record);
        let to_save = record.clone();
        tokio::task::spawn_blocking(move || store.save(&to_save))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))??;

        debug!(
            "Committed {} ({} version(s), registered: {:?})",
            record.name,
            record.versions.len(),
            record.registered_version
        );
        self.records.write().insert(record.name.clone(), record);
        Ok(())
    }
}
