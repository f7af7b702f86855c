use parking_lot::Mutex;
use std::collections::BTreeMap;
use toolsmith_core::{is_valid_tool_name, RegistryStore, StoreError, ToolRecord};

/// Non-durable store for embedding and tests.
#[derive(Default)]
pub struct InMemoryRegistryStore {
    records: Mutex<BTreeMap<String, ToolRecord>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn save(&self, record: &ToolRecord) -> Result<(), StoreError> {
        if !is_valid_tool_name(&record.name) {
            return Err(StoreError::InvalidName(record.name.clone()));
        }
        self.records
            .lock()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }
}
