use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable local key/value store. Synchronous; one value per namespace.
pub trait DurableStore: Send + Sync {
    fn write(&self, namespace: &str, value: &str) -> Result<(), StoreError>;
    fn read(&self, namespace: &str) -> Result<Option<String>, StoreError>;
    fn delete(&self, namespace: &str) -> Result<(), StoreError>;
}

/// In-process store, for tests and for running without a data directory
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.values
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl DurableStore for MemoryStore {
    fn write(&self, namespace: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.insert(namespace.to_string(), value.to_string());
        Ok(())
    }

    fn read(&self, namespace: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(namespace).cloned())
    }

    fn delete(&self, namespace: &str) -> Result<(), StoreError> {
        self.lock()?.remove(namespace);
        Ok(())
    }
}
