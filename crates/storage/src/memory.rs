//! In-memory store

use crate::{KeyValueStore, StorageError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Volatile store, used when no storage path is configured and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let values = self
            .values
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let store = MemoryStore::new();
        store.set_u64("drag_racing.0_60.best", 4200).unwrap();
        store.set("flag", Value::Bool(true)).unwrap();

        assert_eq!(store.get_u64("drag_racing.0_60.best").unwrap(), Some(4200));
        assert_eq!(store.get_bool("flag").unwrap(), Some(true));
        assert_eq!(store.get_u64("flag").unwrap(), None);
        assert_eq!(store.get_string("missing").unwrap(), None);

        store.remove("flag").unwrap();
        assert_eq!(store.len(), 1);
    }
}
