//! Storage Layer
//!
//! Plain key/value persistence: string keys, primitive JSON values.
//! Writes are synchronous so callers know the value is durable when the
//! call returns.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use serde_json::Value;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Key/value store shared between configuration readers and writers
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.get(key)?.and_then(|v| v.as_u64()))
    }

    fn set_u64(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.set(key, Value::from(value))
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, StorageError> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()))
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key)?.and_then(|v| v.as_str().map(str::to_string)))
    }
}
