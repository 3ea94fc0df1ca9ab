//! Per-surface PID selections

use obd_protocol::PidId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use storage::{KeyValueStore, StorageError};
use tracing::warn;

/// Store key prefix of a surface's persisted selection
pub const SELECTION_KEY_PREFIX: &str = "query.surface.";

/// PIDs selected on each UI surface, keyed by surface name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidSelections {
    surfaces: BTreeMap<String, BTreeSet<PidId>>,
}

impl PidSelections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface(mut self, name: &str, ids: impl IntoIterator<Item = PidId>) -> Self {
        self.set_surface(name, ids);
        self
    }

    pub fn set_surface(&mut self, name: &str, ids: impl IntoIterator<Item = PidId>) {
        self.surfaces.insert(name.to_string(), ids.into_iter().collect());
    }

    pub fn surface(&self, name: &str) -> Option<&BTreeSet<PidId>> {
        self.surfaces.get(name)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (&str, &BTreeSet<PidId>)> {
        self.surfaces.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every PID selected on any surface
    pub fn union(&self) -> BTreeSet<PidId> {
        self.surfaces.values().flatten().copied().collect()
    }

    /// Read the selections of `names` from the store. Surfaces without a
    /// stored selection are absent from the result.
    pub fn load(store: &dyn KeyValueStore, names: &[&str]) -> Result<Self, StorageError> {
        let mut selections = Self::new();
        for name in names {
            let key = format!("{}{}", SELECTION_KEY_PREFIX, name);
            match store.get(&key)? {
                Some(Value::Array(items)) => {
                    let ids = items.iter().filter_map(|item| {
                        let id = item.as_u64().and_then(|v| PidId::try_from(v).ok());
                        if id.is_none() {
                            warn!("Ignoring invalid PID {} in {}", item, key);
                        }
                        id
                    });
                    selections.set_surface(name, ids);
                }
                Some(other) => warn!("Ignoring malformed selection {}: {}", key, other),
                None => {}
            }
        }
        Ok(selections)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        for (name, ids) in &self.surfaces {
            let value = Value::Array(ids.iter().map(|id| Value::from(*id)).collect());
            store.set(&format!("{}{}", SELECTION_KEY_PREFIX, name), value)?;
        }
        Ok(())
    }
}
