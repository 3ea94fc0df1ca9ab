//! Best/last split times and their persistence

use crate::split::Split;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use storage::{KeyValueStore, StorageError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub best: Option<u64>,
    pub last: Option<u64>,
}

/// Drag racing state readable by UI collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DragRacingResult {
    pub splits: BTreeMap<Split, SplitRecord>,
    pub ready_to_race: bool,
    pub shift_lights: bool,
}

impl DragRacingResult {
    pub fn record(&self, split: Split) -> SplitRecord {
        self.splits.get(&split).copied().unwrap_or_default()
    }
}

fn best_key(split: Split) -> String {
    format!("drag_racing.{}.best", split.key())
}

fn last_key(split: Split) -> String {
    format!("drag_racing.{}.last", split.key())
}

/// Shared handle on the drag racing result.
///
/// Only the drag racing processor writes; every other holder reads
/// snapshots that may lag one sample behind.
#[derive(Clone)]
pub struct DragRacingRegistry {
    store: Arc<dyn KeyValueStore>,
    result: Arc<RwLock<DragRacingResult>>,
}

impl DragRacingRegistry {
    /// Load persisted best/last times from `store`
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let mut result = DragRacingResult::default();
        for split in Split::ALL {
            let record = SplitRecord {
                best: store.get_u64(&best_key(split))?,
                last: store.get_u64(&last_key(split))?,
            };
            result.splits.insert(split, record);
        }
        debug!("Loaded drag racing results: {:?}", result.splits);

        Ok(Self {
            store,
            result: Arc::new(RwLock::new(result)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, DragRacingResult> {
        self.result.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DragRacingResult> {
        self.result.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> DragRacingResult {
        self.read().clone()
    }

    /// Store a finished run. Returns `true` when it set a new best.
    ///
    /// Both values are written through before returning.
    pub fn record(&self, split: Split, time_ms: u64) -> Result<bool, StorageError> {
        let mut result = self.write();
        let record = result.splits.entry(split).or_default();
        let new_best = record.best.map_or(true, |best| time_ms < best);

        self.store.set_u64(&last_key(split), time_ms)?;
        record.last = Some(time_ms);
        if new_best {
            self.store.set_u64(&best_key(split), time_ms)?;
            record.best = Some(time_ms);
        }
        Ok(new_best)
    }

    pub(crate) fn set_ready_to_race(&self, ready: bool) {
        self.write().ready_to_race = ready;
    }

    pub(crate) fn set_shift_lights(&self, enabled: bool) {
        self.write().shift_lights = enabled;
    }

    /// Forget every best and last time
    pub fn reset(&self) -> Result<(), StorageError> {
        let mut result = self.write();
        for split in Split::ALL {
            self.store.remove(&best_key(split))?;
            self.store.remove(&last_key(split))?;
            result.splits.insert(split, SplitRecord::default());
        }
        info!("Drag racing results reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use storage::MemoryStore;

    #[test]
    fn test_best_never_gets_worse() {
        let store = Arc::new(MemoryStore::new());
        let registry = DragRacingRegistry::load(store.clone()).unwrap();

        assert!(registry.record(Split::ZeroToSixty, 5000).unwrap());
        assert!(!registry.record(Split::ZeroToSixty, 6000).unwrap());
        assert!(registry.record(Split::ZeroToSixty, 4500).unwrap());

        let record = registry.snapshot().record(Split::ZeroToSixty);
        assert_eq!(record, SplitRecord { best: Some(4500), last: Some(4500) });
        assert_eq!(store.get_u64("drag_racing.0_60.best").unwrap(), Some(4500));
        assert_eq!(store.get_u64("drag_racing.0_60.last").unwrap(), Some(4500));
        assert_eq!(registry.snapshot().record(Split::ZeroToHundred), SplitRecord::default());
    }

    #[test]
    fn test_load_and_reset() {
        let store = Arc::new(MemoryStore::new());
        store.set_u64("drag_racing.60_140.best", 3200).unwrap();
        store.set_u64("drag_racing.60_140.last", 3900).unwrap();

        let registry = DragRacingRegistry::load(store.clone()).unwrap();
        assert_eq!(
            registry.snapshot().record(Split::SixtyToHundredForty),
            SplitRecord { best: Some(3200), last: Some(3900) }
        );

        registry.reset().unwrap();
        assert_eq!(registry.snapshot().record(Split::SixtyToHundredForty), SplitRecord::default());
        assert_eq!(store.get_u64("drag_racing.60_140.best").unwrap(), None);
    }

    proptest! {
        #[test]
        fn best_is_monotonically_non_increasing(times in proptest::collection::vec(1u64..20_000, 1..50)) {
            let registry = DragRacingRegistry::load(Arc::new(MemoryStore::new())).unwrap();
            let mut previous_best = u64::MAX;
            for time in &times {
                registry.record(Split::ZeroToHundred, *time).unwrap();
                let record = registry.snapshot().record(Split::ZeroToHundred);
                let best = record.best.unwrap();
                prop_assert!(best <= previous_best);
                prop_assert_eq!(record.last, Some(*time));
                previous_best = best;
            }
            prop_assert_eq!(previous_best, *times.iter().min().unwrap());
        }
    }
}
