//! Per-PID running statistics for the current trip

use crate::processor::MetricsProcessor;
use chrono::{DateTime, Utc};
use obd_protocol::{Metric, PidId, VehicleCapabilities};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Running min/max/mean of one PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramEntry {
    pub pid_id: PidId,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sample_count: u64,
}

impl HistogramEntry {
    fn first(pid_id: PidId, value: f64) -> Self {
        Self {
            pid_id,
            min: value,
            max: value,
            mean: value,
            sample_count: 1,
        }
    }

    fn update(&mut self, value: f64) {
        self.sample_count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean += (value - self.mean) / self.sample_count as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl Trip {
    fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

/// Statistics embedded into a persisted trip record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub entries: Vec<HistogramEntry>,
}

impl TripSummary {
    /// Short trips are dropped unless explicitly recorded
    pub fn should_record(&self, record_short_trips: bool, min_trip_secs: u64) -> bool {
        record_short_trips || self.duration_secs >= min_trip_secs as i64
    }
}

#[derive(Debug)]
struct State {
    trip: Trip,
    entries: BTreeMap<PidId, HistogramEntry>,
}

/// Histogram of every numeric PID seen during the current trip.
///
/// Clones share state: register one clone with the pipeline and keep
/// another for readers.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    state: Arc<RwLock<State>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                trip: Trip::begin(),
                entries: BTreeMap::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin a new trip, discarding all entries
    pub fn start_trip(&self) -> Trip {
        let mut state = self.write();
        state.trip = Trip::begin();
        state.entries.clear();
        info!("Started trip {}", state.trip.id);
        state.trip.clone()
    }

    pub fn trip(&self) -> Trip {
        self.read().trip.clone()
    }

    pub fn get(&self, pid_id: PidId) -> Option<HistogramEntry> {
        self.read().entries.get(&pid_id).cloned()
    }

    pub fn entries(&self) -> Vec<HistogramEntry> {
        self.read().entries.values().cloned().collect()
    }

    pub fn record(&self, metric: &Metric) {
        let Some(value) = metric.as_f64() else {
            return;
        };
        let mut state = self.write();
        state
            .entries
            .entry(metric.pid_id)
            .and_modify(|entry| entry.update(value))
            .or_insert_with(|| HistogramEntry::first(metric.pid_id, value));
    }

    pub fn trip_summary(&self) -> TripSummary {
        self.summary_at(Utc::now())
    }

    fn summary_at(&self, now: DateTime<Utc>) -> TripSummary {
        let state = self.read();
        TripSummary {
            trip_id: state.trip.id,
            started_at: state.trip.started_at,
            duration_secs: (now - state.trip.started_at).num_seconds().max(0),
            entries: state.entries.values().cloned().collect(),
        }
    }
}

impl MetricsProcessor for MetricsAggregator {
    fn name(&self) -> &'static str {
        "metrics-aggregator"
    }

    fn on_running(&mut self, _capabilities: &VehicleCapabilities) {
        self.start_trip();
    }

    fn post_value(&mut self, metric: &Metric) {
        self.record(metric);
    }

    fn on_stopped(&mut self) {
        let state = self.read();
        debug!(
            "Trip {} paused with {} histogram entries",
            state.trip.id,
            state.entries.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use obd_protocol::ids;
    use proptest::prelude::*;

    #[test]
    fn test_running_statistics() {
        let aggregator = MetricsAggregator::new();
        for (i, v) in [10.0, 30.0, 20.0].into_iter().enumerate() {
            aggregator.record(&Metric::number(ids::VEHICLE_SPEED, v, i as u64));
        }
        aggregator.record(&Metric::bool_map(ids::VEHICLE_STATUS, BTreeMap::new(), 4));

        let entry = aggregator.get(ids::VEHICLE_SPEED).unwrap();
        assert_eq!(entry.min, 10.0);
        assert_eq!(entry.max, 30.0);
        assert!((entry.mean - 20.0).abs() < 1e-9);
        assert_eq!(entry.sample_count, 3);
        assert!(aggregator.get(ids::VEHICLE_STATUS).is_none());
    }

    #[test]
    fn test_on_running_starts_new_trip() {
        let mut aggregator = MetricsAggregator::new();
        let reader = aggregator.clone();
        aggregator.post_value(&Metric::number(ids::ENGINE_RPM, 800.0, 0));
        let first = reader.trip();

        aggregator.on_running(&VehicleCapabilities::default());
        assert_ne!(reader.trip().id, first.id);
        assert!(reader.entries().is_empty());
    }

    #[test]
    fn test_short_trips() {
        let aggregator = MetricsAggregator::new();
        let started = aggregator.trip().started_at;

        let summary = aggregator.summary_at(started + Duration::seconds(30));
        assert_eq!(summary.duration_secs, 30);
        assert!(!summary.should_record(false, 60));
        assert!(summary.should_record(true, 60));

        let summary = aggregator.summary_at(started + Duration::seconds(90));
        assert!(summary.should_record(false, 60));
    }

    proptest! {
        #[test]
        fn incremental_mean_matches_arithmetic_mean(values in proptest::collection::vec(-1000.0f64..1000.0, 1..200)) {
            let aggregator = MetricsAggregator::new();
            for v in &values {
                aggregator.record(&Metric::number(ids::MAF, *v, 0));
            }
            let entry = aggregator.get(ids::MAF).unwrap();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            prop_assert!((entry.mean - mean).abs() < 1e-6);
            prop_assert_eq!(entry.sample_count, values.len() as u64);
            prop_assert!(entry.min <= entry.mean + 1e-9 && entry.mean <= entry.max + 1e-9);
        }
    }
}
