//! Decoded metric values

use crate::pid::{ids, PidId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value carried by a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Number(f64),
    BoolMap(BTreeMap<String, bool>),
}

/// One decoded sensor reading. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub pid_id: PidId,
    pub value: MetricValue,
    /// Monotonic milliseconds since the session clock started
    pub timestamp_ms: u64,
    /// Reply bytes the value was decoded from
    pub raw_response: Vec<u8>,
}

impl Metric {
    pub fn number(pid_id: PidId, value: f64, timestamp_ms: u64) -> Self {
        Self {
            pid_id,
            value: MetricValue::Number(value),
            timestamp_ms,
            raw_response: Vec::new(),
        }
    }

    pub fn bool_map(pid_id: PidId, flags: BTreeMap<String, bool>, timestamp_ms: u64) -> Self {
        Self {
            pid_id,
            value: MetricValue::BoolMap(flags),
            timestamp_ms,
            raw_response: Vec::new(),
        }
    }

    pub fn with_raw(mut self, raw_response: Vec<u8>) -> Self {
        self.raw_response = raw_response;
        self
    }

    pub fn is_vehicle_speed(&self) -> bool {
        self.pid_id == ids::VEHICLE_SPEED
    }

    pub fn is_engine_rpm(&self) -> bool {
        self.pid_id == ids::ENGINE_RPM
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            MetricValue::Number(v) => Some(v),
            MetricValue::BoolMap(_) => None,
        }
    }

    /// Numeric value truncated toward zero
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|v| v.trunc() as i64)
    }

    pub fn as_bool_map(&self) -> Option<&BTreeMap<String, bool>> {
        match &self.value {
            MetricValue::BoolMap(flags) => Some(flags),
            MetricValue::Number(_) => None,
        }
    }
}
