//! Coarse vehicle state changes derived from the BOOL-MAP status PID

use crate::processor::MetricsProcessor;
use obd_protocol::{Metric, VehicleCapabilities};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Flag labels of the vehicle status bit map
pub mod flags {
    pub const IGNITION: &str = "ignition";
    pub const MOVING: &str = "moving";
    pub const ACCELERATING: &str = "accelerating";
    pub const DECELERATING: &str = "decelerating";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatusEvent {
    Moving,
    Idling,
    IgnitionOff,
    Accelerating,
    Decelerating,
}

/// Emits a [`VehicleStatusEvent`] whenever a watched flag changes between
/// consecutive status maps. A flag missing from the previous map counts as
/// `false`.
pub struct VehicleStatusProcessor {
    last: Option<BTreeMap<String, bool>>,
    events: broadcast::Sender<VehicleStatusEvent>,
}

impl Default for VehicleStatusProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleStatusProcessor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { last: None, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VehicleStatusEvent> {
        self.events.subscribe()
    }

    /// Sender handle, so listeners can subscribe after the processor moved
    /// into the pipeline
    pub fn events(&self) -> broadcast::Sender<VehicleStatusEvent> {
        self.events.clone()
    }

    fn changes(
        previous: &BTreeMap<String, bool>,
        current: &BTreeMap<String, bool>,
    ) -> Vec<VehicleStatusEvent> {
        let flag = |map: &BTreeMap<String, bool>, name: &str| map.get(name).copied().unwrap_or(false);
        let changed = |name: &str| {
            current.contains_key(name) && flag(previous, name) != flag(current, name)
        };

        let mut events = Vec::new();
        if changed(flags::MOVING) {
            events.push(if flag(current, flags::MOVING) {
                VehicleStatusEvent::Moving
            } else {
                VehicleStatusEvent::Idling
            });
        }
        if changed(flags::IGNITION) && !flag(current, flags::IGNITION) {
            events.push(VehicleStatusEvent::IgnitionOff);
        }
        if changed(flags::ACCELERATING) && flag(current, flags::ACCELERATING) {
            events.push(VehicleStatusEvent::Accelerating);
        }
        if changed(flags::DECELERATING) && flag(current, flags::DECELERATING) {
            events.push(VehicleStatusEvent::Decelerating);
        }
        events
    }
}

impl MetricsProcessor for VehicleStatusProcessor {
    fn name(&self) -> &'static str {
        "vehicle-status"
    }

    fn on_running(&mut self, _capabilities: &VehicleCapabilities) {
        self.last = None;
    }

    fn post_value(&mut self, metric: &Metric) {
        let Some(current) = metric.as_bool_map() else {
            return;
        };
        let previous = self.last.take().unwrap_or_default();
        for event in Self::changes(&previous, current) {
            debug!("Vehicle status changed: {:?}", event);
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        self.last = Some(current.clone());
    }

    fn on_stopped(&mut self) {
        self.last = None;
    }
}
