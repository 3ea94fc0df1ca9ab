//! Drag racing metrics processor

use crate::registry::DragRacingRegistry;
use crate::split::{Split, SplitWindow};
use metrics_pipeline::MetricsProcessor;
use obd_protocol::{Metric, VehicleCapabilities};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragRacingConfig {
    /// RPM at or above which the shift lights turn on
    pub shift_light_rpm: i64,
}

impl Default for DragRacingConfig {
    fn default() -> Self {
        Self {
            shift_light_rpm: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DragRacingEvent {
    ReadyToRace(bool),
    ShiftLights(bool),
    Split { split: Split, time_ms: u64 },
    NewBest { split: Split, time_ms: u64 },
}

/// Consumes vehicle speed and engine RPM metrics only
pub struct DragRacingMetricsProcessor {
    config: DragRacingConfig,
    registry: DragRacingRegistry,
    windows: Vec<SplitWindow>,
    ready_to_race: Option<bool>,
    shift_lights: Option<bool>,
    events: broadcast::Sender<DragRacingEvent>,
}

impl DragRacingMetricsProcessor {
    pub fn new(config: DragRacingConfig, registry: DragRacingRegistry) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            registry,
            windows: Split::ALL.into_iter().map(SplitWindow::new).collect(),
            ready_to_race: None,
            shift_lights: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DragRacingEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<DragRacingEvent> {
        self.events.clone()
    }

    pub fn registry(&self) -> &DragRacingRegistry {
        &self.registry
    }

    pub fn is_ready_to_race(&self) -> bool {
        self.ready_to_race.unwrap_or(false)
    }

    pub fn shift_lights_enabled(&self) -> bool {
        self.shift_lights.unwrap_or(false)
    }

    fn publish(&self, event: DragRacingEvent) {
        let _ = self.events.send(event);
    }

    fn on_speed(&mut self, speed: i64, timestamp_ms: u64) {
        let ready = speed == 0;
        if self.ready_to_race != Some(ready) {
            self.ready_to_race = Some(ready);
            self.registry.set_ready_to_race(ready);
            self.publish(DragRacingEvent::ReadyToRace(ready));
        }

        let finished: Vec<(Split, u64)> = self
            .windows
            .iter_mut()
            .filter_map(|window| {
                window
                    .observe(speed, timestamp_ms)
                    .map(|time_ms| (window.split(), time_ms))
            })
            .collect();

        for (split, time_ms) in finished {
            info!("Drag racing split {}: {} ms", split, time_ms);
            self.publish(DragRacingEvent::Split { split, time_ms });
            match self.registry.record(split, time_ms) {
                Ok(true) => {
                    info!("New best for {}: {} ms", split, time_ms);
                    self.publish(DragRacingEvent::NewBest { split, time_ms });
                }
                Ok(false) => {}
                Err(e) => error!("Failed to persist {} result: {}", split, e),
            }
        }
    }

    fn on_rpm(&mut self, rpm: i64) {
        let enabled = rpm >= self.config.shift_light_rpm;
        if self.shift_lights != Some(enabled) {
            debug!("Shift lights {} at {} rpm", if enabled { "on" } else { "off" }, rpm);
            self.shift_lights = Some(enabled);
            self.registry.set_shift_lights(enabled);
            self.publish(DragRacingEvent::ShiftLights(enabled));
        }
    }
}

impl MetricsProcessor for DragRacingMetricsProcessor {
    fn name(&self) -> &'static str {
        "drag-racing"
    }

    fn on_running(&mut self, _capabilities: &VehicleCapabilities) {
        self.windows.iter_mut().for_each(SplitWindow::reset);
        self.ready_to_race = None;
        self.shift_lights = None;
    }

    fn post_value(&mut self, metric: &Metric) {
        if metric.is_vehicle_speed() {
            if let Some(speed) = metric.as_i64() {
                self.on_speed(speed, metric.timestamp_ms);
            }
        } else if metric.is_engine_rpm() {
            if let Some(rpm) = metric.as_i64() {
                self.on_rpm(rpm);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SplitRecord;
    use obd_protocol::ids;
    use proptest::prelude::*;
    use std::sync::Arc;
    use storage::{KeyValueStore, MemoryStore};

    fn processor() -> (DragRacingMetricsProcessor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = DragRacingRegistry::load(store.clone()).unwrap();
        (
            DragRacingMetricsProcessor::new(DragRacingConfig::default(), registry),
            store,
        )
    }

    fn speed(value: f64, ts: u64) -> Metric {
        Metric::number(ids::VEHICLE_SPEED, value, ts)
    }

    fn rpm(value: f64) -> Metric {
        Metric::number(ids::ENGINE_RPM, value, 0)
    }

    fn drain(rx: &mut broadcast::Receiver<DragRacingEvent>) -> Vec<DragRacingEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_end_to_end_standing_splits() {
        let (mut processor, store) = processor();
        for (value, ts) in [(0.0, 1000), (1.0, 2000), (60.0, 5000), (100.0, 8000)] {
            processor.post_value(&speed(value, ts));
        }

        let result = processor.registry().snapshot();
        assert_eq!(result.record(Split::ZeroToSixty), SplitRecord { best: Some(4000), last: Some(4000) });
        assert_eq!(result.record(Split::ZeroToHundred), SplitRecord { best: Some(7000), last: Some(7000) });
        assert_eq!(store.get_u64("drag_racing.0_100.best").unwrap(), Some(7000));
        assert!(!processor.is_ready_to_race());
    }

    #[test]
    fn test_speed_truncated_before_comparison() {
        let (mut processor, _) = processor();
        processor.post_value(&speed(0.0, 0));
        processor.post_value(&speed(59.99, 1000));
        assert_eq!(processor.registry().snapshot().record(Split::ZeroToSixty).last, None);
        processor.post_value(&speed(60.2, 1500));
        assert_eq!(processor.registry().snapshot().record(Split::ZeroToSixty).last, Some(1500));
    }

    #[test]
    fn test_events() {
        let (mut processor, _) = processor();
        let mut rx = processor.subscribe();

        processor.post_value(&speed(0.0, 0));
        processor.post_value(&speed(0.0, 100));
        processor.post_value(&rpm(2000.0));
        processor.post_value(&speed(30.0, 1000));
        processor.post_value(&rpm(6000.0));
        processor.post_value(&rpm(6500.0));
        processor.post_value(&speed(61.0, 3100));

        assert_eq!(
            drain(&mut rx),
            vec![
                DragRacingEvent::ReadyToRace(true),
                DragRacingEvent::ShiftLights(false),
                DragRacingEvent::ReadyToRace(false),
                DragRacingEvent::ShiftLights(true),
                DragRacingEvent::Split { split: Split::ZeroToSixty, time_ms: 3000 },
                DragRacingEvent::NewBest { split: Split::ZeroToSixty, time_ms: 3000 },
            ]
        );
        let result = processor.registry().snapshot();
        assert!(result.shift_lights);
        assert!(!result.ready_to_race);
    }

    #[test]
    fn test_ignores_other_pids() {
        let (mut processor, store) = processor();
        processor.post_value(&Metric::number(ids::COOLANT_TEMP, 0.0, 0));
        processor.post_value(&Metric::number(ids::COOLANT_TEMP, 90.0, 5000));
        assert!(!processor.is_ready_to_race());
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn ready_to_race_tracks_last_speed(speeds in proptest::collection::vec(0u32..30, 1..40)) {
            let (mut processor, _) = processor();
            for (i, s) in speeds.iter().enumerate() {
                processor.post_value(&speed(*s as f64, i as u64 * 100));
                prop_assert_eq!(processor.is_ready_to_race(), *s == 0);
            }
        }

        #[test]
        fn shift_lights_follow_threshold(values in proptest::collection::vec(0u32..9000, 1..40)) {
            let (mut processor, _) = processor();
            let mut rx = processor.subscribe();
            for value in &values {
                processor.post_value(&rpm(*value as f64));
                prop_assert_eq!(processor.shift_lights_enabled(), *value >= 5000);
            }
            // Deduplicated: consecutive events always alternate
            let events = drain(&mut rx);
            for pair in events.windows(2) {
                prop_assert_ne!(pair[0], pair[1]);
            }
        }

        #[test]
        fn flying_split_ignores_starts_before_dip(
            dip in 61u32..99,
            start in 0u64..1000,
            gap in 1u64..5000,
            run in 1u64..10_000,
        ) {
            let (mut processor, _) = processor();
            let restart = start + 1000 + gap;
            for (value, ts) in [
                (90, 0),
                (100, start + 1000),
                (dip, start + 1000 + gap / 2),
                (100, restart),
                (200, restart + run),
            ] {
                processor.post_value(&speed(value as f64, ts));
            }
            let record = processor.registry().snapshot().record(Split::HundredToTwoHundred);
            prop_assert_eq!(record.last, Some(run));
        }
    }
}
