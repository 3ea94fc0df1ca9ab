//! Synthetic metrics for running without an adapter

use crate::processor::{MetricSink, MetricsProcessor};
use obd_protocol::{ids, Metric, PidId, VehicleCapabilities};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Debug generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugGeneratorConfig {
    pub interval_ms: u64,
    pub pids: Vec<PidId>,
}

impl Default for DebugGeneratorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            pids: vec![ids::VEHICLE_SPEED, ids::ENGINE_RPM, ids::COOLANT_TEMP],
        }
    }
}

/// Pushes a simulated drive cycle into the pipeline on a timer while the
/// connection is running. Speed sweeps 0 to 200 km/h and back so every
/// drag-racing split gets exercised.
///
/// Metrics are stamped on the pipeline's session clock. The poll loop must
/// not also poll the PIDs listed in [`DebugGeneratorConfig::pids`], or
/// consumers see two interleaved sources for one sensor.
pub struct DebugMetricsGenerator {
    config: DebugGeneratorConfig,
    sink: Option<MetricSink>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl DebugMetricsGenerator {
    pub fn new(config: DebugGeneratorConfig) -> Self {
        Self {
            config,
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    fn stop_task(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Value of `pid_id` at step `seq` of the cycle
fn simulate(pid_id: PidId, seq: u64) -> f64 {
    let phase = (seq * 4) % 400;
    let speed = (if phase > 200 { 400 - phase } else { phase }) as f64;
    match pid_id {
        ids::VEHICLE_SPEED => speed,
        ids::ENGINE_RPM => (800.0 + speed * 30.0).min(6500.0),
        ids::COOLANT_TEMP => (20.0 + seq as f64 * 0.5).min(90.0),
        ids::ENGINE_LOAD | ids::THROTTLE_POSITION => speed / 2.0,
        ids::MAF => 2.0 + speed * 0.8,
        _ => 0.0,
    }
}

impl MetricsProcessor for DebugMetricsGenerator {
    fn name(&self) -> &'static str {
        "debug-generator"
    }

    fn init(&mut self, sink: MetricSink) {
        self.sink = Some(sink);
    }

    fn on_running(&mut self, _capabilities: &VehicleCapabilities) {
        self.stop_task();
        let Some(sink) = self.sink.clone() else {
            warn!("Debug generator has no pipeline, not starting");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Debug generator needs a tokio runtime, not starting");
            return;
        };

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let pids = self.config.pids.clone();
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        info!("Starting debug generator every {:?} for {:?}", period, pids);

        self.task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut seq = 0u64;
            loop {
                ticker.tick().await;
                let Some(timestamp_ms) = sink.session_ms() else {
                    debug!("Pipeline dropped, debug generator exiting");
                    return;
                };
                for pid_id in &pids {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    if !sink.emit(Metric::number(*pid_id, simulate(*pid_id, seq), timestamp_ms)) {
                        debug!("Pipeline dropped, debug generator exiting");
                        return;
                    }
                }
                seq += 1;
            }
        }));
    }

    fn post_value(&mut self, _metric: &Metric) {}

    fn on_stopped(&mut self) {
        if self.task.is_some() {
            info!("Stopping debug generator");
        }
        self.stop_task();
    }
}

impl Drop for DebugMetricsGenerator {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricsPipeline;
    use std::sync::Mutex;

    #[test]
    fn test_drive_cycle_shape() {
        assert_eq!(simulate(ids::VEHICLE_SPEED, 0), 0.0);
        assert_eq!(simulate(ids::VEHICLE_SPEED, 50), 200.0);
        assert_eq!(simulate(ids::VEHICLE_SPEED, 75), 100.0);
        assert_eq!(simulate(ids::VEHICLE_SPEED, 100), 0.0);
        assert_eq!(simulate(ids::ENGINE_RPM, 0), 800.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_only_while_running() {
        let pipeline = MetricsPipeline::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        pipeline.observe(move |m| log.lock().unwrap().push((m.pid_id, m.timestamp_ms)));
        pipeline.register(DebugMetricsGenerator::new(DebugGeneratorConfig {
            interval_ms: 100,
            pids: vec![ids::VEHICLE_SPEED],
        }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(seen.lock().unwrap().is_empty());

        pipeline.on_running(&VehicleCapabilities::default());
        tokio::time::sleep(Duration::from_millis(350)).await;
        pipeline.on_stopped();
        let emitted = seen.lock().unwrap().clone();
        assert_eq!(emitted.len(), 4);
        assert_eq!(emitted[0], (ids::VEHICLE_SPEED, 0));
        assert_eq!(emitted[3], (ids::VEHICLE_SPEED, 300));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(seen.lock().unwrap().len(), 4);
    }
}
