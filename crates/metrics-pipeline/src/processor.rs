//! Processor contract

use crate::pipeline::Shared;
use obd_protocol::{Metric, VehicleCapabilities};
use std::sync::Weak;

/// Observer of the metric stream.
///
/// All callbacks run on the poll-loop task and must not block: a slow
/// processor stalls every processor after it and delays the next poll.
pub trait MetricsProcessor: Send {
    fn name(&self) -> &'static str;

    /// Called once at registration with a handle for pushing synthetic metrics
    fn init(&mut self, _sink: MetricSink) {}

    /// Connection established
    fn on_running(&mut self, _capabilities: &VehicleCapabilities) {}

    fn post_value(&mut self, metric: &Metric);

    /// Connection closed or failed
    fn on_stopped(&mut self) {}
}

/// Entry point for metrics produced outside the poll loop.
///
/// Must only be used from a processor's own worker, never from inside a
/// pipeline callback.
#[derive(Clone)]
pub struct MetricSink {
    pub(crate) shared: Weak<Shared>,
}

impl MetricSink {
    /// Deliver `metric` to the pipeline. Returns `false` once the pipeline is gone.
    pub fn emit(&self, metric: Metric) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.dispatch(&metric);
                true
            }
            None => false,
        }
    }

    /// Current time on the pipeline's session clock, `None` once the
    /// pipeline is gone
    pub fn session_ms(&self) -> Option<u64> {
        self.shared.upgrade().map(|shared| shared.session_ms())
    }
}
