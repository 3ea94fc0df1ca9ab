//! Pipeline fan-out

use crate::processor::{MetricSink, MetricsProcessor};
use obd_protocol::{Metric, VehicleCapabilities};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

type MetricObserver = Box<dyn Fn(&Metric) + Send + Sync>;

pub(crate) struct Shared {
    processors: Mutex<Vec<Box<dyn MetricsProcessor>>>,
    observers: Mutex<Vec<MetricObserver>>,
    /// Start of the session clock, reset on every `on_running`
    epoch: Mutex<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking processor must not take the whole pipeline down
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    pub(crate) fn session_ms(&self) -> u64 {
        lock(&self.epoch).elapsed().as_millis() as u64
    }

    pub(crate) fn dispatch(&self, metric: &Metric) {
        for processor in lock(&self.processors).iter_mut() {
            processor.post_value(metric);
        }
        for observer in lock(&self.observers).iter() {
            observer(metric);
        }
    }
}

/// Ordered list of processors plus the metric observers.
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct MetricsPipeline {
    shared: Arc<Shared>,
}

impl Default for MetricsPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPipeline {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                processors: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
                epoch: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Append a processor; it receives metrics after all earlier ones
    pub fn register<P>(&self, mut processor: P)
    where
        P: MetricsProcessor + 'static,
    {
        info!("Registering metrics processor '{}'", processor.name());
        processor.init(self.sink());
        lock(&self.shared.processors).push(Box::new(processor));
    }

    /// Subscribe to every metric, delivered once each in arrival order
    pub fn observe<F>(&self, callback: F)
    where
        F: Fn(&Metric) + Send + Sync + 'static,
    {
        lock(&self.shared.observers).push(Box::new(callback));
    }

    pub fn sink(&self) -> MetricSink {
        MetricSink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        lock(&self.shared.processors).iter().map(|p| p.name()).collect()
    }

    /// Milliseconds on the session clock. Every metric source stamps its
    /// metrics with this so timestamps stay monotonic across sources.
    pub fn session_ms(&self) -> u64 {
        self.shared.session_ms()
    }

    /// Restart the session clock, then notify processors
    pub fn on_running(&self, capabilities: &VehicleCapabilities) {
        *lock(&self.shared.epoch) = Instant::now();
        debug!("Notifying processors: running");
        for processor in lock(&self.shared.processors).iter_mut() {
            processor.on_running(capabilities);
        }
    }

    pub fn post_value(&self, metric: &Metric) {
        self.shared.dispatch(metric);
    }

    pub fn on_stopped(&self) {
        debug!("Notifying processors: stopped");
        for processor in lock(&self.shared.processors).iter_mut() {
            processor.on_stopped();
        }
    }
}
