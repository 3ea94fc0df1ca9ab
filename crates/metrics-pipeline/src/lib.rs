//! Metrics Processor Pipeline
//!
//! Every decoded metric fans out, synchronously and in registration
//! order, to each registered [`MetricsProcessor`] and then to the metric
//! observers. Processors filter for the PIDs they care about themselves,
//! so new detectors plug in without touching the orchestrator.

mod aggregator;
mod generator;
mod pipeline;
mod processor;
mod vehicle_status;

pub use aggregator::{HistogramEntry, MetricsAggregator, Trip, TripSummary};
pub use generator::{DebugGeneratorConfig, DebugMetricsGenerator};
pub use pipeline::MetricsPipeline;
pub use processor::{MetricSink, MetricsProcessor};
pub use vehicle_status::{flags, VehicleStatusEvent, VehicleStatusProcessor};
