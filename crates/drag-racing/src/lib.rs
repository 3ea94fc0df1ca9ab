//! Drag Racing
//!
//! Times standing-start (0-60, 0-100) and flying-start (60-140, 100-200)
//! speed intervals from the vehicle speed stream, drives the shift lights
//! from engine RPM, and keeps best/last times per split.

mod processor;
mod registry;
mod split;

pub use processor::{DragRacingConfig, DragRacingEvent, DragRacingMetricsProcessor};
pub use registry::{DragRacingRegistry, DragRacingResult, SplitRecord};
pub use split::{Split, SplitWindow};
