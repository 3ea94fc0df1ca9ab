//! OBD-II Connection Lifecycle
//!
//! Owns one adapter connection at a time, drives the
//! connect / retry / poll / stop transitions on a dedicated worker task,
//! and is the single producer into the metrics pipeline.

mod config;
mod error;
mod lifecycle;
mod state;
mod worker;

pub use config::{LifecycleConfig, RetryPolicies, RetryPolicy};
pub use error::LifecycleError;
pub use lifecycle::ConnectionLifecycle;
pub use state::{ConnectionState, LifecycleEvent};
