//! Lifecycle errors

use obd_protocol::PidId;
use thiserror::Error;

/// Errors returned to callers of the lifecycle API.
///
/// Connection failures are reported through [`LifecycleEvent`]s instead;
/// these cover misuse the caller can act on.
///
/// [`LifecycleEvent`]: crate::LifecycleEvent
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("PID {0} is not in the registry")]
    UnknownPid(PidId),

    #[error("Worker task failed: {0}")]
    Worker(String),
}
