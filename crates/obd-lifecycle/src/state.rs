//! Connection states and lifecycle events

use adapter_connection::ConnectionError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Stopping,
    Stopped,
    Error,
}

impl ConnectionState {
    /// A worker owns the connection in these states
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status surfaced to the UI. Every escalated failure maps to exactly one
/// event; transient retries produce none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Connecting,
    Connected,
    Stopped,
    Error { reason: String },
    NoNetwork,
    AdapterNotSet,
    AdapterUnavailable { reason: String },
}

impl LifecycleEvent {
    /// Event reported when the worker gives up on `err`
    pub fn for_failure(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::AdapterNotSet(_) => LifecycleEvent::AdapterNotSet,
            ConnectionError::NoNetwork(_) => LifecycleEvent::NoNetwork,
            ConnectionError::BluetoothDisabled
            | ConnectionError::DriverUnavailable(_)
            | ConnectionError::PermissionDenied(_) => LifecycleEvent::AdapterUnavailable {
                reason: err.to_string(),
            },
            other => LifecycleEvent::Error {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        assert_eq!(
            LifecycleEvent::for_failure(&ConnectionError::AdapterNotSet("usb")),
            LifecycleEvent::AdapterNotSet
        );
        assert_eq!(
            LifecycleEvent::for_failure(&ConnectionError::NoNetwork("down".into())),
            LifecycleEvent::NoNetwork
        );
        assert!(matches!(
            LifecycleEvent::for_failure(&ConnectionError::BluetoothDisabled),
            LifecycleEvent::AdapterUnavailable { .. }
        ));
        assert_eq!(
            LifecycleEvent::for_failure(&ConnectionError::Timeout(5000)),
            LifecycleEvent::Error {
                reason: "Timeout after 5000ms".to_string()
            }
        );
    }
}
