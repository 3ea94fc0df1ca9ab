//! Adapter connection errors

use std::io;
use thiserror::Error;

/// Errors raised by an [`AdapterConnection`](crate::AdapterConnection)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// No adapter configured for the selected connection type
    #[error("No adapter configured for {0} connection")]
    AdapterNotSet(&'static str),

    /// Named device cannot be found or is not paired
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device exists but is in use by someone else
    #[error("Device busy: {0}")]
    Busy(String),

    /// Bluetooth radio is off or absent
    #[error("Bluetooth adapter is disabled")]
    BluetoothDisabled,

    /// Serial driver for the USB adapter is missing
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    /// OS refused access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Network is down or unreachable
    #[error("Network unreachable: {0}")]
    NoNetwork(String),

    /// Timed out opening the channel
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Stream handles requested while the channel is closed
    #[error("Connection is closed")]
    Closed,

    /// Generic I/O failure on the channel
    #[error("I/O error: {0}")]
    Io(String),

    /// Transport must be rebuilt from scratch instead of reconnected
    #[error("Adapter requires a hard reset")]
    HardResetRequired,
}

impl ConnectionError {
    /// Transport errors are retried, availability errors are surfaced
    /// straight to the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConnectionError::DeviceNotFound(_)
                | ConnectionError::Busy(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::Closed
                | ConnectionError::Io(_)
                | ConnectionError::HardResetRequired
        )
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.raw_os_error() {
            Some(libc::ENETUNREACH) | Some(libc::ENETDOWN) | Some(libc::EHOSTUNREACH) => {
                return ConnectionError::NoNetwork(message)
            }
            Some(libc::EBUSY) => return ConnectionError::Busy(message),
            Some(libc::ENODEV) | Some(libc::ENXIO) => {
                return ConnectionError::DriverUnavailable(message)
            }
            _ => {}
        }
        match err.kind() {
            io::ErrorKind::NotFound => ConnectionError::DeviceNotFound(message),
            io::ErrorKind::PermissionDenied => ConnectionError::PermissionDenied(message),
            io::ErrorKind::TimedOut => ConnectionError::Timeout(0),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => ConnectionError::Closed,
            _ => ConnectionError::Io(message),
        }
    }
}

impl From<tokio_serial::Error> for ConnectionError {
    fn from(err: tokio_serial::Error) -> Self {
        let busy = err.description.to_lowercase().contains("busy");
        match err.kind {
            _ if busy => ConnectionError::Busy(err.description),
            tokio_serial::ErrorKind::NoDevice => ConnectionError::DeviceNotFound(err.description),
            tokio_serial::ErrorKind::Io(kind) => io::Error::new(kind, err.description).into(),
            _ => ConnectionError::Io(err.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let unreachable = io::Error::from_raw_os_error(libc::ENETUNREACH);
        assert!(matches!(ConnectionError::from(unreachable), ConnectionError::NoNetwork(_)));

        let busy = io::Error::from_raw_os_error(libc::EBUSY);
        assert!(matches!(ConnectionError::from(busy), ConnectionError::Busy(_)));

        let missing = io::Error::new(io::ErrorKind::NotFound, "no such file");
        assert!(matches!(ConnectionError::from(missing), ConnectionError::DeviceNotFound(_)));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(ConnectionError::from(reset), ConnectionError::Closed);
    }

    #[test]
    fn test_recoverability() {
        assert!(ConnectionError::Io("x".into()).is_recoverable());
        assert!(ConnectionError::HardResetRequired.is_recoverable());
        assert!(!ConnectionError::BluetoothDisabled.is_recoverable());
        assert!(!ConnectionError::AdapterNotSet("usb").is_recoverable());
        assert!(!ConnectionError::NoNetwork("down".into()).is_recoverable());
        assert!(!ConnectionError::PermissionDenied("tty".into()).is_recoverable());
    }

    #[test]
    fn test_serial_error_conversion() {
        let err = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(ConnectionError::from(err), ConnectionError::DeviceNotFound(_)));

        let err = tokio_serial::Error::new(tokio_serial::ErrorKind::Unknown, "Device or resource busy");
        assert!(matches!(ConnectionError::from(err), ConnectionError::Busy(_)));
    }
}
