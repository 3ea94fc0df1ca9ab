//! Adapter Connections
//!
//! Byte channels to ELM327-compatible adapters over Bluetooth RFCOMM,
//! USB-serial and TCP. This layer knows nothing about OBD-II semantics
//! beyond pairing a reply with its request: it opens, frames, reconnects
//! and closes.
//!
//! ```ignore
//! let mut connection = create_connection(&settings)?;
//! connection.connect().await?;
//! let reply = transact(connection.as_mut(), "010D").await?;
//! connection.close().await;
//! ```

mod bluetooth;
mod error;
mod frame;
mod mock;
mod serial;
mod tcp;

pub use bluetooth::BluetoothConnection;
pub use error::ConnectionError;
pub use frame::{drain_input, read_frame, transact, ReadPolicy, TERMINATOR};
pub use mock::{MockBehavior, MockConnection, MockStats};
pub use serial::UsbSerialConnection;
pub use tcp::TcpConnection;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of an open channel
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of an open channel
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Physical transport of the adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    #[default]
    Bluetooth,
    Usb,
    Tcp,
    Mock,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Bluetooth => "bluetooth",
            ConnectionKind::Usb => "usb",
            ConnectionKind::Tcp => "tcp",
            ConnectionKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Both halves of an open channel
pub(crate) struct Streams {
    pub input: InputStream,
    pub output: OutputStream,
}

/// Byte channel to an adapter.
///
/// Stream handles are only valid between a successful [`connect`] and the
/// next [`close`].
///
/// [`connect`]: AdapterConnection::connect
/// [`close`]: AdapterConnection::close
#[async_trait]
pub trait AdapterConnection: Send {
    fn kind(&self) -> ConnectionKind;

    /// Open the channel. Fails without side effects when the device is
    /// missing, unpaired or busy.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    fn input_stream(&mut self) -> Result<&mut InputStream, ConnectionError>;

    fn output_stream(&mut self) -> Result<&mut OutputStream, ConnectionError>;

    /// Release all handles. Safe to call repeatedly.
    async fn close(&mut self);

    /// Last known channel state. A channel can die between polls without
    /// this changing until the next I/O attempt.
    fn is_closed(&self) -> bool;

    /// Whether this adapter only recovers by rebuilding the transport
    fn hard_reset(&self) -> bool;

    fn read_policy(&self) -> ReadPolicy;

    /// Drop held handles and open the channel again. With the hard-reset
    /// policy the caller is told to rebuild the transport instead.
    async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.close().await;
        if self.hard_reset() {
            return Err(ConnectionError::HardResetRequired);
        }
        self.connect().await
    }
}

/// Builds fresh transport objects, used for the initial connection and
/// after a hard reset.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AdapterConnection>, ConnectionError>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> Result<Box<dyn AdapterConnection>, ConnectionError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn AdapterConnection>, ConnectionError> {
        self()
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub kind: ConnectionKind,
    /// Bluetooth device name or RFCOMM path, or USB serial device path
    pub device_name: String,
    pub host: String,
    pub port: u16,
    pub baud_rate: u32,
    /// Rebuild the transport instead of reconnecting the socket
    pub hard_reset: bool,
    pub read_attempts: Option<u32>,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    /// Paired Bluetooth devices: name to bound RFCOMM device
    pub paired_devices: BTreeMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::default(),
            device_name: String::new(),
            host: "192.168.0.10".to_string(),
            port: 35000,
            baud_rate: 38400,
            hard_reset: false,
            read_attempts: None,
            read_timeout_ms: None,
            connect_timeout_ms: 5000,
            paired_devices: BTreeMap::new(),
        }
    }
}

impl ConnectionFactory for ConnectionSettings {
    fn create(&self) -> Result<Box<dyn AdapterConnection>, ConnectionError> {
        create_connection(self)
    }
}

/// Create a transport for the configured connection kind
pub fn create_connection(
    settings: &ConnectionSettings,
) -> Result<Box<dyn AdapterConnection>, ConnectionError> {
    let connection: Box<dyn AdapterConnection> = match settings.kind {
        ConnectionKind::Bluetooth => Box::new(BluetoothConnection::new(settings)?),
        ConnectionKind::Usb => Box::new(UsbSerialConnection::new(settings)?),
        ConnectionKind::Tcp => Box::new(TcpConnection::new(settings)?),
        ConnectionKind::Mock => Box::new(
            MockConnection::new(MockBehavior {
                hard_reset: settings.hard_reset,
                ..Default::default()
            })
            .with_read_policy(
                ReadPolicy::usb().with_overrides(settings.read_attempts, settings.read_timeout_ms),
            ),
        ),
    };
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_requires_device() {
        let settings = ConnectionSettings {
            kind: ConnectionKind::Usb,
            ..Default::default()
        };
        assert!(matches!(
            create_connection(&settings),
            Err(ConnectionError::AdapterNotSet("usb"))
        ));

        let settings = ConnectionSettings {
            kind: ConnectionKind::Tcp,
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            create_connection(&settings),
            Err(ConnectionError::AdapterNotSet("tcp"))
        ));
    }

    #[test]
    fn test_factory_builds_requested_kind() {
        let settings = ConnectionSettings {
            kind: ConnectionKind::Mock,
            ..Default::default()
        };
        let connection = settings.create().unwrap();
        assert_eq!(connection.kind(), ConnectionKind::Mock);
        assert!(connection.is_closed());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: ConnectionSettings =
            serde_json::from_str(r#"{"kind": "tcp", "host": "10.0.0.5"}"#).unwrap();
        assert_eq!(settings.kind, ConnectionKind::Tcp);
        assert_eq!(settings.port, 35000);
        assert!(!settings.hard_reset);
    }
}
