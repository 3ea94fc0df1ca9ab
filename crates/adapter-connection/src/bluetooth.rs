//! Bluetooth RFCOMM adapter connection
//!
//! Paired adapters are bound to RFCOMM tty devices (`/dev/rfcomm0`) and
//! are then driven like a serial port. The configured device name is
//! looked up in the paired-device table; a path is used as-is.

use crate::error::ConnectionError;
use crate::frame::ReadPolicy;
use crate::serial::open_serial;
use crate::{AdapterConnection, ConnectionKind, ConnectionSettings, InputStream, OutputStream, Streams};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const SYSFS_BLUETOOTH: &str = "/sys/class/bluetooth";

pub struct BluetoothConnection {
    device_name: String,
    paired_devices: BTreeMap<String, String>,
    baud_rate: u32,
    hard_reset: bool,
    read_policy: ReadPolicy,
    sysfs_root: PathBuf,
    streams: Option<Streams>,
}

impl BluetoothConnection {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
        if settings.device_name.is_empty() {
            return Err(ConnectionError::AdapterNotSet("bluetooth"));
        }
        Ok(Self {
            device_name: settings.device_name.clone(),
            paired_devices: settings.paired_devices.clone(),
            baud_rate: settings.baud_rate,
            hard_reset: settings.hard_reset,
            read_policy: ReadPolicy::stream()
                .with_overrides(settings.read_attempts, settings.read_timeout_ms),
            sysfs_root: PathBuf::from(SYSFS_BLUETOOTH),
            streams: None,
        })
    }

    /// Directory listing the host controllers (`hci0`, ...)
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    fn radio_enabled(&self) -> bool {
        std::fs::read_dir(&self.sysfs_root)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.file_name().to_string_lossy().starts_with("hci"))
            })
            .unwrap_or(false)
    }

    /// RFCOMM device bound to the configured adapter
    fn resolve_device(&self) -> Result<String, ConnectionError> {
        if let Some(path) = self.paired_devices.get(&self.device_name) {
            return Ok(path.clone());
        }
        if self.device_name.starts_with('/') {
            return Ok(self.device_name.clone());
        }
        Err(ConnectionError::DeviceNotFound(format!(
            "{} is not paired",
            self.device_name
        )))
    }
}

#[async_trait]
impl AdapterConnection for BluetoothConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Bluetooth
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.streams.is_some() {
            self.close().await;
        }
        if !self.radio_enabled() {
            return Err(ConnectionError::BluetoothDisabled);
        }

        let device = self.resolve_device()?;
        if !Path::new(&device).exists() {
            return Err(ConnectionError::DeviceNotFound(format!(
                "{} ({} is not bound)",
                self.device_name, device
            )));
        }

        info!("Opening Bluetooth adapter {} on {}", self.device_name, device);
        self.streams = Some(open_serial(&device, self.baud_rate)?);
        Ok(())
    }

    fn input_stream(&mut self) -> Result<&mut InputStream, ConnectionError> {
        self.streams
            .as_mut()
            .map(|s| &mut s.input)
            .ok_or(ConnectionError::Closed)
    }

    fn output_stream(&mut self) -> Result<&mut OutputStream, ConnectionError> {
        self.streams
            .as_mut()
            .map(|s| &mut s.output)
            .ok_or(ConnectionError::Closed)
    }

    async fn close(&mut self) {
        if let Some(mut streams) = self.streams.take() {
            if let Err(e) = streams.output.shutdown().await {
                debug!("Ignoring error while closing {}: {}", self.device_name, e);
            }
            info!("Bluetooth adapter {} closed", self.device_name);
        }
    }

    fn is_closed(&self) -> bool {
        self.streams.is_none()
    }

    fn hard_reset(&self) -> bool {
        self.hard_reset
    }

    fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(name: &str) -> ConnectionSettings {
        let mut paired_devices = BTreeMap::new();
        paired_devices.insert("OBDII".to_string(), "/dev/obd-telemetry-rfcomm-test".to_string());
        ConnectionSettings {
            kind: ConnectionKind::Bluetooth,
            device_name: name.to_string(),
            paired_devices,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_radio() {
        let sysfs = tempfile::tempdir().unwrap();
        let mut connection = BluetoothConnection::new(&settings("OBDII"))
            .unwrap()
            .with_sysfs_root(sysfs.path());

        assert_eq!(connection.connect().await, Err(ConnectionError::BluetoothDisabled));
    }

    #[tokio::test]
    async fn test_unpaired_device() {
        let sysfs = tempfile::tempdir().unwrap();
        std::fs::create_dir(sysfs.path().join("hci0")).unwrap();

        let mut connection = BluetoothConnection::new(&settings("Vgate iCar"))
            .unwrap()
            .with_sysfs_root(sysfs.path());
        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::DeviceNotFound(ref m) if m.contains("not paired")));

        let mut connection = BluetoothConnection::new(&settings("OBDII"))
            .unwrap()
            .with_sysfs_root(sysfs.path());
        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::DeviceNotFound(ref m) if m.contains("not bound")));
        assert!(connection.is_closed());
    }

    #[test]
    fn test_missing_name_is_adapter_not_set() {
        assert!(matches!(
            BluetoothConnection::new(&settings("")),
            Err(ConnectionError::AdapterNotSet("bluetooth"))
        ));
    }
}
