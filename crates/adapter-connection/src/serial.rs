//! USB-serial adapter connection

use crate::error::ConnectionError;
use crate::frame::ReadPolicy;
use crate::{AdapterConnection, ConnectionKind, ConnectionSettings, InputStream, OutputStream, Streams};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Open a tty device and split it into read/write halves
pub(crate) fn open_serial(path: &str, baud_rate: u32) -> Result<Streams, ConnectionError> {
    let port = tokio_serial::new(path, baud_rate).open_native_async()?;
    let (input, output) = tokio::io::split(port);
    Ok(Streams {
        input: Box::new(input),
        output: Box::new(output),
    })
}

/// ELM327 attached through a USB-serial bridge (`/dev/ttyUSB0`, `COM3`)
pub struct UsbSerialConnection {
    device: String,
    baud_rate: u32,
    hard_reset: bool,
    read_policy: ReadPolicy,
    streams: Option<Streams>,
}

impl UsbSerialConnection {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
        if settings.device_name.is_empty() {
            return Err(ConnectionError::AdapterNotSet("usb"));
        }
        Ok(Self {
            device: settings.device_name.clone(),
            baud_rate: settings.baud_rate,
            hard_reset: settings.hard_reset,
            read_policy: ReadPolicy::usb()
                .with_overrides(settings.read_attempts, settings.read_timeout_ms),
            streams: None,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

#[async_trait]
impl AdapterConnection for UsbSerialConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Usb
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.streams.is_some() {
            self.close().await;
        }

        // Device nodes only exist on unix; elsewhere let the driver report
        if cfg!(unix) && !Path::new(&self.device).exists() {
            return Err(ConnectionError::DeviceNotFound(self.device.clone()));
        }

        info!("Opening USB serial adapter {} at {} baud", self.device, self.baud_rate);
        self.streams = Some(open_serial(&self.device, self.baud_rate)?);
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
                debug!("Ignoring error while closing {}: {}", self.device, e);
            }
            info!("USB serial adapter {} closed", self.device);
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
    use std::time::Duration;

    #[test]
    fn test_default_usb_read_policy() {
        let connection = UsbSerialConnection::new(&ConnectionSettings {
            kind: ConnectionKind::Usb,
            device_name: "/dev/ttyUSB0".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(connection.read_policy().max_attempts, 7);
        assert_eq!(connection.read_policy().read_timeout, Duration::from_millis(35));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_device_is_not_found() {
        let mut connection = UsbSerialConnection::new(&ConnectionSettings {
            kind: ConnectionKind::Usb,
            device_name: "/dev/obd-telemetry-missing-tty".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::DeviceNotFound(_)));
        assert!(connection.is_closed());
        // Close on a never-opened connection is a no-op
        connection.close().await;
    }
}
