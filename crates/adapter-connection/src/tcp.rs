//! TCP (Wi-Fi) adapter connection

use crate::error::ConnectionError;
use crate::frame::ReadPolicy;
use crate::{AdapterConnection, ConnectionKind, ConnectionSettings, InputStream, OutputStream, Streams};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Wi-Fi ELM327 adapter reachable over TCP
pub struct TcpConnection {
    host: String,
    port: u16,
    connect_timeout: Duration,
    hard_reset: bool,
    read_policy: ReadPolicy,
    streams: Option<Streams>,
}

impl TcpConnection {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
        if settings.host.is_empty() || settings.port == 0 {
            return Err(ConnectionError::AdapterNotSet("tcp"));
        }
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            hard_reset: settings.hard_reset,
            read_policy: ReadPolicy::stream()
                .with_overrides(settings.read_attempts, settings.read_timeout_ms),
            streams: None,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl AdapterConnection for TcpConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Tcp
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.streams.is_some() {
            self.close().await;
        }

        let address = self.address();
        info!("Opening TCP connection to {}", address);

        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.connect_timeout.as_millis() as u64))??;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", address, e);
        }

        let (input, output) = stream.into_split();
        self.streams = Some(Streams {
            input: Box::new(input),
            output: Box::new(output),
        });
        debug!("TCP connection to {} established", address);
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
                debug!("Ignoring error while closing {}: {}", self.address(), e);
            }
            info!("TCP connection to {} closed", self.address());
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
    use crate::frame::transact;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings(port: u16) -> ConnectionSettings {
        ConnectionSettings {
            kind: ConnectionKind::Tcp,
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 1000,
            ..Default::default()
        }
    }

    /// Minimal adapter: answers every command with a speed reply
    async fn spawn_adapter() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if socket.write_all(b"41 0D 2A\r\r>").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_connect_transact_close() {
        let port = spawn_adapter().await;
        let mut connection = TcpConnection::new(&settings(port)).unwrap();
        assert!(connection.is_closed());

        connection.connect().await.unwrap();
        assert!(!connection.is_closed());

        let reply = transact(&mut connection, "010D").await.unwrap();
        assert_eq!(reply, Some(b"41 0D 2A\r\r>".to_vec()));

        connection.close().await;
        connection.close().await;
        assert!(connection.is_closed());
        assert!(matches!(connection.input_stream(), Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_reconnect_twice() {
        let port = spawn_adapter().await;
        let mut connection = TcpConnection::new(&settings(port)).unwrap();
        connection.connect().await.unwrap();
        connection.reconnect().await.unwrap();
        connection.reconnect().await.unwrap();

        let reply = transact(&mut connection, "010D").await.unwrap();
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn test_hard_reset_policy() {
        let port = spawn_adapter().await;
        let mut connection = TcpConnection::new(&ConnectionSettings {
            hard_reset: true,
            ..settings(port)
        })
        .unwrap();
        connection.connect().await.unwrap();

        assert_eq!(connection.reconnect().await, Err(ConnectionError::HardResetRequired));
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_refused_connection_is_recoverable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut connection = TcpConnection::new(&settings(port)).unwrap();
        let err = connection.connect().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(connection.is_closed());
    }
}
