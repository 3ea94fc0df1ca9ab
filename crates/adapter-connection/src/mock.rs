//! Simulated adapter for testing without hardware
//!
//! The channel is an in-process duplex pipe with a task on the far end
//! that behaves like an ELM327: it answers AT commands with `OK`, Mode 01
//! requests with plausible pseudo-random values, and ends every reply
//! with the `>` prompt. Failures can be scripted.

use crate::error::ConnectionError;
use crate::frame::ReadPolicy;
use crate::{AdapterConnection, ConnectionKind, InputStream, OutputStream, Streams};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Scripted behavior of a [`MockConnection`]
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Number of initial connects that fail with an I/O error
    pub fail_connects: usize,
    /// Returned by every connect, e.g. an availability error
    pub refuse: Option<ConnectionError>,
    /// Channel dies after this many replies per session
    pub break_after: Option<usize>,
    pub hard_reset: bool,
    /// Reply bodies keyed by command, taking precedence over the defaults
    pub responses: HashMap<String, String>,
    /// First reply to each of these commands is held back this long
    pub late_replies: HashMap<String, Duration>,
}

/// Counters shared by every connection built from the same stats handle
#[derive(Debug, Default)]
pub struct MockStats {
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    open_handles: AtomicUsize,
    max_open_handles: AtomicUsize,
    pending_failures: AtomicUsize,
}

impl MockStats {
    pub fn new(fail_connects: usize) -> Arc<Self> {
        Arc::new(Self {
            pending_failures: AtomicUsize::new(fail_connects),
            ..Default::default()
        })
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Closes that released an open channel
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously open channels
    pub fn max_open_handles(&self) -> usize {
        self.max_open_handles.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    behavior: Arc<MockBehavior>,
    stats: Arc<MockStats>,
    read_policy: ReadPolicy,
    streams: Option<Streams>,
    responder: Option<JoinHandle<()>>,
}

impl MockConnection {
    pub fn new(behavior: MockBehavior) -> Self {
        let stats = MockStats::new(behavior.fail_connects);
        Self::with_stats(behavior, stats)
    }

    /// Share counters and remaining scripted failures with other
    /// connections, e.g. across hard-reset rebuilds
    pub fn with_stats(behavior: MockBehavior, stats: Arc<MockStats>) -> Self {
        info!("Creating mock adapter connection");
        Self {
            behavior: Arc::new(behavior),
            stats,
            read_policy: ReadPolicy::usb(),
            streams: None,
            responder: None,
        }
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl AdapterConnection for MockConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Mock
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.stats.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.streams.is_some() {
            self.close().await;
        }

        if let Some(err) = &self.behavior.refuse {
            return Err(err.clone());
        }
        let failing = self
            .stats
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::Io("simulated connect failure".to_string()));
        }

        let (client, server) = tokio::io::duplex(1024);
        self.responder = Some(tokio::spawn(respond(server, Arc::clone(&self.behavior))));

        let (input, output) = tokio::io::split(client);
        self.streams = Some(Streams {
            input: Box::new(input),
            output: Box::new(output),
        });

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        let open = self.stats.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open_handles.fetch_max(open, Ordering::SeqCst);
        debug!("Mock adapter connected ({} open)", open);
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
        if let Some(responder) = self.responder.take() {
            responder.abort();
        }
        if self.streams.take().is_some() {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            self.stats.open_handles.fetch_sub(1, Ordering::SeqCst);
            debug!("Mock adapter closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.streams.is_none()
    }

    fn hard_reset(&self) -> bool {
        self.behavior.hard_reset
    }

    fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            responder.abort();
        }
        if self.streams.take().is_some() {
            self.stats.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Far end of the pipe: one reply per carriage-return terminated command
async fn respond(mut server: DuplexStream, behavior: Arc<MockBehavior>) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 128];
    let mut replies = 0usize;
    let mut late_replies = behavior.late_replies.clone();

    loop {
        let n = match server.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|b| *b == b'\r') {
            let command = String::from_utf8_lossy(&pending[..pos]).trim().to_uppercase();
            pending.drain(..=pos);

            if behavior.break_after.is_some_and(|limit| replies >= limit) {
                debug!("Mock adapter dropping channel after {} replies", replies);
                return;
            }

            if let Some(delay) = late_replies.remove(&command) {
                debug!("Mock adapter holding {} reply for {:?}", command, delay);
                tokio::time::sleep(delay).await;
            }

            let reply = behavior
                .responses
                .get(&command)
                .cloned()
                .unwrap_or_else(|| default_reply(&command, replies as u64));
            if server.write_all(format!("{}\r\r>", reply).as_bytes()).await.is_err() {
                return;
            }
            replies += 1;
        }
    }
}

fn default_reply(command: &str, sequence: u64) -> String {
    if command == "ATZ" {
        return "ELM327 v1.5".to_string();
    }
    if command.starts_with("AT") {
        return "OK".to_string();
    }
    match command {
        "0100" => return "41 00 BE 1F B8 11".to_string(),
        "221002" => return "62 10 02 07".to_string(),
        "2218F0" => return "62 18 F0 02".to_string(),
        _ => {}
    }

    let Some(pid) = command
        .strip_prefix("01")
        .and_then(|p| u8::from_str_radix(p, 16).ok())
    else {
        return "NO DATA".to_string();
    };

    // Pseudo-random but deterministic values
    let mut hasher = DefaultHasher::new();
    sequence.hash(&mut hasher);
    pid.hash(&mut hasher);
    let hash = hasher.finish();

    let data = match pid {
        // RPM: 800-3500 RPM range
        0x0C => {
            let encoded = (800 + (hash % 2700) as u16) * 4;
            vec![(encoded >> 8) as u8, (encoded & 0xFF) as u8]
        }
        // Speed: 0-120 km/h
        0x0D => vec![(hash % 120) as u8],
        // Coolant temp: 70-105°C (stored as value + 40)
        0x05 => vec![(110 + (hash % 35)) as u8],
        // Engine load / throttle: 20-80%
        0x04 | 0x11 => vec![(51 + (hash % 153)) as u8],
        // Intake pressure: 30-100 kPa
        0x0B => vec![(30 + (hash % 70)) as u8],
        // MAF: 5-50 g/s
        0x10 => {
            let maf = 500 + (hash % 4500) as u16;
            vec![(maf >> 8) as u8, (maf & 0xFF) as u8]
        }
        // Fuel trims: -10% to +10%
        0x06 | 0x07 => vec![(115 + (hash % 26)) as u8],
        // O2 voltage: 0.1-0.9V
        0x14 => vec![(20 + (hash % 160)) as u8],
        _ => return "NO DATA".to_string(),
    };

    let mut reply = format!("41 {:02X}", pid);
    for byte in data {
        reply.push_str(&format!(" {:02X}", byte));
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::transact;

    #[tokio::test]
    async fn test_mock_answers_commands() {
        let mut connection = MockConnection::new(MockBehavior::default());
        connection.connect().await.unwrap();

        let reply = transact(&mut connection, "ATZ").await.unwrap().unwrap();
        assert_eq!(reply, b"ELM327 v1.5\r\r>".to_vec());

        let reply = transact(&mut connection, "010D").await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&reply).starts_with("41 0D "));

        let reply = transact(&mut connection, "01FF").await.unwrap().unwrap();
        assert_eq!(reply, b"NO DATA\r\r>".to_vec());
    }

    #[tokio::test]
    async fn test_scripted_responses_take_precedence() {
        let mut behavior = MockBehavior::default();
        behavior.responses.insert("010D".to_string(), "41 0D 3C".to_string());
        let mut connection = MockConnection::new(behavior);
        connection.connect().await.unwrap();

        let reply = transact(&mut connection, "010d").await.unwrap().unwrap();
        assert_eq!(reply, b"41 0D 3C\r\r>".to_vec());
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let mut connection = MockConnection::new(MockBehavior {
            fail_connects: 2,
            ..Default::default()
        });
        assert!(connection.connect().await.is_err());
        assert!(connection.connect().await.is_err());
        connection.connect().await.unwrap();
        assert_eq!(connection.stats().connect_attempts(), 3);
        assert_eq!(connection.stats().connects(), 1);
    }

    #[tokio::test]
    async fn test_break_after_closes_channel() {
        let mut connection = MockConnection::new(MockBehavior {
            break_after: Some(1),
            ..Default::default()
        });
        connection.connect().await.unwrap();
        assert!(transact(&mut connection, "010C").await.unwrap().is_some());
        assert!(transact(&mut connection, "010C").await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_never_leaks_handles() {
        let mut connection = MockConnection::new(MockBehavior::default());
        connection.connect().await.unwrap();
        connection.reconnect().await.unwrap();
        connection.reconnect().await.unwrap();

        let stats = connection.stats();
        assert_eq!(stats.connects(), 3);
        assert_eq!(stats.closes(), 2);
        assert_eq!(stats.open_handles(), 1);
        assert_eq!(stats.max_open_handles(), 1);

        connection.close().await;
        connection.close().await;
        assert_eq!(stats.open_handles(), 0);
        assert_eq!(stats.closes(), 3);
    }

    #[tokio::test]
    async fn test_refusal_is_returned_verbatim() {
        let mut connection = MockConnection::new(MockBehavior {
            refuse: Some(ConnectionError::BluetoothDisabled),
            ..Default::default()
        });
        assert_eq!(connection.connect().await, Err(ConnectionError::BluetoothDisabled));
        assert!(connection.is_closed());
    }
}
