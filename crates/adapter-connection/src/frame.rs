//! Prompt-terminated frame reads
//!
//! An ELM327 ends every reply with the `>` prompt. Reads are bounded: a
//! frame gets a fixed number of read attempts, each with its own timeout,
//! and a frame that never sees the prompt yields "no data" instead of
//! blocking the poll loop.

use crate::error::ConnectionError;
use crate::AdapterConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Prompt byte terminating every adapter reply
pub const TERMINATOR: u8 = b'>';

/// Bounds for reading one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPolicy {
    /// Read attempts per frame
    pub max_attempts: u32,
    /// Timeout of a single read attempt
    pub read_timeout: Duration,
}

impl ReadPolicy {
    /// USB-serial adapters: 7 attempts of 35ms
    pub const fn usb() -> Self {
        Self {
            max_attempts: 7,
            read_timeout: Duration::from_millis(35),
        }
    }

    /// Bluetooth and TCP links have higher per-read latency
    pub const fn stream() -> Self {
        Self {
            max_attempts: 20,
            read_timeout: Duration::from_millis(100),
        }
    }

    pub fn with_overrides(mut self, attempts: Option<u32>, timeout_ms: Option<u64>) -> Self {
        if let Some(attempts) = attempts {
            self.max_attempts = attempts.max(1);
        }
        if let Some(timeout_ms) = timeout_ms {
            self.read_timeout = Duration::from_millis(timeout_ms);
        }
        self
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::usb()
    }
}

/// Read until [`TERMINATOR`]. Returns `Ok(None)` when the attempt budget
/// runs out before the prompt arrives.
pub async fn read_frame<R>(input: &mut R, policy: ReadPolicy) -> Result<Option<Vec<u8>>, ConnectionError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame_matching(input, policy, |_| true).await
}

/// Like [`read_frame`], but frames rejected by `accept` are discarded and
/// reading continues within the same attempt budget.
async fn read_frame_matching<R, F>(
    input: &mut R,
    policy: ReadPolicy,
    accept: F,
) -> Result<Option<Vec<u8>>, ConnectionError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: Fn(&[u8]) -> bool,
{
    let mut pending = Vec::with_capacity(64);
    let mut buf = [0u8; 128];

    for attempt in 0..policy.max_attempts {
        let n = match tokio::time::timeout(policy.read_timeout, input.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => return Err(ConnectionError::Closed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
        };

        pending.extend_from_slice(&buf[..n]);
        while let Some(pos) = pending.iter().position(|b| *b == TERMINATOR) {
            let frame: Vec<u8> = pending.drain(..=pos).collect();
            if accept(&frame) {
                if !pending.is_empty() {
                    debug!("Dropping {} bytes after the prompt", pending.len());
                }
                debug!("Frame complete after {} read(s): {} bytes", attempt + 1, frame.len());
                return Ok(Some(frame));
            }
            debug!("Discarding stale frame {:?}", String::from_utf8_lossy(&frame));
        }
    }

    debug!(
        "No prompt after {} attempts, dropping {} bytes",
        policy.max_attempts,
        pending.len()
    );
    Ok(None)
}

/// Discard whatever the adapter already sent, e.g. a reply that arrived
/// after its read budget ran out. Never waits for new data.
pub async fn drain_input<R>(input: &mut R) -> Result<usize, ConnectionError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 128];
    let mut drained = 0;
    loop {
        match tokio::time::timeout(Duration::ZERO, input.read(&mut buf)).await {
            // Nothing buffered
            Err(_) => break,
            Ok(Ok(0)) => return Err(ConnectionError::Closed),
            Ok(Ok(n)) => drained += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    if drained > 0 {
        debug!("Drained {} stale bytes", drained);
    }
    Ok(drained)
}

/// Positive reply prefix of a hex service request, `010D` -> `410D`
fn positive_reply_prefix(command: &str) -> Option<String> {
    let command = command.trim().to_ascii_uppercase();
    if command.len() < 2 || command.len() % 2 != 0 || !command.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let service = u8::from_str_radix(&command[..2], 16).ok()?;
    if service >= 0x40 {
        return None;
    }
    Some(format!("{:02X}{}", service + 0x40, &command[2..]))
}

/// Whether `frame` can be the reply to `command`. Only hex payloads are
/// attributed; text such as `OK` or `NO DATA` always matches.
fn answers(command: &str, frame: &[u8]) -> bool {
    let Some(expected) = positive_reply_prefix(command) else {
        return true;
    };
    // Negative response: 7F, the requested service, a reason code
    let negative = format!("7F{}", command.trim()[..2].to_ascii_uppercase());

    let text = String::from_utf8_lossy(frame);
    let payloads: Vec<String> = text
        .split(|c: char| c == '\r' || c == '\n' || c == char::from(TERMINATOR))
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case(command.trim()))
        .map(|line| line.split_whitespace().collect::<String>().to_ascii_uppercase())
        .filter(|line| line.bytes().all(|b| b.is_ascii_hexdigit()))
        .collect();

    payloads.is_empty()
        || payloads
            .iter()
            .any(|line| line.contains(&expected) || line.contains(&negative))
}

/// Send `command` followed by a carriage return and read its reply frame.
///
/// Input left over from earlier exchanges is drained first, and frames that
/// carry the reply to a different request are skipped, so one late reply
/// costs one sample instead of shifting every later reply by one command.
pub async fn transact(
    connection: &mut dyn AdapterConnection,
    command: &str,
) -> Result<Option<Vec<u8>>, ConnectionError> {
    let policy = connection.read_policy();

    drain_input(connection.input_stream()?).await?;

    let output = connection.output_stream()?;
    output.write_all(command.as_bytes()).await?;
    output.write_all(b"\r").await?;
    output.flush().await?;

    let input = connection.input_stream()?;
    read_frame_matching(input, policy, |frame| answers(command, frame)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockConnection};
    use std::collections::HashMap;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            server.write_all(b"41 0D").await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            server.write_all(b" 55\r\r>").await.unwrap();
        });

        let frame = read_frame(&mut client, ReadPolicy::usb()).await.unwrap();
        assert_eq!(frame, Some(b"41 0D 55\r\r>".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_terminator_returns_none() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"41 0D 55").await.unwrap();

        let started = tokio::time::Instant::now();
        let frame = read_frame(&mut client, ReadPolicy::usb()).await.unwrap();
        assert_eq!(frame, None);
        // First read succeeds immediately, the remaining six each time out
        assert!(started.elapsed() >= Duration::from_millis(35 * 6));
        assert!(started.elapsed() < Duration::from_millis(35 * 7));
        drop(server);
    }

    #[tokio::test]
    async fn test_closed_peer_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let result = read_frame(&mut client, ReadPolicy::usb()).await;
        assert_eq!(result, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_drain_discards_buffered_bytes_only() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"41 0D 55\r\r>").await.unwrap();

        assert_eq!(drain_input(&mut client).await.unwrap(), 11);
        assert_eq!(drain_input(&mut client).await.unwrap(), 0);

        drop(server);
        assert_eq!(drain_input(&mut client).await, Err(ConnectionError::Closed));
    }

    #[test]
    fn test_reply_attribution() {
        assert!(answers("010C", b"41 0C 1A F8\r\r>"));
        assert!(!answers("010C", b"41 0D 55\r\r>"));
        // Echo and headers do not hide the payload
        assert!(answers("010D", b"010D\r7E8 03 41 0D 55\r\r>"));
        assert!(answers("010D", b"7F 01 12\r\r>"));
        assert!(answers("010D", b"NO DATA\r\r>"));
        assert!(answers("ATZ", b"ELM327 v1.5\r\r>"));
        assert!(answers("221002", b"62 10 02 07\r\r>"));
        assert!(!answers("0100", b"41 0C 1A F8\r\r>"));
    }

    fn late_reply_connection(command: &str) -> MockConnection {
        MockConnection::new(MockBehavior {
            late_replies: HashMap::from([(command.to_string(), Duration::from_millis(300))]),
            ..Default::default()
        })
    }

    fn starts_with(reply: &Option<Vec<u8>>, prefix: &str) -> bool {
        reply
            .as_deref()
            .is_some_and(|r| String::from_utf8_lossy(r).starts_with(prefix))
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_during_next_exchange_is_skipped() {
        let mut connection = late_reply_connection("010D");
        connection.connect().await.unwrap();

        // 300ms is past the 7 x 35ms budget
        assert_eq!(transact(&mut connection, "010D").await.unwrap(), None);

        let reply = transact(&mut connection, "010C").await.unwrap();
        assert!(starts_with(&reply, "41 0C"), "{:?}", reply);
        let reply = transact(&mut connection, "0105").await.unwrap();
        assert!(starts_with(&reply, "41 05"), "{:?}", reply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_between_exchanges_is_drained() {
        let mut connection = late_reply_connection("0100");
        connection.connect().await.unwrap();

        assert_eq!(transact(&mut connection, "0100").await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reply = transact(&mut connection, "010D").await.unwrap();
        assert!(starts_with(&reply, "41 0D"), "{:?}", reply);
        let reply = transact(&mut connection, "0100").await.unwrap();
        assert!(starts_with(&reply, "41 00"), "{:?}", reply);
    }

    #[test]
    fn test_policy_overrides() {
        let policy = ReadPolicy::usb().with_overrides(Some(0), Some(50));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.read_timeout, Duration::from_millis(50));
    }
}
