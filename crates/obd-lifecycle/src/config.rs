//! Lifecycle configuration

use adapter_connection::ConnectionKind;
use obd_protocol::{ObdProtocol, PidId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect budget of one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first failure before giving up
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at 32x the base
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(5);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Per-transport retry policies. RFCOMM links take longer to come back
/// than a USB-serial port, so they are configured separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub bluetooth: RetryPolicy,
    pub usb: RetryPolicy,
    pub tcp: RetryPolicy,
    pub mock: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            bluetooth: RetryPolicy {
                max_retries: 5,
                backoff_ms: 1000,
            },
            usb: RetryPolicy {
                max_retries: 3,
                backoff_ms: 250,
            },
            tcp: RetryPolicy {
                max_retries: 3,
                backoff_ms: 500,
            },
            mock: RetryPolicy {
                max_retries: 2,
                backoff_ms: 10,
            },
        }
    }
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: ConnectionKind) -> RetryPolicy {
        match kind {
            ConnectionKind::Bluetooth => self.bluetooth,
            ConnectionKind::Usb => self.usb,
            ConnectionKind::Tcp => self.tcp,
            ConnectionKind::Mock => self.mock,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Transport the factory builds, used to pick the retry policy
    /// before a connection object exists
    pub kind: ConnectionKind,
    pub retry: RetryPolicies,
    pub protocol: ObdProtocol,
    /// Replaces the protocol's default init sequence when set
    pub init_commands: Option<Vec<String>>,
    /// Pause between poll cycles
    pub poll_interval_ms: u64,
    /// Pause while the query is empty
    pub idle_interval_ms: u64,
    /// PIDs produced by a synthetic source; never requested from the adapter
    pub synthesized_pids: Vec<PidId>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::default(),
            retry: RetryPolicies::default(),
            protocol: ObdProtocol::default(),
            init_commands: None,
            poll_interval_ms: 0,
            idle_interval_ms: 100,
            synthesized_pids: Vec::new(),
        }
    }
}

impl LifecycleConfig {
    pub fn init_commands(&self) -> Vec<String> {
        self.init_commands
            .clone()
            .unwrap_or_else(|| self.protocol.init_commands())
    }

    pub fn retry_policy(&self, kind: ConnectionKind) -> RetryPolicy {
        self.retry.for_kind(kind)
    }
}
