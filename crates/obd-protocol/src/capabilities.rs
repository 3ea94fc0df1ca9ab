//! Vehicle capabilities discovered while the connection is being set up

use crate::decoder::parse_reply;
use crate::error::DecodeError;
use crate::pid::PidDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the connected vehicle and adapter reported about themselves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleCapabilities {
    /// Adapter identification string (reply to `ATZ`)
    pub adapter: Option<String>,
    /// Mode 01 PID codes 0x01-0x20 the vehicle reports as supported
    pub supported_pids: BTreeSet<u8>,
}

impl VehicleCapabilities {
    /// Decode the reply to `0100`. Byte 0 bit 7 is PID 0x01, byte 3 bit 0 is PID 0x20.
    pub fn from_supported_pids_reply(raw: &[u8]) -> Result<Self, DecodeError> {
        let bytes = parse_reply(raw, crate::mode::CURRENT_DATA, "00")?;
        if bytes.len() < 4 {
            return Err(DecodeError::Truncated {
                pid: "00".to_string(),
                expected: 4,
                actual: bytes.len(),
            });
        }

        let supported_pids = bytes[..4]
            .iter()
            .enumerate()
            .flat_map(|(i, byte)| {
                (0..8u8)
                    .filter(move |bit| byte & (0x80u8 >> *bit) != 0)
                    .map(move |bit| i as u8 * 8 + bit + 1)
            })
            .collect();

        Ok(Self {
            adapter: None,
            supported_pids,
        })
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// Whether `definition` should be polled. Unknown capabilities and
    /// PIDs outside the discovered range are assumed supported.
    pub fn supports(&self, definition: &PidDefinition) -> bool {
        if self.supported_pids.is_empty() || definition.mode != crate::mode::CURRENT_DATA {
            return true;
        }
        match u8::from_str_radix(&definition.pid, 16) {
            Ok(code) if (0x01..=0x20).contains(&code) => self.supported_pids.contains(&code),
            _ => true,
        }
    }
}
