//! ELM327 Reply Decoding
//!
//! Turns the ASCII reply of an ELM327-compatible adapter into a typed
//! [`Metric`] using the standard Mode 01 formulas.

use crate::error::DecodeError;
use crate::metric::Metric;
use crate::pid::{PidDefinition, ValueType};
use std::collections::BTreeMap;

/// Textual error markers an ELM327 may answer with
const ADAPTER_MESSAGES: &[&str] = &[
    "NODATA",
    "?",
    "STOPPED",
    "UNABLETOCONNECT",
    "CANERROR",
    "BUSERROR",
    "BUSBUSY",
    "FBERROR",
    "DATAERROR",
    "BUFFERFULL",
];

/// Decodes raw adapter replies into metrics
pub trait MetricDecoder: Send + Sync {
    fn decode(
        &self,
        definition: &PidDefinition,
        raw: &[u8],
        timestamp_ms: u64,
    ) -> Result<Metric, DecodeError>;
}

/// Decoder for ELM327 hex replies (`41 0D 55`)
#[derive(Debug, Clone, Copy, Default)]
pub struct ElmDecoder;

impl MetricDecoder for ElmDecoder {
    fn decode(
        &self,
        definition: &PidDefinition,
        raw: &[u8],
        timestamp_ms: u64,
    ) -> Result<Metric, DecodeError> {
        let bytes = parse_reply(raw, &definition.mode, &definition.pid)?;

        let metric = if definition.value_type == ValueType::BoolMap {
            Metric::bool_map(definition.id, decode_bits(definition, &bytes)?, timestamp_ms)
        } else {
            let value = decode_value(definition, &bytes)?;
            check_range(definition, value)?;
            Metric::number(definition.id, value, timestamp_ms)
        };

        Ok(metric.with_raw(raw.to_vec()))
    }
}

/// Extract the data bytes that follow the positive-response header for
/// `mode`/`pid` from a raw adapter reply.
pub fn parse_reply(raw: &[u8], mode: &str, pid: &str) -> Result<Vec<u8>, DecodeError> {
    let text = String::from_utf8_lossy(raw).to_uppercase();
    let mode_byte = u8::from_str_radix(mode, 16)
        .map_err(|_| DecodeError::Malformed(format!("mode '{}'", mode)))?;
    let header = format!("{:02X}{}", mode_byte.wrapping_add(0x40), pid.to_uppercase());
    let command = format!("{}{}", mode, pid).to_uppercase();

    for line in text.split(['\r', '\n', '>']) {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() || compact.starts_with("SEARCHING") || compact == command {
            continue;
        }
        if ADAPTER_MESSAGES.iter().any(|m| compact.contains(m)) {
            return Err(DecodeError::AdapterMessage(line.trim().to_string()));
        }
        if let Some(data) = compact.strip_prefix(&header) {
            return hex_bytes(data);
        }
    }

    Err(DecodeError::MissingReply {
        mode: mode.to_string(),
        pid: pid.to_string(),
        reply: text.trim().to_string(),
    })
}

fn hex_bytes(data: &str) -> Result<Vec<u8>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::Malformed(data.to_string()));
    }
    (0..data.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&data[i..i + 2], 16)
                .map_err(|_| DecodeError::Malformed(data.to_string()))
        })
        .collect()
}

fn need(definition: &PidDefinition, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            pid: definition.pid.clone(),
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn decode_value(definition: &PidDefinition, bytes: &[u8]) -> Result<f64, DecodeError> {
    let standard = definition.mode == crate::mode::CURRENT_DATA;

    let value = match definition.pid.to_uppercase().as_str() {
        // ((A*256)+B)/4
        "0C" if standard => {
            need(definition, bytes, 2)?;
            (bytes[0] as f64 * 256.0 + bytes[1] as f64) / 4.0
        }
        "0D" | "0B" if standard => {
            need(definition, bytes, 1)?;
            bytes[0] as f64
        }
        "05" if standard => {
            need(definition, bytes, 1)?;
            bytes[0] as f64 - 40.0
        }
        "04" | "11" if standard => {
            need(definition, bytes, 1)?;
            bytes[0] as f64 * 100.0 / 255.0
        }
        "10" if standard => {
            need(definition, bytes, 2)?;
            (bytes[0] as f64 * 256.0 + bytes[1] as f64) / 100.0
        }
        "06" | "07" if standard => {
            need(definition, bytes, 1)?;
            (bytes[0] as f64 - 128.0) * 100.0 / 128.0
        }
        "14" if standard => {
            need(definition, bytes, 1)?;
            bytes[0] as f64 / 200.0
        }
        // Unsigned big-endian integer of all data bytes
        _ => {
            need(definition, bytes, 1)?;
            bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64) as f64
        }
    };

    Ok(value)
}

fn decode_bits(
    definition: &PidDefinition,
    bytes: &[u8],
) -> Result<BTreeMap<String, bool>, DecodeError> {
    need(definition, bytes, definition.bits.len().div_ceil(8))?;
    Ok(definition
        .bits
        .iter()
        .enumerate()
        .map(|(i, label)| (label.clone(), (bytes[i / 8] >> (i % 8)) & 1 == 1))
        .collect())
}

fn check_range(definition: &PidDefinition, value: f64) -> Result<(), DecodeError> {
    // Definitions without a usable range are not checked
    if definition.min >= definition.max {
        return Ok(());
    }
    if value < definition.min || value > definition.max {
        return Err(DecodeError::OutOfRange {
            pid: definition.pid.clone(),
            value,
            min: definition.min,
            max: definition.max,
        });
    }
    Ok(())
}
