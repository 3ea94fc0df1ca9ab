//! Decoding and registry error types

use thiserror::Error;

/// Errors raised while turning an adapter reply into a metric.
///
/// None of these are fatal: the poll loop drops the offending metric and
/// moves on to the next PID.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Adapter answered with one of its textual error markers
    #[error("Adapter reported '{0}'")]
    AdapterMessage(String),

    /// Reply did not contain a line for the requested mode/PID
    #[error("No reply for {mode}{pid} in '{reply}'")]
    MissingReply {
        mode: String,
        pid: String,
        reply: String,
    },

    /// Reply contained characters that are not hex digits
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// Reply carried fewer data bytes than the formula needs
    #[error("PID {pid} needs {expected} data bytes, got {actual}")]
    Truncated {
        pid: String,
        expected: usize,
        actual: usize,
    },

    /// Decoded value falls outside the definition's bounds
    #[error("PID {pid} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        pid: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors raised while loading a PID registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid registry document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate PID id {0}")]
    DuplicateId(u32),
}
