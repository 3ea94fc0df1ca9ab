//! OBD-II Protocol Model
//!
//! Typed metrics, the static PID registry and a decoder that turns raw
//! ELM327 replies into [`Metric`] values. The decoder is intentionally
//! small: the acquisition layer treats it as a black box.

mod capabilities;
mod decoder;
mod error;
mod metric;
mod pid;
mod protocol;

pub use capabilities::VehicleCapabilities;
pub use decoder::{parse_reply, ElmDecoder, MetricDecoder};
pub use error::{DecodeError, RegistryError};
pub use metric::{Metric, MetricValue};
pub use pid::{ids, PidDefinition, PidId, PidRegistry, ValueType};
pub use protocol::ObdProtocol;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: &str = "01";
    /// Manufacturer specific data by identifier
    pub const DATA_BY_IDENTIFIER: &str = "22";
}
