//! PID Definitions and Registry
//!
//! Every sensor the acquisition layer can poll is described by a
//! [`PidDefinition`]. Definitions are loaded once and are read-only at
//! runtime.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registry identifier of a PID (not the on-wire PID code)
pub type PidId = u32;

/// Well-known registry identifiers
pub mod ids {
    use super::PidId;

    pub const ENGINE_LOAD: PidId = 5;
    pub const COOLANT_TEMP: PidId = 6;
    pub const SHORT_FUEL_TRIM: PidId = 7;
    pub const LONG_FUEL_TRIM: PidId = 8;
    pub const INTAKE_MANIFOLD_PRESSURE: PidId = 11;
    pub const ENGINE_RPM: PidId = 13;
    pub const VEHICLE_SPEED: PidId = 14;
    pub const MAF: PidId = 17;
    pub const THROTTLE_POSITION: PidId = 18;
    pub const O2_VOLTAGE: PidId = 20;
    /// Custom BOOL-MAP PID carrying coarse vehicle state flags
    pub const VEHICLE_STATUS: PidId = 7002;
    /// Always-on diagnostic PID reporting the drive selector mode
    pub const DYNAMIC_SELECTOR: PidId = 7036;
}

/// Shape of the decoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Double,
    Short,
    BoolMap,
}

/// Static description of a single sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidDefinition {
    pub id: PidId,
    /// Request group, e.g. "01"
    pub mode: String,
    /// On-wire PID code in hex, e.g. "0D"
    pub pid: String,
    pub min: f64,
    pub max: f64,
    pub value_type: ValueType,
    pub unit: String,
    pub description: String,
    /// Labels of the bits of a BOOL-MAP value, least significant bit first
    #[serde(default)]
    pub bits: Vec<String>,
}

impl PidDefinition {
    fn numeric(
        id: PidId,
        pid: &str,
        (min, max): (f64, f64),
        value_type: ValueType,
        unit: &str,
        description: &str,
    ) -> Self {
        Self {
            id,
            mode: crate::mode::CURRENT_DATA.to_string(),
            pid: pid.to_string(),
            min,
            max,
            value_type,
            unit: unit.to_string(),
            description: description.to_string(),
            bits: Vec::new(),
        }
    }

    /// Command sent to the adapter to request this PID
    pub fn command(&self) -> String {
        format!("{}{}", self.mode, self.pid)
    }

    pub fn is_bool_map(&self) -> bool {
        self.value_type == ValueType::BoolMap
    }
}

/// Read-only registry of PID definitions keyed by id
#[derive(Debug, Clone, Default)]
pub struct PidRegistry {
    definitions: BTreeMap<PidId, PidDefinition>,
}

impl PidRegistry {
    /// Registry with the Mode 01 sensors and the custom status PIDs
    pub fn standard() -> Self {
        use ValueType::*;

        let mut definitions = vec![
            PidDefinition::numeric(ids::ENGINE_LOAD, "04", (0.0, 100.0), Double, "%", "Calculated engine load"),
            PidDefinition::numeric(ids::COOLANT_TEMP, "05", (-40.0, 215.0), Int, "°C", "Engine coolant temperature"),
            PidDefinition::numeric(ids::SHORT_FUEL_TRIM, "06", (-100.0, 99.2), Double, "%", "Short term fuel trim bank 1"),
            PidDefinition::numeric(ids::LONG_FUEL_TRIM, "07", (-100.0, 99.2), Double, "%", "Long term fuel trim bank 1"),
            PidDefinition::numeric(ids::INTAKE_MANIFOLD_PRESSURE, "0B", (0.0, 255.0), Int, "kPa", "Intake manifold absolute pressure"),
            PidDefinition::numeric(ids::ENGINE_RPM, "0C", (0.0, 16383.75), Int, "rpm", "Engine speed"),
            PidDefinition::numeric(ids::VEHICLE_SPEED, "0D", (0.0, 255.0), Int, "km/h", "Vehicle speed"),
            PidDefinition::numeric(ids::MAF, "10", (0.0, 655.35), Double, "g/s", "Mass air flow rate"),
            PidDefinition::numeric(ids::THROTTLE_POSITION, "11", (0.0, 100.0), Double, "%", "Throttle position"),
            PidDefinition::numeric(ids::O2_VOLTAGE, "14", (0.0, 1.275), Double, "V", "Oxygen sensor voltage bank 1 sensor 1"),
        ];

        definitions.push(PidDefinition {
            id: ids::VEHICLE_STATUS,
            mode: crate::mode::DATA_BY_IDENTIFIER.to_string(),
            pid: "1002".to_string(),
            min: 0.0,
            max: 0.0,
            value_type: BoolMap,
            unit: String::new(),
            description: "Vehicle status flags".to_string(),
            bits: ["ignition", "engine_running", "moving", "accelerating", "decelerating"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        });
        definitions.push(PidDefinition {
            id: ids::DYNAMIC_SELECTOR,
            mode: crate::mode::DATA_BY_IDENTIFIER.to_string(),
            pid: "18F0".to_string(),
            min: 0.0,
            max: 4.0,
            value_type: Short,
            unit: String::new(),
            description: "Dynamic selector mode".to_string(),
            bits: Vec::new(),
        });

        Self {
            definitions: definitions.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Load a registry from a JSON array of definitions
    pub fn from_json(document: &str) -> Result<Self, RegistryError> {
        let list: Vec<PidDefinition> = serde_json::from_str(document)?;
        let mut definitions = BTreeMap::new();
        for definition in list {
            let id = definition.id;
            if definitions.insert(id, definition).is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
        }
        Ok(Self { definitions })
    }

    pub fn get(&self, id: PidId) -> Option<&PidDefinition> {
        self.definitions.get(&id)
    }

    pub fn contains(&self, id: PidId) -> bool {
        self.definitions.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PidDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
