//! Typed settings loaded from file and environment

use adapter_connection::{ConnectionKind, ConnectionSettings};
use config::{Config, Environment, File};
use drag_racing::DragRacingConfig;
use metrics_pipeline::DebugGeneratorConfig;
use obd_lifecycle::{LifecycleConfig, RetryPolicies};
use obd_protocol::ObdProtocol;
use query_strategy::QuerySettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

/// Settings file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-telemetry.toml";
/// Environment overrides look like `OBD__CONNECTION__KIND=tcp`
pub const ENV_PREFIX: &str = "OBD";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub kind: ConnectionKind,
    pub device_name: String,
    pub host: String,
    pub port: u16,
    pub baud_rate: u32,
    pub hard_reset: bool,
    pub read_attempts: Option<u32>,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    pub paired_devices: BTreeMap<String, String>,
    pub init_commands: Option<Vec<String>>,
    pub protocol: ObdProtocol,
    pub poll_interval_ms: u64,
    pub retry: RetryPolicies,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        let transport = ConnectionSettings::default();
        let lifecycle = LifecycleConfig::default();
        Self {
            kind: transport.kind,
            device_name: transport.device_name,
            host: transport.host,
            port: transport.port,
            baud_rate: transport.baud_rate,
            hard_reset: transport.hard_reset,
            read_attempts: transport.read_attempts,
            read_timeout_ms: transport.read_timeout_ms,
            connect_timeout_ms: transport.connect_timeout_ms,
            paired_devices: transport.paired_devices,
            init_commands: lifecycle.init_commands,
            protocol: lifecycle.protocol,
            poll_interval_ms: lifecycle.poll_interval_ms,
            retry: lifecycle.retry,
        }
    }
}

impl ConnectionSection {
    pub fn transport(&self) -> ConnectionSettings {
        ConnectionSettings {
            kind: self.kind,
            device_name: self.device_name.clone(),
            host: self.host.clone(),
            port: self.port,
            baud_rate: self.baud_rate,
            hard_reset: self.hard_reset,
            read_attempts: self.read_attempts,
            read_timeout_ms: self.read_timeout_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            paired_devices: self.paired_devices.clone(),
        }
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            kind: self.kind,
            retry: self.retry,
            protocol: self.protocol,
            init_commands: self.init_commands.clone(),
            poll_interval_ms: self.poll_interval_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TripSettings {
    pub record_short_trips: bool,
    pub min_trip_secs: u64,
}

impl Default for TripSettings {
    fn default() -> Self {
        Self {
            record_short_trips: false,
            min_trip_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub generator_enabled: bool,
    pub interval_ms: u64,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            generator_enabled: false,
            interval_ms: DebugGeneratorConfig::default().interval_ms,
        }
    }
}

impl DebugSettings {
    pub fn generator(&self) -> DebugGeneratorConfig {
        DebugGeneratorConfig {
            interval_ms: self.interval_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON key/value file holding selections and drag racing results
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("obd-telemetry-store.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PidSettings {
    /// JSON PID registry replacing the built-in one
    pub registry_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingSettings {
    pub fn max_level(&self) -> Result<Level, SettingsError> {
        Level::from_str(&self.level).map_err(|e| SettingsError::Invalid {
            key: "logging.level",
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Serve Prometheus metrics here when set
    pub listen_addr: Option<SocketAddr>,
}

/// Application settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectionSection,
    pub query: QuerySettings,
    pub drag_racing: DragRacingConfig,
    pub trips: TripSettings,
    pub debug: DebugSettings,
    pub storage: StorageSettings,
    pub pids: PidSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load defaults, then the settings file, then `OBD__*` environment
    /// variables. An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings: Settings = Config::builder()
            .add_source(File::from(file.as_path()).required(path.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        self.logging.max_level()?;
        if !self.query.surfaces.contains_key(&self.query.active_surface) {
            return Err(SettingsError::Invalid {
                key: "query.active_surface",
                message: format!("no surface named '{}'", self.query.active_surface),
            });
        }
        if self.debug.interval_ms == 0 {
            return Err(SettingsError::Invalid {
                key: "debug.interval_ms",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
