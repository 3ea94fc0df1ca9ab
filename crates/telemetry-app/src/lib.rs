//! OBD-II Telemetry Service
//!
//! Composition root: loads settings, installs logging and the metrics
//! exporter, wires the processors into the pipeline and runs the
//! connection lifecycle until shutdown.

mod app;
mod settings;

pub use app::{App, AppError};
pub use settings::{
    ConnectionSection, DebugSettings, LoggingSettings, MetricsSettings, PidSettings, Settings,
    SettingsError, StorageSettings, TripSettings, DEFAULT_CONFIG_FILE, ENV_PREFIX,
};

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> Result<(), SettingsError> {
    let level = settings.max_level()?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }
    Ok(())
}

/// Serve Prometheus metrics on `addr`
pub fn install_metrics_exporter(addr: SocketAddr) -> Result<(), AppError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Metrics(e.to_string()))?;

    metrics::describe_counter!("obd_metrics_decoded_total", "Replies decoded into metrics");
    metrics::describe_counter!("obd_decode_errors_total", "Replies dropped by the decoder");
    metrics::describe_counter!("obd_reconnects_total", "Reconnect attempts");
    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}
