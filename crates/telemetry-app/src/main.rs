//! OBD-II telemetry service entry point
//!
//! Usage: `obd-telemetry [settings.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use telemetry_app::{init_logging, install_metrics_exporter, App, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref()).context("Failed to load settings")?;

    init_logging(&settings.logging)?;
    info!("Starting OBD telemetry v{}", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = settings.metrics.listen_addr {
        install_metrics_exporter(addr)?;
    }

    let app = App::build(settings).context("Failed to build acquisition stack")?;
    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await?;

    info!("Shutdown complete");
    Ok(())
}
