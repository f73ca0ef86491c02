//! Visage: webcam preview with filters, screenshots and screencasts

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::Result;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use visage::{app, utils, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("visage=debug")))
        .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()));
    #[cfg(feature = "profiling")]
    let subscriber = subscriber.with(tracing_tracy::TracyLayer::default());
    subscriber.init();

    info!("Visage Launching...");

    // Load configuration
    let config_path = std::env::var_os(visage::CONFIG_PATH_ENV).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    visage::CONFIG.store(Arc::new(config.clone()));

    // Auto-detect capture device if needed
    let mut capture_config = config.capture.clone();
    if capture_config.device.path.is_empty() {
        capture_config.device = utils::auto_detect_device().await?;
        capture_config.format = capture_config.device.format;
    }

    info!("Using capture device: {:?}", capture_config.device);

    let source = app::open_source(&capture_config)?;
    let mut visage = app::Visage::new(source, &config)?;
    visage.run()?;

    info!("Visage shutting down");
    Ok(())
}
