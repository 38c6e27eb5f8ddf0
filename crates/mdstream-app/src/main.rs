//! mdstream - live candle, indicator and order-book streams.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Market-data streaming engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MDSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before the first wss:// dial
    mdstream_ws::init_crypto();

    let args = Args::parse();

    // CLI arg > MDSTREAM_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MDSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = mdstream_app::AppConfig::load(&config_path)?;
    mdstream_telemetry::init_logging(config.telemetry.log_level.as_deref())?;

    info!("Starting mdstream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        streams = config.streams.len(),
        depth = config.depth.len(),
        rest_url = %config.rest_url,
        "Configuration loaded"
    );

    let app = mdstream_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
