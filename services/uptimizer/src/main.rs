//! Uptimizer CLI
//!
//! Command-line interface for the multi-tenant uptime monitor.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use uptimizer::{load_config, Config};

#[derive(Parser)]
#[command(name = "uptimizer")]
#[command(about = "Multi-tenant uptime monitor")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Status API port (overrides config file)
    #[arg(long)]
    api_port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }

    tracing::info!("Starting uptimizer service");
    tracing::debug!(
        "Clients: {}, interval: {}s, timeout: {}s",
        config.clients.len(),
        config.global_settings.check_interval_seconds,
        config.global_settings.check_timeout_seconds
    );

    uptimizer::run(config).await?;

    Ok(())
}
