//! arbwatch - Entry Point
//!
//! Direct mode: tail the bot log and serve live metrics to viewers
//! Relay mode: republish the bot's own event stream

use anyhow::Result;
use arbwatch_bot::{AppConfig, Application, RunMode};
use clap::Parser;
use tracing::info;

/// Live monitor for an arbitrage bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ARBWATCH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Deployment mode, overriding the configuration file
    #[arg(short, long, value_enum)]
    mode: Option<RunMode>,

    /// Viewer port, overriding both the configuration file and PORT
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    arbwatch_telemetry::init_logging()?;

    info!("Starting arbwatch v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > ARBWATCH_CONFIG env var > built-in defaults
    let config_path = args
        .config
        .or_else(|| std::env::var("ARBWATCH_CONFIG").ok());
    info!(config_path = ?config_path, "Loading configuration");

    let mut config = AppConfig::load(config_path.as_deref())?;
    config.apply_env()?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(port) = args.port {
        config.dashboard.port = port;
    }
    info!(mode = ?config.mode, port = config.dashboard.port, "Configuration loaded");

    let app = Application::new(config)?;
    app.run().await?;

    Ok(())
}
