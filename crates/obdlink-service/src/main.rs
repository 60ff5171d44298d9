//! obdlink-service - Background OBD connection service.
//!
//! Run with: `cargo run -p obdlink-service`

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use obdlink_service::{Config, ServiceLifecycleController};
use obdlink_types::TransportMedium;

/// Background OBD connection service with broadcast and MQTT relay.
#[derive(Parser, Debug)]
#[command(name = "obdlink-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport medium: radio, serial or network (overrides config).
    #[arg(short, long)]
    medium: Option<String>,

    /// Device target: radio address, serial port or host[:port]
    /// (overrides config).
    #[arg(short, long)]
    target: Option<String>,

    /// Request an encrypted link where the medium supports it.
    #[arg(long)]
    secure: bool,

    /// Disable automatic reconnects.
    #[arg(long)]
    no_reconnect: bool,

    /// Disable MQTT publishing even if enabled in the config.
    #[arg(long)]
    no_mqtt: bool,
}

fn parse_medium(s: &str) -> anyhow::Result<TransportMedium> {
    match s.to_ascii_lowercase().as_str() {
        "radio" => Ok(TransportMedium::Radio),
        "serial" => Ok(TransportMedium::Serial),
        "network" => Ok(TransportMedium::Network),
        other => anyhow::bail!("unknown medium '{other}': expected radio, serial or network"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("obdlink_service=info".parse()?)
                .add_directive("obdlink_core=info".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(medium) = &args.medium {
        config.connection.medium = parse_medium(medium)?;
    }
    if let Some(target) = args.target {
        config.connection.target = Some(target);
    }
    if args.secure {
        config.connection.secure = true;
    }
    if args.no_reconnect {
        config.connection.auto_reconnect = false;
    }
    if args.no_mqtt {
        config.mqtt.enabled = false;
    }
    config.validate()?;

    info!(
        "Starting service over {} medium{}",
        config.connection.medium,
        config
            .connection
            .target
            .as_deref()
            .map(|t| format!(", target {t}"))
            .unwrap_or_default()
    );

    let controller = ServiceLifecycleController::new(config);
    controller.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    controller.stop().await;
    Ok(())
}
