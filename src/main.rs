//! Printer Relay - Main Entry Point
//!
//! Loads configuration, wires the Device Link connector, cloud collaborators,
//! broadcaster and session manager together, and serves browser clients until
//! SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use printer_relay::cloud::CloudGateway;
use printer_relay::config::RelayConfig;
use printer_relay::observability::{init_default_logging, init_logging, LogFormat};
use printer_relay::{server, Broadcaster, MqttConnector, SessionManager};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, Level};

/// Relays 3D printer telemetry to browser clients
#[derive(Parser)]
#[command(name = "printer-relay")]
#[command(about = "Relays 3D printer MQTT telemetry to browser clients")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Listen port, overriding the configuration file
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["relay.toml", "config/relay.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Pretty, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    }

    info!("Starting printer-relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RelayConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using built-in defaults");
    let config = RelayConfig::default();
    config.validate()?;
    Ok(config)
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let broadcaster = Arc::new(Broadcaster::new(config.server.client_queue_capacity));
    let gateway = CloudGateway::from_config(&config.cloud)?;
    let connector = Arc::new(MqttConnector::new(config.device.clone()));
    let sessions = Arc::new(SessionManager::new(
        connector,
        gateway,
        broadcaster,
        config.device.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_handle = tokio::spawn(server::serve(
        sessions.clone(),
        config.server.socket_addr(),
        async move {
            let _ = shutdown_rx.await;
        },
    ));

    let stopped_early = tokio::select! {
        signalled = wait_for_shutdown_signal() => {
            signalled?;
            None
        }
        served = &mut server_handle => Some(served),
    };

    let served = match stopped_early {
        Some(served) => {
            error!("Relay server stopped unexpectedly");
            served
        }
        None => {
            info!("Application shutdown initiated");
            let _ = shutdown_tx.send(());
            server_handle.await
        }
    };

    // Links are closed even when the listener failed
    sessions.shutdown_all().await;
    served??;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down gracefully...");
    }
    Ok(())
}

fn handle_config_command(
    config: &RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
