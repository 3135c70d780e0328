//! sensorgate - Main Entry Point

use clap::{Parser, Subcommand};
use sensorgate::config::GatewayConfig;
use sensorgate::observability::{init_default_logging, metrics, HealthServer};
use sensorgate::store::{InMemoryStore, Stores};
use sensorgate::supervisor::ShutdownHandle;
use sensorgate::{GatewayService, MqttConnector, RunOutcome};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// MQTT device telemetry gateway
#[derive(Parser)]
#[command(name = "sensorgate")]
#[command(about = "MQTT device telemetry gateway with geofencing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SENSORGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured brokers and process device traffic
    Run {
        /// Stop after this many seconds (overrides service.run_timeout_secs)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Publish a discovery request and report who answered
    Discover {
        /// Ask a single device instead of every device
        #[arg(long, value_name = "ID")]
        device: Option<String>,
        /// How long to wait for responses
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        wait: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting sensorgate v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { timeout } => run_gateway(config, timeout).await,
        Commands::Discover { device, wait } => run_discovery(config, device, wait).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(GatewayConfig::load_from_file(path)?);
    }

    for path_str in ["sensorgate.toml", "config/sensorgate.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(GatewayConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create sensorgate.toml".into())
}

/// Seed an in-memory store from the config and connect
async fn build_service(
    config: GatewayConfig,
) -> Result<Arc<GatewayService>, Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let service = GatewayService::builder(config, Stores::in_memory(store), Arc::new(MqttConnector))
        .build();
    service.seed_from_config().await?;
    service.start().await?;
    Ok(Arc::new(service))
}

async fn run_gateway(
    config: GatewayConfig,
    timeout_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .or_else(|| config.service.run_timeout());
    let health_port = config.service.health_port;
    let gateway_id = config
        .brokers
        .iter()
        .find(|b| b.is_default)
        .map(|b| format!("sensorgate@{}", b.id))
        .unwrap_or_else(|| "sensorgate".to_string());

    metrics().set_service_state("initializing");
    let service = build_service(config).await?;

    if let Some(port) = health_port {
        let health_server = Arc::new(HealthServer::new(gateway_id, port));
        tokio::spawn(health_server.start());
    }

    spawn_signal_listener(service.shutdown_handle())?;

    info!("Gateway is running and processing device traffic...");
    match service.run(timeout).await {
        RunOutcome::AllConnectionsLost => {
            metrics().set_service_state("error");
            Err("all broker connections lost".into())
        }
        outcome => {
            info!(?outcome, "Gateway stopped");
            Ok(())
        }
    }
}

async fn run_discovery(
    config: GatewayConfig,
    device: Option<String>,
    wait_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(config).await?;
    spawn_signal_listener(service.shutdown_handle())?;

    let tally = service
        .discover_and_wait(device.as_deref(), Duration::from_secs(wait_secs))
        .await;
    service.stop().await;
    let tally = tally?;

    if let Some(target) = device.as_deref() {
        if !tally.saw(target) {
            warn!(device_id = target, "Device did not answer within the wait");
        }
    }

    println!(
        "{} response(s), {} device(s), {} new",
        tally.responses,
        tally.devices.len(),
        tally.created
    );
    for device_id in &tally.devices {
        println!("  {device_id}");
    }
    Ok(())
}

/// SIGINT/SIGTERM trigger an orderly shutdown
fn spawn_signal_listener(shutdown: ShutdownHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
        metrics().set_service_state("stopping");
        shutdown.trigger();
    });
    Ok(())
}

fn handle_config_command(
    config: GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!(
        brokers = config.brokers.len(),
        lands = config.lands.len(),
        "Configuration validation complete"
    );
    Ok(())
}
