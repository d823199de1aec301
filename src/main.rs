//! Modeler Binary Entry Point
//!
//! Runs the model collection daemon. Core functionality is provided by the
//! `modeler` library crate.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use modeler::{
    Modeler,
    config::{ModelerConfig, parse_duration},
    hub,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Modeler - device model collection daemon
#[derive(Parser, Debug)]
#[command(name = "modeler", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/modeler.yaml",
        env = "MODELER_CONFIG"
    )]
    config: String,

    /// Hub base URL (overrides config file)
    #[arg(long, env = "MODELER_HUB_URL", conflicts_with = "inventory")]
    hub_url: Option<String>,

    /// Local inventory file used instead of a remote hub
    #[arg(long, env = "MODELER_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Maximum devices collected in parallel
    #[arg(long, env = "MODELER_PARALLEL")]
    parallel: Option<usize>,

    /// Time between passes; 0s runs a single pass
    #[arg(long, env = "MODELER_CYCLE_INTERVAL", value_parser = parse_duration)]
    cycle_interval: Option<Duration>,

    /// Collect only this device, then exit
    #[arg(short, long)]
    device: Option<String>,

    /// Organizer path to collect
    #[arg(short, long)]
    path: Option<String>,

    /// Collect every device on this monitor
    #[arg(long)]
    monitor: Option<String>,

    /// Only run plugins matching this pattern
    #[arg(long, conflicts_with = "ignore")]
    collect: Option<String>,

    /// Never run plugins matching this pattern
    #[arg(long)]
    ignore: Option<String>,

    /// Skip the start delay
    #[arg(long)]
    now: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,modeler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = ModelerConfig::from_file(&cli.config)?;
    apply_overrides(&mut config, cli);
    config.validate()?;

    let service = hub::connect(&config.hub)?;
    tracing::info!(
        hub = config.hub.url.as_deref().unwrap_or("inventory"),
        "Hub connected"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let report = Modeler::new(config, service)?.run(shutdown).await?;
    match report {
        Some(report) => tracing::info!(
            devices = report.devices,
            timed_out = report.timed_out,
            "Shutdown complete"
        ),
        None => tracing::info!("Shutdown complete"),
    }
    Ok(())
}

/// CLI and environment values take precedence over the config file.
fn apply_overrides(config: &mut ModelerConfig, cli: Cli) {
    if let Some(url) = cli.hub_url {
        config.hub.url = Some(url);
        config.hub.inventory = None;
    }
    if let Some(inventory) = cli.inventory {
        config.hub.inventory = Some(inventory);
        config.hub.url = None;
    }
    let collection = &mut config.collection;
    if let Some(parallel) = cli.parallel {
        collection.parallel = parallel;
    }
    if let Some(interval) = cli.cycle_interval {
        collection.cycle_interval = Some(interval);
    }
    if cli.device.is_some() {
        collection.device = cli.device;
    }
    if cli.path.is_some() {
        collection.path = cli.path;
    }
    if let Some(monitor) = cli.monitor {
        collection.monitor = monitor;
        collection.select_by_monitor = true;
    }
    if cli.collect.is_some() {
        collection.collect = cli.collect;
        collection.ignore = None;
    }
    if cli.ignore.is_some() {
        collection.ignore = cli.ignore;
        collection.collect = None;
    }
    if cli.now {
        collection.start_delay = Duration::ZERO;
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down modeler...");
    shutdown.cancel();
}
