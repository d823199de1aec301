//! Daemon lifecycle: startup configuration, scheduler, heartbeats and shutdown.
//!
//! [`Modeler::run`] performs, in order:
//!
//! 1. Spawn the event pipeline.
//! 2. Fetch property items, threshold classes, the command template and collector
//!    thresholds from the hub (defaults on failure).
//! 3. Wait out the start delay.
//! 4. Run the scheduler. In continuous mode, heartbeats and periodic config
//!    refreshes run beside it until shutdown.
//! 5. Flush pending events.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::collector::{ClientRegistry, PluginRegistry, ProtocolDispatcher};
use crate::config::{ConfigError, ModelerConfig};
use crate::events::{DaemonStats, EventWriter, spawn_pipeline};
use crate::hub::{HubError, ModelerService, PropertyItems};
use crate::scheduler::{CycleMode, PassReport, Scheduler, SchedulerHandle};

// =============================================================================
// Constants
// =============================================================================

/// Name the daemon reports events under.
pub const DAEMON_NAME: &str = "modeler";

/// Time between heartbeats in continuous mode.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat timeout advertised to the hub.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum ModelerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hub error: {0}")]
    Hub(#[from] HubError),

    #[error("scheduler task failed: {0}")]
    Scheduler(#[from] tokio::task::JoinError),
}

/// The modeling daemon.
pub struct Modeler {
    config: ModelerConfig,
    service: Arc<dyn ModelerService>,
    plugins: PluginRegistry,
    clients: ClientRegistry,
}

impl std::fmt::Debug for Modeler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modeler")
            .field("config", &self.config)
            .field("plugins", &self.plugins)
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

impl Modeler {
    /// Create a daemon using the built-in plugins and clients.
    ///
    /// # Errors
    /// Returns `ModelerError::Config` if the collection or events settings are invalid.
    pub fn new(config: ModelerConfig, service: Arc<dyn ModelerService>) -> Result<Self, ModelerError> {
        config.collection.validate()?;
        config.events.validate()?;
        Ok(Self {
            config,
            service,
            plugins: PluginRegistry::with_builtins(),
            clients: ClientRegistry::with_builtins(),
        })
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_clients(mut self, clients: ClientRegistry) -> Self {
        self.clients = clients;
        self
    }

    /// Run until `shutdown` fires or, in single-pass mode, until the pass completes.
    ///
    /// Returns the report of the last completed pass.
    ///
    /// # Errors
    /// Returns `ModelerError` if the plugin filter is invalid or the scheduler task panics.
    pub async fn run(self, shutdown: CancellationToken) -> Result<Option<PassReport>, ModelerError> {
        let collection = &self.config.collection;
        let filter = collection.plugin_filter()?;

        let (forwarder, events) = spawn_pipeline(
            self.service.clone(),
            self.config.events.channel_capacity,
            self.config.events.batch_size,
            self.config.events.flush_interval,
        );

        let mut stats = DaemonStats::new(DAEMON_NAME, collection.monitor.as_str());
        let properties = configure(self.service.as_ref(), &mut stats).await;
        let mode = collection.cycle_mode(properties.modeler_cycle());
        tracing::info!(
            mode = ?mode,
            parallel = collection.parallel,
            selection = %collection.selection(),
            "Modeler configured"
        );

        let dispatcher = ProtocolDispatcher::new(
            self.plugins,
            self.clients,
            filter,
            collection.recency_gate(),
            collection.dispatch_settings(),
        );
        let (scheduler, handle) = Scheduler::new(
            collection.scheduler_config(mode),
            self.service.clone(),
            dispatcher,
        );
        let scheduler = scheduler.with_events(events.clone(), stats.clone());

        if !collection.start_delay.is_zero() {
            tracing::info!(delay = ?collection.start_delay, "Delaying first modeling pass");
            tokio::select! {
                _ = shutdown.cancelled() => {
                    finish_events(&events, forwarder).await;
                    return Ok(None);
                }
                _ = tokio::time::sleep(collection.start_delay) => {}
            }
        }

        let stop = shutdown.child_token();
        let scheduler_task = tokio::spawn(scheduler.run(stop.clone()));

        let mut background = Vec::new();
        if matches!(mode, CycleMode::Continuous(_)) {
            background.push(tokio::spawn(heartbeat_loop(
                events.clone(),
                stats.clone(),
                stop.clone(),
            )));
            background.push(tokio::spawn(config_refresh_loop(
                self.service.clone(),
                handle,
                stats,
                collection.cycle_interval.is_none(),
                properties,
                stop.clone(),
            )));
        }

        let report = scheduler_task.await;
        stop.cancel();
        for task in background {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task failed");
            }
        }
        finish_events(&events, forwarder).await;

        let report = report?;
        if let Some(report) = &report {
            tracing::info!(
                devices = report.devices,
                timed_out = report.timed_out,
                elapsed = ?report.elapsed,
                "Modeler finished"
            );
        }
        Ok(report)
    }
}

/// Fetch daemon-wide configuration from the hub, falling back to defaults.
async fn configure(service: &dyn ModelerService, stats: &mut DaemonStats) -> PropertyItems {
    tracing::debug!("Fetching daemon configuration");
    let properties = service.property_items().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unable to fetch property items, using defaults");
        PropertyItems::default()
    });
    let classes = service.threshold_classes().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unable to fetch threshold classes");
        Vec::new()
    });
    let template = service.default_command_template().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unable to fetch default command template");
        String::new()
    });
    let thresholds = service.collector_thresholds().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unable to fetch collector thresholds");
        Vec::new()
    });
    stats.configure(classes, template, thresholds);
    properties
}

async fn heartbeat_loop(events: EventWriter, stats: DaemonStats, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if events.send(stats.heartbeat(HEARTBEAT_TIMEOUT)).is_err() {
                    tracing::debug!("Heartbeat dropped");
                }
            }
        }
    }
}

/// Re-fetch daemon configuration every `config_cycle_interval` and push it to the scheduler.
async fn config_refresh_loop(
    service: Arc<dyn ModelerService>,
    handle: SchedulerHandle,
    base_stats: DaemonStats,
    adopt_hub_interval: bool,
    mut properties: PropertyItems,
    shutdown: CancellationToken,
) {
    while let Some(period) = refresh_period(&properties) {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        let mut stats = base_stats.clone();
        properties = configure(service.as_ref(), &mut stats).await;

        if adopt_hub_interval
            && handle
                .set_cycle_interval(properties.modeler_cycle())
                .await
                .is_err()
        {
            break;
        }
        if handle.update_stats(stats).await.is_err() {
            break;
        }
    }
}

/// Time until the next config refresh, or `None` when the hub disabled refreshing.
fn refresh_period(properties: &PropertyItems) -> Option<Duration> {
    let period = properties.config_cycle();
    if period.is_zero() {
        tracing::warn!("Config refresh interval is zero, periodic refresh disabled");
        return None;
    }
    Some(period)
}

async fn finish_events(events: &EventWriter, forwarder: tokio::task::JoinHandle<()>) {
    if let Err(e) = events.shutdown().await {
        tracing::warn!(error = %e, "Event pipeline already closed");
    }
    if let Err(e) = forwarder.await {
        tracing::warn!(error = %e, "Event forwarder failed");
    }
    if events.dropped_events() > 0 {
        tracing::warn!(dropped = events.dropped_events(), "Events dropped during run");
    }
}
