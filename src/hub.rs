//! Hub Layer
//!
//! The hub is the remote configuration service that owns the device population.
//! The modeler only talks to it through [`ModelerService`]:
//!
//! - **Enumeration**: device ids by organizer path or by monitor name
//! - **Configuration**: per-device snapshots fetched once per draw
//! - **Commit**: update descriptions applied in one call per finished job
//! - **Bookkeeping**: last-collection timestamps, daemon events
//!
//! # Implementations
//!
//! - [`HttpHub`]: JSON over HTTP
//! - [`InventoryHub`]: in-memory inventory loaded from YAML, records every commit

mod error;
mod http;
mod inventory;
mod types;

use std::sync::Arc;

pub use error::HubError;
pub use http::HttpHub;
pub use inventory::{
    CollectionRecord, CommitRecord, DEFAULT_MONITOR, DEFAULT_ORGANIZER, Inventory, InventoryDevice,
    InventoryHub,
};
pub use types::{
    CollectorThreshold, DeviceSnapshot, MIN_MAX_THRESHOLD, PluginDescriptor, PropertyItems,
    UpdateDescription,
};

use crate::config::HubConfig;
use crate::events::Event;

/// Remote configuration service consumed by the scheduler and daemon.
///
/// All calls are request/response and may suspend; none of them are invoked from
/// inside the scheduler actor's own task.
#[async_trait::async_trait]
pub trait ModelerService: Send + Sync + 'static {
    /// Device ids below an organizer path (e.g. `/Devices/Server`).
    async fn device_list_by_organizer(&self, path: &str) -> Result<Vec<String>, HubError>;

    /// Device ids assigned to a collector monitor.
    async fn device_list_by_monitor(&self, monitor: &str) -> Result<Vec<String>, HubError>;

    /// Full configuration snapshots for the requested devices.
    async fn device_config(&self, ids: &[String]) -> Result<Vec<DeviceSnapshot>, HubError>;

    /// Apply update descriptions to a device. Returns whether anything changed.
    async fn apply_update_descriptions(
        &self,
        device_id: &str,
        maps: Vec<UpdateDescription>,
    ) -> Result<bool, HubError>;

    /// Record that the device has just been collected.
    async fn set_last_collection(&self, device_id: &str) -> Result<(), HubError>;

    /// Daemon-wide properties (cycle intervals).
    async fn property_items(&self) -> Result<PropertyItems, HubError>;

    /// Threshold class names known to the hub.
    async fn threshold_classes(&self) -> Result<Vec<String>, HubError>;

    /// Default command template used when creating daemon statistics.
    async fn default_command_template(&self) -> Result<String, HubError>;

    /// Thresholds applied to daemon gauges.
    async fn collector_thresholds(&self) -> Result<Vec<CollectorThreshold>, HubError>;

    /// Deliver daemon events (heartbeats, gauges, threshold violations).
    async fn send_events(&self, events: Vec<Event>) -> Result<(), HubError>;
}

/// Which part of the device population a pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// A single explicitly named device; no remote enumeration.
    Device(String),
    /// Every device below an organizer path.
    Organizer(String),
    /// Every device assigned to a monitor.
    Monitor(String),
}

impl DeviceSelection {
    /// Resolve the selection into a list of device ids.
    pub async fn resolve(&self, service: &dyn ModelerService) -> Result<Vec<String>, HubError> {
        match self {
            Self::Device(id) => {
                tracing::info!(device = %id, "Collecting for device");
                Ok(vec![id.clone()])
            }
            Self::Organizer(path) => {
                tracing::info!(path = %path, "Collecting for path");
                service.device_list_by_organizer(path).await
            }
            Self::Monitor(monitor) => {
                tracing::info!(monitor = %monitor, "Collecting for monitor");
                service.device_list_by_monitor(monitor).await
            }
        }
    }
}

impl std::fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(id) => write!(f, "device {}", id),
            Self::Organizer(path) => write!(f, "organizer {}", path),
            Self::Monitor(monitor) => write!(f, "monitor {}", monitor),
        }
    }
}

/// Build the hub client described by the configuration.
///
/// # Errors
/// Returns `HubError` if the URL is invalid or the inventory cannot be loaded.
pub fn connect(config: &HubConfig) -> Result<Arc<dyn ModelerService>, HubError> {
    match (&config.url, &config.inventory) {
        (Some(url), _) => Ok(Arc::new(HttpHub::new(url, config.request_timeout)?)),
        (None, Some(path)) => Ok(Arc::new(InventoryHub::load(path)?)),
        (None, None) => Err(HubError::Config(
            "either hub.url or hub.inventory must be set".to_string(),
        )),
    }
}
