//! In-memory hub backed by a YAML inventory.
//!
//! Serves device lists and snapshots from the inventory and records every
//! commit, last-collection timestamp and event it receives. Used for offline
//! runs and as the hub in integration tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    CollectorThreshold, DeviceSnapshot, HubError, ModelerService, PropertyItems,
    UpdateDescription,
};
use crate::events::Event;

/// Organizer assigned to devices that do not name one.
pub const DEFAULT_ORGANIZER: &str = "/Devices";

/// Monitor assigned to devices that do not name one.
pub const DEFAULT_MONITOR: &str = "localhost";

fn default_organizer() -> String {
    DEFAULT_ORGANIZER.to_string()
}

fn default_monitor() -> String {
    DEFAULT_MONITOR.to_string()
}

/// One device entry in the inventory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDevice {
    /// Device configuration served by `device_config`.
    #[serde(flatten)]
    pub snapshot: DeviceSnapshot,
    /// Organizer path the device lives under.
    #[serde(default = "default_organizer")]
    pub organizer: String,
    /// Collector monitor the device is assigned to.
    #[serde(default = "default_monitor")]
    pub monitor: String,
}

impl From<DeviceSnapshot> for InventoryDevice {
    fn from(snapshot: DeviceSnapshot) -> Self {
        Self {
            snapshot,
            organizer: default_organizer(),
            monitor: default_monitor(),
        }
    }
}

/// Inventory file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub devices: Vec<InventoryDevice>,
    #[serde(default)]
    pub properties: PropertyItems,
    #[serde(default)]
    pub threshold_classes: Vec<String>,
    #[serde(default)]
    pub command_template: String,
    #[serde(default)]
    pub thresholds: Vec<CollectorThreshold>,
}

/// One `apply_update_descriptions` call as seen by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub device_id: String,
    pub maps: Vec<UpdateDescription>,
    pub changed: bool,
}

/// One `set_last_collection` call as seen by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub device_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    inventory: Inventory,
    stored: HashMap<String, Vec<UpdateDescription>>,
    commits: Vec<CommitRecord>,
    collections: Vec<CollectionRecord>,
    events: Vec<Event>,
    failing_commits: HashSet<String>,
}

/// Hub implementation serving an in-memory [`Inventory`].
#[derive(Debug, Default)]
pub struct InventoryHub {
    state: RwLock<State>,
}

impl InventoryHub {
    /// Create a hub serving the given inventory.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            state: RwLock::new(State {
                inventory,
                ..State::default()
            }),
        }
    }

    /// Create a hub with default organizer/monitor for every device.
    pub fn from_devices(devices: Vec<DeviceSnapshot>) -> Self {
        Self::new(Inventory {
            devices: devices.into_iter().map(InventoryDevice::from).collect(),
            ..Inventory::default()
        })
    }

    /// Load an inventory from a YAML file.
    ///
    /// # Errors
    /// Returns `HubError::Io` or `HubError::Yaml` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let inventory: Inventory = serde_yaml::from_str(&content)?;
        tracing::info!(
            path = %path.as_ref().display(),
            devices = inventory.devices.len(),
            "Inventory loaded"
        );
        Ok(Self::new(inventory))
    }

    /// Replace the published property items; seen by the next config refresh.
    pub async fn set_properties(&self, properties: PropertyItems) {
        self.state.write().await.inventory.properties = properties;
    }

    /// Replace the published collector thresholds.
    pub async fn set_thresholds(&self, thresholds: Vec<CollectorThreshold>) {
        self.state.write().await.inventory.thresholds = thresholds;
    }

    /// Make every commit for `device_id` fail.
    pub async fn fail_commits_for(&self, device_id: impl Into<String>) {
        self.state.write().await.failing_commits.insert(device_id.into());
    }

    /// All commits received so far, in arrival order.
    pub async fn commits(&self) -> Vec<CommitRecord> {
        self.state.read().await.commits.clone()
    }

    /// All last-collection records received so far, in arrival order.
    pub async fn collections(&self) -> Vec<CollectionRecord> {
        self.state.read().await.collections.clone()
    }

    /// All events received so far, in arrival order.
    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Current snapshot of a device, including recorded collection times.
    pub async fn device(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.state
            .read()
            .await
            .inventory
            .devices
            .iter()
            .find(|d| d.snapshot.id == device_id)
            .map(|d| d.snapshot.clone())
    }
}

fn under_organizer(organizer: &str, path: &str) -> bool {
    let path = path.trim_end_matches('/');
    organizer == path
        || organizer
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait::async_trait]
impl ModelerService for InventoryHub {
    async fn device_list_by_organizer(&self, path: &str) -> Result<Vec<String>, HubError> {
        let state = self.state.read().await;
        Ok(state
            .inventory
            .devices
            .iter()
            .filter(|d| under_organizer(&d.organizer, path))
            .map(|d| d.snapshot.id.clone())
            .collect())
    }

    async fn device_list_by_monitor(&self, monitor: &str) -> Result<Vec<String>, HubError> {
        let state = self.state.read().await;
        Ok(state
            .inventory
            .devices
            .iter()
            .filter(|d| d.monitor == monitor)
            .map(|d| d.snapshot.id.clone())
            .collect())
    }

    async fn device_config(&self, ids: &[String]) -> Result<Vec<DeviceSnapshot>, HubError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .inventory
                    .devices
                    .iter()
                    .find(|d| &d.snapshot.id == id)
                    .map(|d| d.snapshot.clone())
            })
            .collect())
    }

    async fn apply_update_descriptions(
        &self,
        device_id: &str,
        maps: Vec<UpdateDescription>,
    ) -> Result<bool, HubError> {
        let mut state = self.state.write().await;
        if !state.inventory.devices.iter().any(|d| d.snapshot.id == device_id) {
            return Err(HubError::UnknownDevice(device_id.to_string()));
        }
        if state.failing_commits.contains(device_id) {
            return Err(HubError::Status {
                endpoint: format!("devices/{}/maps", device_id),
                status: 500,
            });
        }

        let changed = state.stored.get(device_id) != Some(&maps);
        state.stored.insert(device_id.to_string(), maps.clone());
        state.commits.push(CommitRecord {
            device_id: device_id.to_string(),
            maps,
            changed,
        });
        Ok(changed)
    }

    async fn set_last_collection(&self, device_id: &str) -> Result<(), HubError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let device = state
            .inventory
            .devices
            .iter_mut()
            .find(|d| d.snapshot.id == device_id)
            .ok_or_else(|| HubError::UnknownDevice(device_id.to_string()))?;
        device.snapshot.last_collection = Some(now);
        state.collections.push(CollectionRecord {
            device_id: device_id.to_string(),
            at: now,
        });
        Ok(())
    }

    async fn property_items(&self) -> Result<PropertyItems, HubError> {
        Ok(self.state.read().await.inventory.properties.clone())
    }

    async fn threshold_classes(&self) -> Result<Vec<String>, HubError> {
        Ok(self.state.read().await.inventory.threshold_classes.clone())
    }

    async fn default_command_template(&self) -> Result<String, HubError> {
        Ok(self.state.read().await.inventory.command_template.clone())
    }

    async fn collector_thresholds(&self) -> Result<Vec<CollectorThreshold>, HubError> {
        Ok(self.state.read().await.inventory.thresholds.clone())
    }

    async fn send_events(&self, events: Vec<Event>) -> Result<(), HubError> {
        self.state.write().await.events.extend(events);
        Ok(())
    }
}
