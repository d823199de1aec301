//! Data types exchanged with the hub.
//!
//! - [`DeviceSnapshot`]: read-mostly copy of a device's configuration
//! - [`PluginDescriptor`]: names a plugin to instantiate for a device
//! - [`UpdateDescription`]: opaque change description produced by plugins
//! - [`PropertyItems`] / [`CollectorThreshold`]: daemon-level configuration

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::Transport;
use crate::events::EventSeverity;

/// Default modeling cycle interval published by the hub (minutes).
pub const DEFAULT_MODELER_CYCLE_MINUTES: u64 = 720;

/// Default configuration refresh interval (minutes).
pub const DEFAULT_CONFIG_CYCLE_MINUTES: u64 = 360;

fn default_modeler_cycle() -> u64 {
    DEFAULT_MODELER_CYCLE_MINUTES
}

fn default_config_cycle() -> u64 {
    DEFAULT_CONFIG_CYCLE_MINUTES
}

/// Names one plugin to be instantiated for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Registered plugin name (e.g. `portscan.TcpServices`).
    pub name: String,
    /// Transport the plugin collects over.
    pub transport: Transport,
    /// Plugin-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl PluginDescriptor {
    /// Create a descriptor without parameters.
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            transport,
            params: serde_json::Value::Null,
        }
    }

    /// Set plugin parameters.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Snapshot of a device's configuration, fetched once per draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device identity.
    pub id: String,
    /// Management address.
    pub manage_ip: String,
    /// Plugins configured for this device, in collection order.
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    /// Per-device client timeout (default: collection.client_timeout).
    #[serde(default, with = "humantime_serde")]
    pub client_timeout: Option<Duration>,
    /// Preferred command protocol (`ssh` or `telnet`).
    #[serde(default)]
    pub command_protocol: Option<String>,
    /// Command protocol port override.
    #[serde(default)]
    pub command_port: Option<u16>,
    /// SNMP monitoring administratively disabled.
    #[serde(default)]
    pub snmp_monitor_ignore: bool,
    /// Last successful collection time.
    #[serde(default)]
    pub last_collection: Option<DateTime<Utc>>,
    /// Current status severity counter (0 = healthy).
    #[serde(default)]
    pub status_severity: u32,
    /// Free-form properties handed to plugins.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl DeviceSnapshot {
    /// Create a snapshot with no plugins and default overrides.
    pub fn new(id: impl Into<String>, manage_ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            manage_ip: manage_ip.into(),
            plugins: Vec::new(),
            client_timeout: None,
            command_protocol: None,
            command_port: None,
            snmp_monitor_ignore: false,
            last_collection: None,
            status_severity: 0,
            properties: BTreeMap::new(),
        }
    }

    /// Add a plugin descriptor.
    pub fn with_plugin(mut self, plugin: PluginDescriptor) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Set the client timeout override.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = Some(timeout);
        self
    }

    /// Set the command protocol and port overrides.
    pub fn with_command(mut self, protocol: impl Into<String>, port: Option<u16>) -> Self {
        self.command_protocol = Some(protocol.into());
        self.command_port = port;
        self
    }

    /// Disable SNMP collection for this device.
    pub fn with_snmp_monitor_ignore(mut self, ignore: bool) -> Self {
        self.snmp_monitor_ignore = ignore;
        self
    }

    /// Set the recency bookkeeping fields.
    pub fn with_status(mut self, severity: u32, last_collection: Option<DateTime<Utc>>) -> Self {
        self.status_severity = severity;
        self.last_collection = last_collection;
        self
    }
}

/// Opaque change description produced by a plugin and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateDescription(serde_json::Value);

impl UpdateDescription {
    /// Wrap a JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume and return the underlying JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Whether this description carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        crate::collector::is_empty_result(&self.0)
    }
}

/// Daemon-wide properties published by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyItems {
    /// Minutes between modeling passes.
    #[serde(default = "default_modeler_cycle")]
    pub modeler_cycle_interval: u64,
    /// Minutes between configuration refreshes.
    #[serde(default = "default_config_cycle")]
    pub config_cycle_interval: u64,
}

impl Default for PropertyItems {
    fn default() -> Self {
        Self {
            modeler_cycle_interval: DEFAULT_MODELER_CYCLE_MINUTES,
            config_cycle_interval: DEFAULT_CONFIG_CYCLE_MINUTES,
        }
    }
}

impl PropertyItems {
    /// Modeling pass interval as a duration.
    pub fn modeler_cycle(&self) -> Duration {
        Duration::from_secs(self.modeler_cycle_interval * 60)
    }

    /// Configuration refresh interval as a duration.
    pub fn config_cycle(&self) -> Duration {
        Duration::from_secs(self.config_cycle_interval * 60)
    }
}

/// Threshold evaluated against a daemon gauge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorThreshold {
    /// Gauge name (e.g. `cycleTime`).
    pub metric: String,
    /// Threshold class; evaluated only when the hub lists it in `threshold_classes`.
    #[serde(default = "default_threshold_class")]
    pub class: String,
    /// Lowest acceptable value.
    #[serde(default)]
    pub min: Option<f64>,
    /// Highest acceptable value.
    #[serde(default)]
    pub max: Option<f64>,
    /// Severity of the violation event.
    #[serde(default = "default_threshold_severity")]
    pub severity: EventSeverity,
}

/// Class of plain min/max thresholds.
pub const MIN_MAX_THRESHOLD: &str = "MinMaxThreshold";

fn default_threshold_class() -> String {
    MIN_MAX_THRESHOLD.to_string()
}

fn default_threshold_severity() -> EventSeverity {
    EventSeverity::Warn
}
