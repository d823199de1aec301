//! Daemon configuration structures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{
    ConfigError, expand_env_vars, require_nonzero, require_positive, validate_hub_url,
    validate_organizer,
};
use crate::collector::{
    ClientOptions, DEFAULT_CLIENT_TIMEOUT, DEFAULT_COMMAND_PORT, DEFAULT_COMMAND_PROTOCOL,
    DEFAULT_PORTSCAN_TIMEOUT, DispatchSettings, PluginFilter, Protocol, RecencyGate,
};
use crate::hub::{DEFAULT_MONITOR, DEFAULT_ORGANIZER, DeviceSelection};
use crate::scheduler::{
    CycleMode, DEFAULT_BACKLOG_THRESHOLD, DEFAULT_MAILBOX_CAPACITY, DEFAULT_STOP_GRACE,
    SchedulerConfig,
};

// =============================================================================
// Constants
// =============================================================================

/// Default hub request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default event channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default number of events shipped per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default event flush interval (5 seconds).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_parallel() -> usize {
    1
}

fn default_client_timeout() -> Duration {
    DEFAULT_CLIENT_TIMEOUT
}

fn default_command_protocol() -> String {
    DEFAULT_COMMAND_PROTOCOL.to_string()
}

fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}

fn default_portscan_timeout() -> Duration {
    DEFAULT_PORTSCAN_TIMEOUT
}

fn default_stop_grace() -> Duration {
    DEFAULT_STOP_GRACE
}

fn default_backlog_threshold() -> usize {
    DEFAULT_BACKLOG_THRESHOLD
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_monitor() -> String {
    DEFAULT_MONITOR.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

// =============================================================================
// Hub Configuration
// =============================================================================

/// Where the configuration hub lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base URL of the HTTP hub. Supports `${VAR}` expansion.
    #[serde(default)]
    pub url: Option<String>,

    /// YAML inventory file served in-process instead of a remote hub.
    #[serde(default)]
    pub inventory: Option<PathBuf>,

    /// Per-request timeout for the HTTP hub (default: 30s).
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: None,
            inventory: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Collection Configuration
// =============================================================================

/// Scheduling and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Maximum device draws in flight (default: 1).
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Time between passes. Unset adopts the hub's interval; zero runs one pass.
    #[serde(default, with = "humantime_serde")]
    pub cycle_interval: Option<Duration>,

    /// Degraded devices collected within this window are skipped (default: 0s).
    #[serde(default, with = "humantime_serde")]
    pub recency_window: Duration,

    /// Only plugins matching this pattern run.
    #[serde(default)]
    pub collect: Option<String>,

    /// Plugins matching this pattern never run.
    #[serde(default)]
    pub ignore: Option<String>,

    /// Default per-job deadline (default: 180s).
    #[serde(default = "default_client_timeout", with = "humantime_serde")]
    pub client_timeout: Duration,

    /// Default command protocol, `ssh` or `telnet`.
    #[serde(default = "default_command_protocol")]
    pub command_protocol: String,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    #[serde(default = "default_portscan_timeout", with = "humantime_serde")]
    pub portscan_timeout: Duration,

    /// Protocols never dispatched.
    #[serde(default)]
    pub disabled_protocols: Vec<Protocol>,

    /// Time a cancelled client may keep running before it is abandoned (default: 5s).
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Mailbox depth at which new draws pause.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,

    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Delay before the first pass.
    #[serde(default, with = "humantime_serde")]
    pub start_delay: Duration,

    /// Monitor this daemon runs on (default: "localhost").
    #[serde(default = "default_monitor")]
    pub monitor: String,

    /// Select devices by monitor instead of organizer path.
    #[serde(default)]
    pub select_by_monitor: bool,

    /// Organizer path (default: "/Devices" when no device is named).
    #[serde(default)]
    pub path: Option<String>,

    /// Collect a single device, then exit.
    #[serde(default)]
    pub device: Option<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            cycle_interval: None,
            recency_window: Duration::ZERO,
            collect: None,
            ignore: None,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            command_protocol: default_command_protocol(),
            command_port: DEFAULT_COMMAND_PORT,
            portscan_timeout: DEFAULT_PORTSCAN_TIMEOUT,
            disabled_protocols: Vec::new(),
            stop_grace: DEFAULT_STOP_GRACE,
            backlog_threshold: DEFAULT_BACKLOG_THRESHOLD,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            start_delay: Duration::ZERO,
            monitor: default_monitor(),
            select_by_monitor: false,
            path: None,
            device: None,
        }
    }
}

impl CollectionConfig {
    /// Which devices a pass covers.
    pub fn selection(&self) -> DeviceSelection {
        if let Some(device) = &self.device {
            DeviceSelection::Device(device.clone())
        } else if self.select_by_monitor {
            DeviceSelection::Monitor(self.monitor.clone())
        } else {
            DeviceSelection::Organizer(
                self.path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ORGANIZER.to_string()),
            )
        }
    }

    /// Cycle mode given the interval to use when none is configured locally.
    ///
    /// A zero interval, local or from the hub, means a single pass.
    pub fn cycle_mode(&self, hub_interval: Duration) -> CycleMode {
        if self.device.is_some() {
            return CycleMode::SinglePass;
        }
        match self.cycle_interval.unwrap_or(hub_interval) {
            interval if interval.is_zero() => CycleMode::SinglePass,
            interval => CycleMode::Continuous(interval),
        }
    }

    /// Include/exclude plugin filter.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if both patterns are set or one is invalid.
    pub fn plugin_filter(&self) -> Result<PluginFilter, ConfigError> {
        PluginFilter::new(self.collect.as_deref(), self.ignore.as_deref())
    }

    pub fn recency_gate(&self) -> RecencyGate {
        RecencyGate::new(self.recency_window)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            client_timeout: self.client_timeout,
            command_protocol: self.command_protocol.clone(),
            command_port: self.command_port,
            disabled: self.disabled_protocols.iter().copied().collect::<HashSet<_>>(),
            client_options: ClientOptions {
                portscan_timeout: self.portscan_timeout,
            },
        }
    }

    /// Validate scheduling and dispatch settings.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("collection parallel", self.parallel)?;
        require_positive("collection backlog_threshold", self.backlog_threshold)?;
        require_positive("collection mailbox_capacity", self.mailbox_capacity)?;
        require_nonzero("collection client_timeout", self.client_timeout)?;
        if let Some(path) = &self.path {
            validate_organizer(path)?;
        }
        self.plugin_filter()?;
        Ok(())
    }

    pub fn scheduler_config(&self, mode: CycleMode) -> SchedulerConfig {
        SchedulerConfig::new(self.selection(), mode)
            .with_parallel(self.parallel)
            .with_stop_grace(self.stop_grace)
            .with_backlog_threshold(self.backlog_threshold)
            .with_mailbox_capacity(self.mailbox_capacity)
    }
}

// =============================================================================
// Events Configuration
// =============================================================================

/// Event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Writer channel capacity (default: 10000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Events per shipment (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum age of a buffered event (default: 5s).
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl EventsConfig {
    /// # Errors
    /// Returns `ConfigError::ValidationError` on a zero capacity or batch size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("events channel_capacity", self.channel_capacity)?;
        require_positive("events batch_size", self.batch_size)?;
        Ok(())
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

// =============================================================================
// Daemon Configuration
// =============================================================================

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelerConfig {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

impl ModelerConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file without validating it, for callers that apply overrides first.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse YAML text without validating it.
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` on malformed YAML.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        if let Some(url) = &config.hub.url {
            config.hub.url = Some(expand_env_vars(url));
        }
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.hub.url, &self.hub.inventory) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "only one of hub.url and hub.inventory may be set".to_string(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "either hub.url or hub.inventory must be set".to_string(),
                ));
            }
            (Some(url), None) => {
                validate_hub_url(url)?;
            }
            (None, Some(_)) => {}
        }

        self.collection.validate()?;
        self.events.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_inventory(yaml: &str) -> ModelerConfig {
        let mut config = ModelerConfig::from_yaml(yaml).unwrap();
        config.hub.inventory = Some(PathBuf::from("inventory.yaml"));
        config
    }

    #[test]
    fn test_defaults() {
        let config = with_inventory("{}");
        assert!(config.validate().is_ok());
        assert_eq!(config.collection.parallel, 1);
        assert_eq!(config.collection.client_timeout, Duration::from_secs(180));
        assert_eq!(config.collection.command_protocol, "ssh");
        assert_eq!(config.collection.command_port, 22);
        assert_eq!(config.hub.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.events.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(
            config.collection.selection(),
            DeviceSelection::Organizer("/Devices".to_string())
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
hub:
  url: http://hub.example:8080/api
  request_timeout: 10s
collection:
  parallel: 4
  cycle_interval: 12m
  recency_window: 10m
  ignore: "^snmp\\."
  disabled_protocols: [wmi, telnet]
  monitor: collector2
  select_by_monitor: true
events:
  flush_interval: 1s
"#
        )
        .unwrap();

        let config = ModelerConfig::load(file.path()).unwrap();
        assert_eq!(config.hub.request_timeout, Duration::from_secs(10));
        assert_eq!(config.collection.parallel, 4);
        assert_eq!(
            config.collection.cycle_mode(Duration::from_secs(60)),
            CycleMode::Continuous(Duration::from_secs(720))
        );
        assert_eq!(
            config.collection.selection(),
            DeviceSelection::Monitor("collector2".to_string())
        );
        let settings = config.collection.dispatch_settings();
        assert!(settings.disabled.contains(&Protocol::Wmi));
        assert!(settings.disabled.contains(&Protocol::Telnet));
        assert_eq!(config.events.flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_cycle_mode() {
        let mut collection = CollectionConfig::default();
        let hub = Duration::from_secs(720 * 60);
        assert_eq!(collection.cycle_mode(hub), CycleMode::Continuous(hub));
        assert_eq!(collection.cycle_mode(Duration::ZERO), CycleMode::SinglePass);

        collection.cycle_interval = Some(Duration::from_secs(60));
        assert_eq!(
            collection.cycle_mode(Duration::ZERO),
            CycleMode::Continuous(Duration::from_secs(60))
        );

        collection.cycle_interval = Some(Duration::ZERO);
        assert_eq!(collection.cycle_mode(hub), CycleMode::SinglePass);

        collection.cycle_interval = Some(Duration::from_secs(60));
        collection.device = Some("router1".to_string());
        assert_eq!(collection.cycle_mode(hub), CycleMode::SinglePass);
        assert_eq!(
            collection.selection(),
            DeviceSelection::Device("router1".to_string())
        );
    }

    #[test]
    fn test_validation_hub_target() {
        let config = ModelerConfig::default();
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("hub.url or hub.inventory")
        );

        let mut config = with_inventory("{}");
        config.hub.url = Some("http://hub".to_string());
        assert!(config.validate().is_err());

        let mut config = ModelerConfig::default();
        config.hub.url = Some("not a url".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("invalid hub url"));
    }

    #[test]
    fn test_validation_zero_parallel() {
        let mut config = with_inventory("{}");
        config.collection.parallel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_relative_path() {
        let config = with_inventory("collection:\n  path: Devices/Server\n");
        assert!(config.validate().unwrap_err().to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_validation_both_filters() {
        let config = with_inventory("collection:\n  collect: a\n  ignore: b\n");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only one of collect and ignore"));
    }

    #[test]
    fn test_hub_url_env_expansion() {
        // SAFETY: test-specific variable.
        unsafe {
            std::env::set_var("MODELER_TEST_HUB_HOST", "hub.internal");
        }
        let config =
            ModelerConfig::from_yaml("hub:\n  url: http://${MODELER_TEST_HUB_HOST}:8080\n")
                .unwrap();
        assert_eq!(config.hub.url.as_deref(), Some("http://hub.internal:8080"));
        // SAFETY: cleanup.
        unsafe {
            std::env::remove_var("MODELER_TEST_HUB_HOST");
        }
    }
}
