//! Configuration module for the modeler daemon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Hub settings (HTTP URL or local inventory file)
//! - Collection settings (parallelism, cycle interval, plugin filters, timeouts)
//! - Event pipeline settings (channel capacity, batching)

mod app;
mod validation;

pub use app::{CollectionConfig, EventsConfig, HubConfig, ModelerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
};
