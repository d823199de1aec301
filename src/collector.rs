//! Collector Layer
//!
//! Everything needed to turn one device snapshot into running collection jobs:
//!
//! - [`Plugin`] / [`PluginRegistry`]: named extraction and transform units
//! - [`PluginFilter`] / [`select_plugins`]: transport and name based selection
//! - [`RecencyGate`]: skip degraded devices collected recently
//! - [`ProtocolClient`] / [`ClientRegistry`]: one collection attempt per protocol
//! - [`ProtocolDispatcher`]: builds the jobs for one device in a fixed order
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use modeler::collector::{
//!     ClientRegistry, DispatchSettings, PluginFilter, PluginRegistry, ProtocolDispatcher,
//!     RecencyGate, Transport,
//! };
//! use modeler::hub::{DeviceSnapshot, PluginDescriptor};
//!
//! let dispatcher = ProtocolDispatcher::new(
//!     PluginRegistry::with_builtins(),
//!     ClientRegistry::with_builtins(),
//!     PluginFilter::All,
//!     RecencyGate::new(Duration::ZERO),
//!     DispatchSettings::default(),
//! );
//! let device = DeviceSnapshot::new("router1", "127.0.0.1")
//!     .with_plugin(PluginDescriptor::new("portscan.TcpServices", Transport::Portscan));
//! let jobs = dispatcher.dispatch(&Arc::new(device), chrono::Utc::now());
//! assert_eq!(jobs.len(), 1);
//! ```

mod client;
mod dispatcher;
pub mod local;
mod plugin;
pub mod portscan;
mod recency;
mod selector;
mod traits;

pub use client::{
    ClientConstructor, ClientOptions, ClientRegistry, ClientRequest, DEFAULT_PORTSCAN_TIMEOUT,
};
pub use dispatcher::{
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_COMMAND_PORT, DEFAULT_COMMAND_PROTOCOL, DispatchSettings,
    DispatchedJob, ProtocolDispatcher,
};
pub use plugin::{Plugin, PluginConstructor, PluginError, PluginRegistry};
pub use recency::RecencyGate;
pub use selector::{PluginFilter, select_plugins};
pub use traits::{
    ClientOutcome, CollectorError, IpValidationError, PluginResult, Protocol, ProtocolClient,
    RawResult, Transport, is_empty_result, validate_ip_address,
};
