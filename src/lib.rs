//! Modeler - Device Model Collection Library
//!
//! This crate provides the core of the `modeler` daemon: it periodically walks a
//! device population, collects configuration ("model") data from each device over
//! whichever protocols it supports, and commits the resulting update descriptions
//! to a central configuration hub.
//!
//! # Architecture
//!
//! - **Collector**: plugins, plugin selection, recency gate, protocol clients and the
//!   per-device protocol dispatcher
//! - **Scheduler**: single-owner actor holding the bounded set of in-flight jobs,
//!   deadline monitoring, result merging and the recurring collection cycle
//! - **Hub**: remote configuration service interface (HTTP and in-memory inventory)
//! - **Events**: heartbeat, gauge and threshold events forwarded to the hub
//! - **Daemon**: wires everything together and drives startup/shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use modeler::{InventoryHub, Modeler, ModelerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ModelerConfig::load("configs/modeler.yaml")?;
//! let hub = Arc::new(InventoryHub::load("configs/inventory.yaml")?);
//! let modeler = Modeler::new(config, hub)?;
//! let report = modeler.run(CancellationToken::new()).await?;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod daemon;
pub mod events;
pub mod hub;
pub mod scheduler;

pub use collector::{
    ClientOutcome, ClientRegistry, CollectorError, Plugin, PluginError, PluginFilter,
    PluginRegistry, PluginResult, Protocol, ProtocolClient, ProtocolDispatcher, RawResult,
    RecencyGate, Transport,
};
pub use config::{ConfigError, ModelerConfig};
pub use daemon::{Modeler, ModelerError};
pub use events::{DaemonStats, Event, EventKind, EventSeverity, EventWriter};
pub use hub::{
    DeviceSelection, DeviceSnapshot, HttpHub, HubError, InventoryHub, ModelerService,
    PluginDescriptor, UpdateDescription,
};
pub use scheduler::{CycleMode, PassReport, Scheduler, SchedulerConfig, SchedulerHandle};
