//! Port-scan collection.
//!
//! - [`PortscanClient`]: TCP connect scan with a per-connection timeout
//! - [`TcpServicesPlugin`]: turns open ports into an `ipservices` relationship map

mod client;
mod plugin;

pub use client::{DEFAULT_PORTS, PortscanClient};
pub use plugin::TcpServicesPlugin;
