//! Local-script collection: plugins that run inside the daemon.
//!
//! - [`LocalClient`]: runs each plugin's own `collect` step in-process
//! - [`HostResolvePlugin`]: resolves the device's management address

mod client;
mod plugin;

pub use client::LocalClient;
pub use plugin::HostResolvePlugin;
