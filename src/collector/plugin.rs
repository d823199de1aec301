//! Plugin trait and registry.
//!
//! A plugin is a named unit of protocol-specific extraction and transform logic
//! bound to one transport. Plugins are instantiated fresh per device from the
//! device's [`PluginDescriptor`]s through a [`PluginRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::local::HostResolvePlugin;
use super::portscan::TcpServicesPlugin;
use super::traits::{RawResult, Transport};
use crate::hub::{DeviceSnapshot, PluginDescriptor, UpdateDescription};

/// Errors raised by plugin instantiation and processing.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No constructor registered under this name.
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    /// Descriptor parameters are unusable.
    #[error("invalid parameters for plugin '{plugin}': {reason}")]
    InvalidParams { plugin: String, reason: String },

    /// `collect` or `process` failed.
    #[error("plugin '{plugin}' failed: {reason}")]
    Failed { plugin: String, reason: String },
}

/// Protocol-specific extraction and transform logic.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Registered name (e.g. `portscan.TcpServices`).
    fn name(&self) -> &str;

    /// Transport the plugin collects over.
    fn transport(&self) -> Transport;

    /// Descriptor parameters handed to the protocol client.
    fn params(&self) -> Option<&serde_json::Value> {
        None
    }

    /// Normalize a raw result before processing. `None` discards it.
    fn preprocess(&self, raw: RawResult) -> Option<RawResult> {
        Some(raw)
    }

    /// Turn a raw result into zero or more update descriptions.
    fn process(
        &self,
        device: &DeviceSnapshot,
        raw: RawResult,
    ) -> Result<Vec<UpdateDescription>, PluginError>;

    /// Collection step for plugins that run inside the daemon (local-script transport).
    async fn collect(&self, _device: &DeviceSnapshot) -> Result<Option<RawResult>, PluginError> {
        Ok(None)
    }
}

/// Builds a plugin from its descriptor.
pub type PluginConstructor =
    Arc<dyn Fn(&PluginDescriptor) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync>;

/// Name-to-constructor map used to instantiate plugins per device.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, PluginConstructor>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry")
            .field("plugins", &names)
            .finish()
    }
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(HostResolvePlugin::NAME, |d| {
            Ok(Arc::new(HostResolvePlugin::from_descriptor(d)?) as Arc<dyn Plugin>)
        });
        registry.register(TcpServicesPlugin::NAME, |d| {
            Ok(Arc::new(TcpServicesPlugin::from_descriptor(d)?) as Arc<dyn Plugin>)
        });
        registry
    }

    /// Register a constructor, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&PluginDescriptor) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Whether a constructor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate a fresh plugin for one device.
    ///
    /// # Errors
    /// Returns `PluginError::Unknown` if no constructor is registered under the name.
    pub fn instantiate(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>, PluginError> {
        let constructor = self
            .constructors
            .get(&descriptor.name)
            .ok_or_else(|| PluginError::Unknown(descriptor.name.clone()))?;
        constructor(descriptor)
    }
}
