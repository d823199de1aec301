//! Protocol client registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::local::LocalClient;
use super::plugin::Plugin;
use super::portscan::PortscanClient;
use super::traits::{CollectorError, Protocol, ProtocolClient};
use crate::hub::DeviceSnapshot;

/// Default per-connection timeout of the port-scan client.
pub const DEFAULT_PORTSCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon-wide client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub portscan_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            portscan_timeout: DEFAULT_PORTSCAN_TIMEOUT,
        }
    }
}

/// Everything needed to build one client for one device.
#[derive(Clone)]
pub struct ClientRequest {
    pub device: Arc<DeviceSnapshot>,
    pub protocol: Protocol,
    /// Selected plugins, in collection order.
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Remote port for command protocols.
    pub port: Option<u16>,
    pub options: ClientOptions,
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRequest")
            .field("device", &self.device.id)
            .field("protocol", &self.protocol)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("port", &self.port)
            .finish()
    }
}

/// Builds a protocol client from a request.
pub type ClientConstructor =
    Arc<dyn Fn(ClientRequest) -> Result<Box<dyn ProtocolClient>, CollectorError> + Send + Sync>;

/// Protocol-to-constructor map consulted by the dispatcher.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    constructors: HashMap<Protocol, ClientConstructor>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut protocols: Vec<_> = self.constructors.keys().map(|p| p.as_ref()).collect();
        protocols.sort_unstable();
        f.debug_struct("ClientRegistry")
            .field("protocols", &protocols)
            .finish()
    }
}

impl ClientRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local-script and port-scan clients.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::Python, |req| {
            Ok(Box::new(LocalClient::new(req)) as Box<dyn ProtocolClient>)
        });
        registry.register(Protocol::Portscan, |req| {
            Ok(Box::new(PortscanClient::new(req)?) as Box<dyn ProtocolClient>)
        });
        registry
    }

    /// Register a constructor, replacing any previous one for the protocol.
    pub fn register<F>(&mut self, protocol: Protocol, constructor: F)
    where
        F: Fn(ClientRequest) -> Result<Box<dyn ProtocolClient>, CollectorError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(protocol, Arc::new(constructor));
    }

    pub fn supports(&self, protocol: Protocol) -> bool {
        self.constructors.contains_key(&protocol)
    }

    /// Build a client for the request.
    ///
    /// # Errors
    /// Returns `CollectorError::Unsupported` if no constructor is registered, or
    /// whatever the constructor reports.
    pub fn build(&self, request: ClientRequest) -> Result<Box<dyn ProtocolClient>, CollectorError> {
        let constructor = self
            .constructors
            .get(&request.protocol)
            .ok_or(CollectorError::Unsupported(request.protocol))?;
        constructor(request)
    }
}
