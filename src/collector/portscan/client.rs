//! TCP connect scan client.
//!
//! Connects to each requested port of the device's management address and reports
//! which ones accepted the connection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::collector::client::ClientRequest;
use crate::collector::plugin::Plugin;
use crate::collector::traits::{
    ClientOutcome, CollectorError, PluginResult, Protocol, ProtocolClient, validate_ip_address,
};

/// Ports scanned when a plugin names none.
pub const DEFAULT_PORTS: &[u16] = &[21, 22, 23, 25, 53, 80, 110, 143, 443, 3306, 5432, 8080];

/// Port-scan client for one device.
pub struct PortscanClient {
    device_id: String,
    ip: IpAddr,
    plugins: Vec<Arc<dyn Plugin>>,
    connect_timeout: Duration,
}

impl PortscanClient {
    /// Build a client from a request.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the management address is not an IP address.
    pub fn new(request: ClientRequest) -> Result<Self, CollectorError> {
        let ip = validate_ip_address(&request.device.manage_ip).map_err(|e| {
            CollectorError::Config(format!("device {}: {}", request.device.id, e))
        })?;
        Ok(Self {
            device_id: request.device.id.clone(),
            ip,
            plugins: request.plugins,
            connect_timeout: request.options.portscan_timeout,
        })
    }

    /// Ports requested by a plugin's `ports` parameter.
    fn ports_for(plugin: &dyn Plugin) -> Vec<u16> {
        plugin
            .params()
            .and_then(|p| p.get("ports"))
            .and_then(|p| serde_json::from_value::<Vec<u16>>(p.clone()).ok())
            .filter(|ports| !ports.is_empty())
            .unwrap_or_else(|| DEFAULT_PORTS.to_vec())
    }

    async fn probe(&self, port: u16) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect((self.ip, port))).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(device = %self.device_id, port, "Port open");
                true
            }
            Ok(Err(e)) => {
                tracing::trace!(device = %self.device_id, port, error = %e, "Port closed");
                false
            }
            Err(_) => {
                tracing::trace!(device = %self.device_id, port, timeout_ms = self.connect_timeout.as_millis() as u64, "Port probe timed out");
                false
            }
        }
    }

    async fn scan(&self, ports: &[u16]) -> Vec<u16> {
        let mut open = Vec::new();
        for &port in ports {
            if self.probe(port).await {
                open.push(port);
            }
        }
        open
    }
}

impl std::fmt::Debug for PortscanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortscanClient")
            .field("device", &self.device_id)
            .field("ip", &self.ip)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ProtocolClient for PortscanClient {
    fn protocol(&self) -> Protocol {
        Protocol::Portscan
    }

    async fn collect(&mut self, cancel: CancellationToken) -> ClientOutcome {
        let mut outcome = ClientOutcome::default();

        for plugin in &self.plugins {
            let ports = Self::ports_for(plugin.as_ref());
            let open = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(device = %self.device_id, "Port scan cancelled");
                    outcome.error = Some(CollectorError::Cancelled);
                    return outcome;
                }
                open = self.scan(&ports) => open,
            };

            tracing::debug!(device = %self.device_id, plugin = %plugin.name(), scanned = ports.len(), open = open.len(), "Port scan finished");
            outcome.results.push(PluginResult {
                plugin: Arc::clone(plugin),
                raw: Some(json!({ "open_ports": open })),
            });
        }

        outcome
    }
}
