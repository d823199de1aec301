//! In-process client for the local-script transport.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collector::client::ClientRequest;
use crate::collector::plugin::Plugin;
use crate::collector::traits::{
    ClientOutcome, CollectorError, PluginResult, Protocol, ProtocolClient,
};
use crate::hub::DeviceSnapshot;

/// Runs each plugin's `collect` step in order inside the daemon.
pub struct LocalClient {
    device: Arc<DeviceSnapshot>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl LocalClient {
    pub fn new(request: ClientRequest) -> Self {
        Self {
            device: request.device,
            plugins: request.plugins,
        }
    }
}

impl std::fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClient")
            .field("device", &self.device.id)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl ProtocolClient for LocalClient {
    fn protocol(&self) -> Protocol {
        Protocol::Python
    }

    async fn collect(&mut self, cancel: CancellationToken) -> ClientOutcome {
        let mut outcome = ClientOutcome::default();

        for plugin in &self.plugins {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(device = %self.device.id, plugin = %plugin.name(), "Local collection cancelled");
                    outcome.error = Some(CollectorError::Cancelled);
                    return outcome;
                }
                result = plugin.collect(&self.device) => result,
            };

            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(device = %self.device.id, plugin = %plugin.name(), error = %e, "Local plugin collection failed");
                    None
                }
            };
            outcome.results.push(PluginResult {
                plugin: Arc::clone(plugin),
                raw,
            });
        }

        outcome
    }
}
