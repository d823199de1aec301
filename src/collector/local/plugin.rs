//! `local.HostResolve`: resolve a device's management address.

use std::collections::BTreeSet;

use serde_json::json;

use crate::collector::plugin::{Plugin, PluginError};
use crate::collector::traits::{RawResult, Transport};
use crate::hub::{DeviceSnapshot, PluginDescriptor, UpdateDescription};

/// Resolves the management address and reports every address it maps to.
#[derive(Debug, Clone)]
pub struct HostResolvePlugin {
    params: serde_json::Value,
}

impl HostResolvePlugin {
    pub const NAME: &'static str = "local.HostResolve";

    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Result<Self, PluginError> {
        Ok(Self {
            params: descriptor.params.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Plugin for HostResolvePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transport(&self) -> Transport {
        Transport::Python
    }

    fn params(&self) -> Option<&serde_json::Value> {
        (!self.params.is_null()).then_some(&self.params)
    }

    async fn collect(&self, device: &DeviceSnapshot) -> Result<Option<RawResult>, PluginError> {
        let addrs = tokio::net::lookup_host((device.manage_ip.as_str(), 0))
            .await
            .map_err(|e| PluginError::Failed {
                plugin: Self::NAME.to_string(),
                reason: format!("cannot resolve '{}': {}", device.manage_ip, e),
            })?;
        let addresses: BTreeSet<String> = addrs.map(|a| a.ip().to_string()).collect();
        Ok(Some(json!({ "addresses": addresses })))
    }

    fn preprocess(&self, raw: RawResult) -> Option<RawResult> {
        // Keep only results that actually list addresses
        raw.get("addresses")
            .and_then(|a| a.as_array())
            .is_some_and(|a| !a.is_empty())
            .then_some(raw)
    }

    fn process(
        &self,
        _device: &DeviceSnapshot,
        raw: RawResult,
    ) -> Result<Vec<UpdateDescription>, PluginError> {
        let addresses = raw
            .get("addresses")
            .cloned()
            .ok_or_else(|| PluginError::Failed {
                plugin: Self::NAME.to_string(),
                reason: "missing addresses".to_string(),
            })?;
        Ok(vec![UpdateDescription::new(json!({
            "modname": Self::NAME,
            "compname": "",
            "data": { "ip_addresses": addresses },
        }))])
    }
}
