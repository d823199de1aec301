//! `portscan.TcpServices`: open TCP ports as IP service components.

use serde_json::json;

use crate::collector::plugin::{Plugin, PluginError};
use crate::collector::traits::{RawResult, Transport};
use crate::hub::{DeviceSnapshot, PluginDescriptor, UpdateDescription};

/// Maps a port scan result to one `ipservices` relationship map.
#[derive(Debug, Clone)]
pub struct TcpServicesPlugin {
    params: serde_json::Value,
}

impl TcpServicesPlugin {
    pub const NAME: &'static str = "portscan.TcpServices";

    /// Build the plugin, checking that `ports` (if given) is a list of port numbers.
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Result<Self, PluginError> {
        if let Some(ports) = descriptor.params.get("ports")
            && serde_json::from_value::<Vec<u16>>(ports.clone()).is_err()
        {
            return Err(PluginError::InvalidParams {
                plugin: Self::NAME.to_string(),
                reason: format!("ports must be a list of port numbers, got {}", ports),
            });
        }
        Ok(Self {
            params: descriptor.params.clone(),
        })
    }
}

impl Plugin for TcpServicesPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transport(&self) -> Transport {
        Transport::Portscan
    }

    fn params(&self) -> Option<&serde_json::Value> {
        (!self.params.is_null()).then_some(&self.params)
    }

    fn process(
        &self,
        _device: &DeviceSnapshot,
        raw: RawResult,
    ) -> Result<Vec<UpdateDescription>, PluginError> {
        let ports: Vec<u16> = raw
            .get("open_ports")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PluginError::Failed {
                plugin: Self::NAME.to_string(),
                reason: format!("malformed scan result: {}", e),
            })?
            .unwrap_or_default();

        let objmaps: Vec<_> = ports
            .iter()
            .map(|port| {
                json!({
                    "id": format!("tcp_{:05}", port),
                    "port": port,
                    "protocol": "tcp",
                })
            })
            .collect();

        // An empty relationship map still clears services that have gone away
        Ok(vec![UpdateDescription::new(json!({
            "modname": Self::NAME,
            "compname": "os",
            "relname": "ipservices",
            "objmaps": objmaps,
        }))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_ports_param() {
        let descriptor = PluginDescriptor::new(TcpServicesPlugin::NAME, Transport::Portscan)
            .with_params(json!({"ports": ["http"]}));
        let err = TcpServicesPlugin::from_descriptor(&descriptor).unwrap_err();
        assert!(matches!(err, PluginError::InvalidParams { .. }));
    }

    #[test]
    fn test_process_relationship_map() {
        let plugin = TcpServicesPlugin::from_descriptor(&PluginDescriptor::new(
            TcpServicesPlugin::NAME,
            Transport::Portscan,
        ))
        .unwrap();
        let device = DeviceSnapshot::new("sw1", "10.0.0.2");

        let maps = plugin
            .process(&device, json!({"open_ports": [22, 443]}))
            .unwrap();
        assert_eq!(maps.len(), 1);
        let map = maps[0].as_value();
        assert_eq!(map["relname"], "ipservices");
        assert_eq!(map["objmaps"][0]["id"], "tcp_00022");
        assert_eq!(map["objmaps"][1]["port"], 443);
    }

    #[test]
    fn test_process_malformed() {
        let plugin = TcpServicesPlugin::from_descriptor(&PluginDescriptor::new(
            TcpServicesPlugin::NAME,
            Transport::Portscan,
        ))
        .unwrap();
        let device = DeviceSnapshot::new("sw1", "10.0.0.2");
        assert!(plugin.process(&device, json!({"open_ports": "22"})).is_err());
    }
}
