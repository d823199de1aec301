//! Per-device protocol dispatch.
//!
//! For one device, tries each protocol category in a fixed order and builds one
//! client per category that has applicable plugins and passes the checks:
//!
//! | Order | Category     | Recency gate | Extra check                  |
//! |-------|--------------|--------------|------------------------------|
//! | 1     | WMI          | yes          |                              |
//! | 2     | local-script | yes          |                              |
//! | 3     | command      | **no**       | protocol must be ssh/telnet  |
//! | 4     | SNMP         | yes          | SNMP monitoring not disabled |
//! | 5     | port-scan    | yes          |                              |

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::client::{ClientOptions, ClientRegistry, ClientRequest};
use super::plugin::PluginRegistry;
use super::recency::RecencyGate;
use super::selector::{PluginFilter, select_plugins};
use super::traits::{Protocol, ProtocolClient, Transport};
use crate::hub::DeviceSnapshot;

/// Default per-device client timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(180);

/// Default command protocol.
pub const DEFAULT_COMMAND_PROTOCOL: &str = "ssh";

/// Default command port.
pub const DEFAULT_COMMAND_PORT: u16 = 22;

const TELNET_PORT: u16 = 23;

const DISPATCH_ORDER: [Transport; 5] = [
    Transport::Wmi,
    Transport::Python,
    Transport::Command,
    Transport::Snmp,
    Transport::Portscan,
];

/// Dispatch settings taken from the collection configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub client_timeout: Duration,
    pub command_protocol: String,
    pub command_port: u16,
    pub disabled: HashSet<Protocol>,
    pub client_options: ClientOptions,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            command_protocol: DEFAULT_COMMAND_PROTOCOL.to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            disabled: HashSet::new(),
            client_options: ClientOptions::default(),
        }
    }
}

/// A client ready to be registered and started.
pub struct DispatchedJob {
    pub protocol: Protocol,
    pub plugins: Vec<String>,
    pub client: Box<dyn ProtocolClient>,
    /// Time the job may run before it is evicted.
    pub timeout: Duration,
}

impl std::fmt::Debug for DispatchedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchedJob")
            .field("protocol", &self.protocol)
            .field("plugins", &self.plugins)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builds the collection jobs for one device.
#[derive(Debug, Clone)]
pub struct ProtocolDispatcher {
    plugins: PluginRegistry,
    clients: ClientRegistry,
    filter: PluginFilter,
    gate: RecencyGate,
    settings: DispatchSettings,
}

impl ProtocolDispatcher {
    pub fn new(
        plugins: PluginRegistry,
        clients: ClientRegistry,
        filter: PluginFilter,
        gate: RecencyGate,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            plugins,
            clients,
            filter,
            gate,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Build zero or more jobs for `device`, in dispatch order.
    ///
    /// Failures are logged and skip only the affected protocol.
    pub fn dispatch(&self, device: &Arc<DeviceSnapshot>, now: DateTime<Utc>) -> Vec<DispatchedJob> {
        let timeout = device.client_timeout.unwrap_or(self.settings.client_timeout);
        let mut jobs = Vec::new();

        for transport in DISPATCH_ORDER {
            let fixed = match transport {
                Transport::Command => None,
                Transport::Wmi => Some(Protocol::Wmi),
                Transport::Python => Some(Protocol::Python),
                Transport::Snmp => Some(Protocol::Snmp),
                Transport::Portscan => Some(Protocol::Portscan),
            };
            if let Some(protocol) = fixed
                && self.is_disabled(device, protocol)
            {
                continue;
            }

            let plugins = match select_plugins(
                &self.plugins,
                &device.plugins,
                transport,
                &self.filter,
            ) {
                Ok(plugins) => plugins,
                Err(e) => {
                    tracing::warn!(device = %device.id, %transport, error = %e, "Unable to create client");
                    continue;
                }
            };
            if plugins.is_empty() {
                tracing::info!(device = %device.id, %transport, "No plugins found");
                continue;
            }

            // Command protocol resolves after plugin selection
            let (protocol, port) = match fixed {
                Some(protocol) => (protocol, None),
                None => match self.command_protocol(device) {
                    Some(selected) if !self.is_disabled(device, selected.0) => selected,
                    _ => continue,
                },
            };

            if transport == Transport::Snmp && device.snmp_monitor_ignore {
                tracing::info!(device = %device.id, "SNMP monitoring off");
                continue;
            }

            if transport != Transport::Command && self.gate.skip_device(device, now) {
                tracing::info!(device = %device.id, %protocol, "Skipped collection, device recently collected and degraded");
                continue;
            }

            let names: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
            let request = ClientRequest {
                device: Arc::clone(device),
                protocol,
                plugins,
                port,
                options: self.settings.client_options.clone(),
            };
            match self.clients.build(request) {
                Ok(client) => {
                    tracing::info!(device = %device.id, %protocol, plugins = %names.join(", "), "Collection client created");
                    jobs.push(DispatchedJob {
                        protocol,
                        plugins: names,
                        client,
                        timeout,
                    });
                }
                Err(e) => {
                    tracing::warn!(device = %device.id, %protocol, error = %e, "Unable to create client");
                }
            }
        }

        jobs
    }

    fn is_disabled(&self, device: &DeviceSnapshot, protocol: Protocol) -> bool {
        let disabled = self.settings.disabled.contains(&protocol);
        if disabled {
            tracing::trace!(device = %device.id, %protocol, "Protocol disabled");
        }
        disabled
    }

    /// Command protocol and port for a device, or `None` if the protocol is unknown.
    fn command_protocol(&self, device: &DeviceSnapshot) -> Option<(Protocol, Option<u16>)> {
        let name = device
            .command_protocol
            .as_deref()
            .unwrap_or(&self.settings.command_protocol);
        let port = device.command_port.unwrap_or(self.settings.command_port);

        match Protocol::from_str(name) {
            Ok(Protocol::Ssh) => Some((Protocol::Ssh, Some(port))),
            // Telnet falls back to its own port unless one was chosen explicitly
            Ok(Protocol::Telnet) => {
                let port = if port == DEFAULT_COMMAND_PORT { TELNET_PORT } else { port };
                Some((Protocol::Telnet, Some(port)))
            }
            _ => {
                tracing::warn!(device = %device.id, protocol = %name, "Unknown command protocol");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::plugin::{Plugin, PluginError};
    use crate::collector::traits::{ClientOutcome, CollectorError, RawResult};
    use crate::hub::{PluginDescriptor, UpdateDescription};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    struct Named {
        name: String,
        transport: Transport,
    }

    impl Plugin for Named {
        fn name(&self) -> &str {
            &self.name
        }
        fn transport(&self) -> Transport {
            self.transport
        }
        fn process(
            &self,
            _device: &DeviceSnapshot,
            _raw: RawResult,
        ) -> Result<Vec<UpdateDescription>, PluginError> {
            Ok(vec![])
        }
    }

    struct Idle(Protocol);

    #[async_trait::async_trait]
    impl ProtocolClient for Idle {
        fn protocol(&self) -> Protocol {
            self.0
        }
        async fn collect(&mut self, _cancel: CancellationToken) -> ClientOutcome {
            ClientOutcome::default()
        }
    }

    fn plugin_registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for name in ["wmi.A", "python.A", "cmd.A", "snmp.A", "portscan.A"] {
            registry.register(name, |d| {
                Ok(Arc::new(Named {
                    name: d.name.clone(),
                    transport: d.transport,
                }) as Arc<dyn Plugin>)
            });
        }
        registry
    }

    /// Client registry that records every request it sees.
    fn client_registry(seen: Arc<Mutex<Vec<(Protocol, Option<u16>)>>>) -> ClientRegistry {
        let mut registry = ClientRegistry::new();
        for protocol in [
            Protocol::Wmi,
            Protocol::Python,
            Protocol::Ssh,
            Protocol::Telnet,
            Protocol::Snmp,
            Protocol::Portscan,
        ] {
            let seen = seen.clone();
            registry.register(protocol, move |req| {
                seen.lock().unwrap().push((req.protocol, req.port));
                Ok(Box::new(Idle(req.protocol)) as Box<dyn ProtocolClient>)
            });
        }
        registry
    }

    fn full_device() -> DeviceSnapshot {
        DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("portscan.A", Transport::Portscan))
            .with_plugin(PluginDescriptor::new("snmp.A", Transport::Snmp))
            .with_plugin(PluginDescriptor::new("cmd.A", Transport::Command))
            .with_plugin(PluginDescriptor::new("python.A", Transport::Python))
            .with_plugin(PluginDescriptor::new("wmi.A", Transport::Wmi))
    }

    fn dispatcher(settings: DispatchSettings, seen: Arc<Mutex<Vec<(Protocol, Option<u16>)>>>) -> ProtocolDispatcher {
        ProtocolDispatcher::new(
            plugin_registry(),
            client_registry(seen),
            PluginFilter::All,
            RecencyGate::new(Duration::from_secs(600)),
            settings,
        )
    }

    fn protocols(jobs: &[DispatchedJob]) -> Vec<Protocol> {
        jobs.iter().map(|j| j.protocol).collect()
    }

    #[test]
    fn test_fixed_dispatch_order() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen.clone());
        let jobs = d.dispatch(&Arc::new(full_device()), Utc::now());
        assert_eq!(
            protocols(&jobs),
            vec![
                Protocol::Wmi,
                Protocol::Python,
                Protocol::Ssh,
                Protocol::Snmp,
                Protocol::Portscan
            ]
        );
        assert_eq!(jobs[0].timeout, DEFAULT_CLIENT_TIMEOUT);
        assert!(seen.lock().unwrap().contains(&(Protocol::Ssh, Some(22))));
    }

    #[test]
    fn test_recency_gate_skips_all_but_command() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen);
        let now = Utc::now();
        let device = full_device().with_status(1, Some(now - chrono::Duration::minutes(5)));
        let jobs = d.dispatch(&Arc::new(device), now);
        assert_eq!(protocols(&jobs), vec![Protocol::Ssh]);
    }

    #[test]
    fn test_telnet_default_port() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen.clone());
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("cmd.A", Transport::Command))
            .with_command("telnet", None);
        let jobs = d.dispatch(&Arc::new(device), Utc::now());
        assert_eq!(protocols(&jobs), vec![Protocol::Telnet]);

        let device = DeviceSnapshot::new("dev2", "10.0.0.2")
            .with_plugin(PluginDescriptor::new("cmd.A", Transport::Command))
            .with_command("telnet", Some(2323));
        d.dispatch(&Arc::new(device), Utc::now());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (Protocol::Telnet, Some(23)));
        assert_eq!(seen[1], (Protocol::Telnet, Some(2323)));
    }

    #[test]
    fn test_unknown_command_protocol_builds_nothing() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen);
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("cmd.A", Transport::Command))
            .with_command("rsh", None);
        assert!(d.dispatch(&Arc::new(device), Utc::now()).is_empty());
    }

    #[test]
    #[traced_test]
    fn test_command_protocol_resolved_only_with_command_plugins() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen);
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("portscan.A", Transport::Portscan))
            .with_command("rsh", None);
        let jobs = d.dispatch(&Arc::new(device), Utc::now());

        assert_eq!(protocols(&jobs), vec![Protocol::Portscan]);
        assert!(logs_contain("No plugins found"));
        assert!(!logs_contain("Unknown command protocol"));
    }

    #[test]
    #[traced_test]
    fn test_disabled_command_protocol() {
        let seen = Arc::new(Mutex::new(vec![]));
        let settings = DispatchSettings {
            disabled: HashSet::from([Protocol::Telnet]),
            ..DispatchSettings::default()
        };
        let d = dispatcher(settings, seen.clone());
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("cmd.A", Transport::Command))
            .with_command("telnet", None);
        assert!(d.dispatch(&Arc::new(device), Utc::now()).is_empty());
        assert!(seen.lock().unwrap().is_empty());
        assert!(logs_contain("Protocol disabled"));
    }

    #[test]
    fn test_snmp_monitor_ignore_and_disabled() {
        let seen = Arc::new(Mutex::new(vec![]));
        let settings = DispatchSettings {
            disabled: HashSet::from([Protocol::Wmi]),
            ..DispatchSettings::default()
        };
        let d = dispatcher(settings, seen);
        let device = full_device().with_snmp_monitor_ignore(true);
        let jobs = d.dispatch(&Arc::new(device), Utc::now());
        assert_eq!(
            protocols(&jobs),
            vec![Protocol::Python, Protocol::Ssh, Protocol::Portscan]
        );
    }

    #[test]
    fn test_construction_failure_isolated() {
        let mut clients = ClientRegistry::new();
        clients.register(Protocol::Python, |_| {
            Err(CollectorError::Config("boom".to_string()))
        });
        clients.register(Protocol::Portscan, |req| {
            Ok(Box::new(Idle(req.protocol)) as Box<dyn ProtocolClient>)
        });
        let d = ProtocolDispatcher::new(
            plugin_registry(),
            clients,
            PluginFilter::All,
            RecencyGate::new(Duration::ZERO),
            DispatchSettings::default(),
        );
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("python.A", Transport::Python))
            .with_plugin(PluginDescriptor::new("snmp.A", Transport::Snmp))
            .with_plugin(PluginDescriptor::new("portscan.A", Transport::Portscan))
            .with_client_timeout(Duration::from_secs(30));
        let jobs = d.dispatch(&Arc::new(device), Utc::now());
        // python fails to build, snmp has no client registered
        assert_eq!(protocols(&jobs), vec![Protocol::Portscan]);
        assert_eq!(jobs[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_plugin_skips_protocol() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = dispatcher(DispatchSettings::default(), seen);
        let device = DeviceSnapshot::new("dev1", "10.0.0.1")
            .with_plugin(PluginDescriptor::new("snmp.Unknown", Transport::Snmp))
            .with_plugin(PluginDescriptor::new("portscan.A", Transport::Portscan));
        let jobs = d.dispatch(&Arc::new(device), Utc::now());
        assert_eq!(protocols(&jobs), vec![Protocol::Portscan]);
    }
}
