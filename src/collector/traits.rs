//! Core collector traits and types.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::plugin::{Plugin, PluginError};
use crate::hub::HubError;

/// Opaque per-plugin payload returned by a protocol client.
pub type RawResult = serde_json::Value;

/// Whether a raw result carries nothing worth processing.
///
/// Null, empty string, empty array and empty object count as empty.
pub fn is_empty_result(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Errors that can occur while building or running a protocol client.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("timeout elapsed")]
    Timeout,

    /// Plugin instantiation or collection failed.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// No client is registered for the protocol.
    #[error("no client registered for protocol {0}")]
    Unsupported(Protocol),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The job was cancelled before it finished.
    #[error("collection cancelled")]
    Cancelled,

    /// Hub call failed.
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
}

/// Errors raised while validating an IP address.
#[derive(Debug, Error)]
pub enum IpValidationError {
    #[error("address is empty")]
    Empty,
    #[error("invalid IP address '{0}'")]
    Invalid(String),
}

/// Validate that `value` is an IPv4 or IPv6 address.
pub fn validate_ip_address(value: &str) -> Result<IpAddr, IpValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IpValidationError::Empty);
    }
    value
        .parse::<IpAddr>()
        .map_err(|_| IpValidationError::Invalid(value.to_string()))
}

/// Transport a plugin declares it collects over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Transport {
    Wmi,
    /// Local script executed by the daemon itself.
    Python,
    /// Remote command execution (SSH or Telnet).
    Command,
    Snmp,
    Portscan,
}

/// Concrete protocol a collection job runs over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Wmi,
    Python,
    Ssh,
    Telnet,
    Snmp,
    Portscan,
}

impl Protocol {
    /// Transport whose plugins this protocol runs.
    pub fn transport(&self) -> Transport {
        match self {
            Self::Wmi => Transport::Wmi,
            Self::Python => Transport::Python,
            Self::Ssh | Self::Telnet => Transport::Command,
            Self::Snmp => Transport::Snmp,
            Self::Portscan => Transport::Portscan,
        }
    }
}

/// Raw result paired with the plugin that produced it.
#[derive(Clone)]
pub struct PluginResult {
    pub plugin: Arc<dyn Plugin>,
    /// `None` when the client produced nothing for this plugin.
    pub raw: Option<RawResult>,
}

impl std::fmt::Debug for PluginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginResult")
            .field("plugin", &self.plugin.name())
            .field("raw", &self.raw)
            .finish()
    }
}

/// What a protocol client reports when it finishes.
#[derive(Debug, Default)]
pub struct ClientOutcome {
    /// One entry per plugin the client ran, in plugin order.
    pub results: Vec<PluginResult>,
    /// Set when the client failed as a whole; `results` may then be partial.
    pub error: Option<CollectorError>,
}

impl ClientOutcome {
    /// Outcome of a client that failed before producing anything.
    pub fn failed(error: CollectorError) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error),
        }
    }
}

/// One protocol-specific collection attempt against one device.
///
/// A client is built per device and protocol, consumed by a single `collect` call
/// and dropped afterwards. Implementations should watch `cancel` and return
/// promptly once it fires; a client that ignores it is dropped after the stop
/// grace period and its results are discarded.
#[async_trait::async_trait]
pub trait ProtocolClient: Send + 'static {
    /// Protocol this client speaks.
    fn protocol(&self) -> Protocol;

    /// Run every assigned plugin and report the raw results.
    async fn collect(&mut self, cancel: CancellationToken) -> ClientOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_is_empty_result() {
        assert!(is_empty_result(&json!(null)));
        assert!(is_empty_result(&json!("")));
        assert!(is_empty_result(&json!([])));
        assert!(is_empty_result(&json!({})));
        assert!(!is_empty_result(&json!(0)));
        assert!(!is_empty_result(&json!(false)));
        assert!(!is_empty_result(&json!(["eth0"])));
    }

    #[test]
    fn test_protocol_transport() {
        assert_eq!(Protocol::Ssh.transport(), Transport::Command);
        assert_eq!(Protocol::Telnet.transport(), Transport::Command);
        assert_eq!(Protocol::Python.transport(), Transport::Python);
        assert_eq!(Protocol::from_str("TELNET").unwrap(), Protocol::Telnet);
        assert!(Protocol::from_str("rsh").is_err());
    }

    #[test]
    fn test_transport_serde() {
        let t: Transport = serde_json::from_value(json!("portscan")).unwrap();
        assert_eq!(t, Transport::Portscan);
        assert_eq!(serde_json::to_value(Transport::Command).unwrap(), json!("command"));
    }

    #[test]
    fn test_validate_ip_address() {
        assert!(validate_ip_address("10.0.0.1").is_ok());
        assert!(validate_ip_address("::1").is_ok());
        assert!(matches!(validate_ip_address(" "), Err(IpValidationError::Empty)));
        assert!(matches!(
            validate_ip_address("router.local"),
            Err(IpValidationError::Invalid(_))
        ));
    }
}
