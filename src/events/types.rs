//! Daemon event records delivered to the hub.
//!
//! - [`Event`]: one structured event (heartbeat, gauge, threshold violation, ...)
//! - [`EventKind`]: classification of event nature
//! - [`EventSeverity`]: delivery priority

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A daemon event sent to the hub with `send_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp (UTC).
    pub ts: DateTime<Utc>,
    /// Event origin (e.g. "modeler", "modeler.scheduler").
    pub source: String,
    /// Event nature.
    pub kind: EventKind,
    /// Delivery priority.
    pub severity: EventSeverity,
    /// Short human-readable description.
    pub message: String,
    /// Device the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Context snapshot as JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        kind: EventKind,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            kind,
            severity,
            message: message.into(),
            device: None,
            payload: None,
        }
    }

    /// Liveness event; the hub raises an alarm if the next one is not seen within `timeout`.
    pub fn heartbeat(source: impl Into<String>, timeout: Duration) -> Self {
        Self::new(source, EventKind::Heartbeat, EventSeverity::Debug, "heartbeat")
            .with_payload("timeout_secs", timeout.as_secs())
    }

    /// Attach the device the event refers to.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Add a key/value pair to the payload object.
    pub fn with_payload(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let payload = self
            .payload
            .get_or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Event kind classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    /// Periodic liveness signal.
    Heartbeat,
    /// Gauge sample (`cycleTime`, `devices`, `timedOut`).
    Metric,
    /// Gauge crossed a collector threshold.
    Threshold,
    /// Internal daemon event (startup, shutdown).
    System,
    /// Failure requiring attention.
    Error,
}

/// Event severity classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventSeverity {
    /// Verbose diagnostic information.
    Debug,
    /// Normal operational information.
    Info,
    /// Potential issue that may require attention.
    Warn,
    /// Error condition requiring investigation.
    Error,
    /// Severe failure requiring immediate action.
    Critical,
}
