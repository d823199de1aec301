//! Hub-specific error types.
//!
//! Every [`ModelerService`](super::ModelerService) call returns [`HubError`] on
//! failure, so callers can distinguish transport problems from bad payloads.

use thiserror::Error;

/// Errors that can occur while talking to the hub.
#[derive(Debug, Error)]
pub enum HubError {
    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hub answered with an unexpected status.
    #[error("unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read an inventory file.
    #[error("failed to read inventory: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an inventory file.
    #[error("failed to parse inventory: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid hub configuration (e.g. malformed URL).
    #[error("hub config error: {0}")]
    Config(String),

    /// The requested device is unknown to the hub.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}
