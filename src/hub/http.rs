//! HTTP hub client.
//!
//! Speaks JSON to the hub's modeler endpoints:
//!
//! | Call                        | Method | Path                            |
//! |-----------------------------|--------|---------------------------------|
//! | `device_list_by_organizer`  | GET    | `devices?organizer=<path>`      |
//! | `device_list_by_monitor`    | GET    | `devices?monitor=<name>`        |
//! | `device_config`             | POST   | `devices/config`                |
//! | `apply_update_descriptions` | POST   | `devices/<id>/maps`             |
//! | `set_last_collection`       | POST   | `devices/<id>/last-collection`  |
//! | `property_items`            | GET    | `properties`                    |
//! | `threshold_classes`         | GET    | `threshold-classes`             |
//! | `default_command_template`  | GET    | `command-template`              |
//! | `collector_thresholds`      | GET    | `thresholds`                    |
//! | `send_events`               | POST   | `events`                        |

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    CollectorThreshold, DeviceSnapshot, HubError, ModelerService, PropertyItems,
    UpdateDescription,
};
use crate::events::Event;

#[derive(Debug, Serialize)]
struct ConfigRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct TemplateResponse {
    template: String,
}

/// Hub client over HTTP/JSON.
#[derive(Clone)]
pub struct HttpHub {
    base: Url,
    client: Client,
}

impl std::fmt::Debug for HttpHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHub")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpHub {
    /// Create a client for the hub at `base_url`.
    ///
    /// # Errors
    /// Returns `HubError::Config` if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, HubError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| HubError::Config(format!("invalid hub url '{}': {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HubError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { base, client })
    }

    /// Base URL all endpoints are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, HubError> {
        self.base
            .join(path)
            .map_err(|e| HubError::Config(format!("invalid endpoint '{}': {}", path, e)))
    }

    fn device_endpoint(&self, device_id: &str, action: &str) -> Result<Url, HubError> {
        let mut url = self.endpoint("devices/")?;
        url.path_segments_mut()
            .map_err(|()| HubError::Config("hub url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(device_id)
            .push(action);
        Ok(url)
    }

    async fn send(request: RequestBuilder, endpoint: &str) -> Result<Response, HubError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(endpoint, status = status.as_u16(), "Hub call failed");
            return Err(HubError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, HubError> {
        let endpoint = url.path().to_string();
        let response = Self::send(self.client.get(url), &endpoint).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait::async_trait]
impl ModelerService for HttpHub {
    async fn device_list_by_organizer(&self, path: &str) -> Result<Vec<String>, HubError> {
        let mut url = self.endpoint("devices")?;
        url.query_pairs_mut().append_pair("organizer", path);
        self.get_json(url).await
    }

    async fn device_list_by_monitor(&self, monitor: &str) -> Result<Vec<String>, HubError> {
        let mut url = self.endpoint("devices")?;
        url.query_pairs_mut().append_pair("monitor", monitor);
        self.get_json(url).await
    }

    async fn device_config(&self, ids: &[String]) -> Result<Vec<DeviceSnapshot>, HubError> {
        let url = self.endpoint("devices/config")?;
        let endpoint = url.path().to_string();
        let response = Self::send(
            self.client.post(url).json(&ConfigRequest { ids }),
            &endpoint,
        )
        .await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn apply_update_descriptions(
        &self,
        device_id: &str,
        maps: Vec<UpdateDescription>,
    ) -> Result<bool, HubError> {
        let url = self.device_endpoint(device_id, "maps")?;
        let endpoint = url.path().to_string();
        let response = Self::send(self.client.post(url).json(&maps), &endpoint).await?;
        let bytes = response.bytes().await?;
        let parsed: ApplyResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.changed)
    }

    async fn set_last_collection(&self, device_id: &str) -> Result<(), HubError> {
        let url = self.device_endpoint(device_id, "last-collection")?;
        let endpoint = url.path().to_string();
        Self::send(self.client.post(url), &endpoint).await?;
        Ok(())
    }

    async fn property_items(&self) -> Result<PropertyItems, HubError> {
        self.get_json(self.endpoint("properties")?).await
    }

    async fn threshold_classes(&self) -> Result<Vec<String>, HubError> {
        self.get_json(self.endpoint("threshold-classes")?).await
    }

    async fn default_command_template(&self) -> Result<String, HubError> {
        let parsed: TemplateResponse = self.get_json(self.endpoint("command-template")?).await?;
        Ok(parsed.template)
    }

    async fn collector_thresholds(&self) -> Result<Vec<CollectorThreshold>, HubError> {
        self.get_json(self.endpoint("thresholds")?).await
    }

    async fn send_events(&self, events: Vec<Event>) -> Result<(), HubError> {
        let url = self.endpoint("events")?;
        let endpoint = url.path().to_string();
        Self::send(self.client.post(url).json(&events), &endpoint).await?;
        Ok(())
    }
}
