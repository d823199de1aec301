//! Turns a finished client's raw plugin results into one hub commit.

use std::sync::Arc;

use thiserror::Error;

use crate::collector::{ClientOutcome, PluginError, is_empty_result};
use crate::hub::{DeviceSnapshot, HubError, ModelerService, UpdateDescription};

/// Errors that abort one job's commit.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("plugin error for device {device}: {source}")]
    Plugin {
        device: String,
        #[source]
        source: PluginError,
    },

    #[error("hub error for device {device}: {source}")]
    Hub {
        device: String,
        #[source]
        source: HubError,
    },
}

/// What one merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Number of non-empty update descriptions committed.
    pub maps: usize,
    /// Whether the hub reported a change.
    pub changed: bool,
}

/// Runs plugin transforms and applies the result set in a single commit.
#[derive(Clone)]
pub struct ResultMerger {
    service: Arc<dyn ModelerService>,
}

impl std::fmt::Debug for ResultMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultMerger").finish_non_exhaustive()
    }
}

impl ResultMerger {
    pub fn new(service: Arc<dyn ModelerService>) -> Self {
        Self { service }
    }

    /// Merge one client's results for `device`.
    ///
    /// Empty raw results are skipped with a warning. All non-empty update
    /// descriptions go to the hub in one call, then the last-collection
    /// timestamp is recorded whether or not anything changed.
    ///
    /// # Errors
    /// A failing plugin transform or hub call aborts the commit and the timestamp.
    pub async fn merge(
        &self,
        device: &DeviceSnapshot,
        outcome: ClientOutcome,
    ) -> Result<MergeSummary, MergeError> {
        let device_id = device.id.as_str();
        if let Some(error) = &outcome.error {
            tracing::warn!(device = %device_id, error = %error, "Client finished with error");
        }

        let mut maps: Vec<UpdateDescription> = Vec::new();
        for result in outcome.results {
            let plugin = result.plugin.name().to_string();
            let Some(raw) = result.raw.filter(|raw| !is_empty_result(raw)) else {
                tracing::warn!(device = %device_id, plugin = %plugin, "Plugin returned no results");
                continue;
            };
            let Some(raw) = result.plugin.preprocess(raw) else {
                tracing::debug!(device = %device_id, plugin = %plugin, "Preprocess discarded result");
                continue;
            };
            tracing::debug!(device = %device_id, plugin = %plugin, "Processing plugin results");
            let produced = result
                .plugin
                .process(device, raw)
                .map_err(|source| MergeError::Plugin {
                    device: device_id.to_string(),
                    source,
                })?;
            maps.extend(produced.into_iter().filter(|m| !m.is_empty()));
        }

        let count = maps.len();
        let changed = if maps.is_empty() {
            false
        } else {
            self.service
                .apply_update_descriptions(device_id, maps)
                .await
                .map_err(|source| MergeError::Hub {
                    device: device_id.to_string(),
                    source,
                })?
        };

        if changed {
            tracing::info!(device = %device_id, maps = count, "Changes applied");
        } else {
            tracing::info!(device = %device_id, "No change detected");
        }

        self.service
            .set_last_collection(device_id)
            .await
            .map_err(|source| MergeError::Hub {
                device: device_id.to_string(),
                source,
            })?;

        Ok(MergeSummary {
            maps: count,
            changed,
        })
    }
}
