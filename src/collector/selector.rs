//! Plugin selection by transport and name filter.

use std::sync::Arc;

use regex::Regex;

use super::plugin::{Plugin, PluginError, PluginRegistry};
use super::traits::Transport;
use crate::config::ConfigError;
use crate::hub::PluginDescriptor;

/// Include-XOR-exclude plugin name filter. Patterns match anywhere in the name.
#[derive(Debug, Clone, Default)]
pub enum PluginFilter {
    #[default]
    All,
    Include(Regex),
    Exclude(Regex),
}

impl PluginFilter {
    /// Build a filter from optional include (`collect`) and exclude (`ignore`) patterns.
    ///
    /// Empty strings count as unset.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if both are set or a pattern is invalid.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, ConfigError> {
        let include = include.filter(|s| !s.is_empty());
        let exclude = exclude.filter(|s| !s.is_empty());
        match (include, exclude) {
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "only one of collect and ignore may be set".to_string(),
            )),
            (Some(pattern), None) => Ok(Self::Include(compile(pattern, "collect")?)),
            (None, Some(pattern)) => Ok(Self::Exclude(compile(pattern, "ignore")?)),
            (None, None) => Ok(Self::All),
        }
    }

    /// Whether a plugin with this name passes the filter.
    pub fn keeps(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exclude(pattern) => {
                if pattern.is_match(name) {
                    tracing::debug!(plugin = %name, "Plugin excluded by ignore pattern");
                    false
                } else {
                    true
                }
            }
            Self::Include(pattern) => {
                if pattern.is_match(name) {
                    tracing::debug!(plugin = %name, "Plugin included by collect pattern");
                    true
                } else {
                    false
                }
            }
        }
    }
}

fn compile(pattern: &str, field: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| {
        ConfigError::ValidationError(format!("invalid {} pattern '{}': {}", field, pattern, e))
    })
}

/// Instantiate the plugins of `transport` configured for a device, in order, and
/// apply the name filter.
///
/// # Errors
/// Returns `PluginError` if any candidate descriptor cannot be instantiated.
pub fn select_plugins(
    registry: &PluginRegistry,
    descriptors: &[PluginDescriptor],
    transport: Transport,
    filter: &PluginFilter,
) -> Result<Vec<Arc<dyn Plugin>>, PluginError> {
    let mut selected = Vec::new();
    for descriptor in descriptors.iter().filter(|d| d.transport == transport) {
        let plugin = registry.instantiate(descriptor)?;
        if plugin.transport() == transport && filter.keeps(plugin.name()) {
            selected.push(plugin);
        }
    }
    Ok(selected)
}
