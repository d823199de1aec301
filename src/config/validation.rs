//! Field checks and value parsers shared by the configuration sections.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;
use url::Url;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a cycle interval, timeout or delay given on the command line.
///
/// `0s` is accepted and, for the cycle interval, selects single-pass mode.
///
/// # Examples
///
/// ```
/// use modeler::config::parse_duration;
///
/// assert_eq!(parse_duration("12m").unwrap().as_secs(), 720);
/// assert_eq!(parse_duration("0s").unwrap().as_secs(), 0);
/// assert!(parse_duration("12").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("duration string is empty".to_string()),
        s => humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}")),
    }
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var pattern is valid")
});

/// Substitute `${VAR}` and `${VAR:-default}` from the process environment.
///
/// Used on the hub URL so credentials and hosts can stay out of the file.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .ok()
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Reject a zero count such as `parallel` or `batch_size`.
pub(crate) fn require_positive(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be positive"
        )));
    }
    Ok(())
}

/// Reject a zero duration such as `client_timeout`.
pub(crate) fn require_nonzero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be positive"
        )));
    }
    Ok(())
}

/// Hub base URLs must be absolute `http` or `https` URLs.
pub(crate) fn validate_hub_url(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|e| ConfigError::ValidationError(format!("invalid hub url '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::ValidationError(format!(
            "invalid hub url '{url}': unsupported scheme '{scheme}'"
        ))),
    }
}

/// Organizer paths are absolute, e.g. `/Devices/Server`.
pub(crate) fn validate_organizer(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::ValidationError(format!(
            "organizer path '{path}' must start with '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(" 30s ").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("720").unwrap_err().contains("720"));
    }

    #[test]
    fn test_expand_env_vars() {
        assert_eq!(expand_env_vars("http://hub/api"), "http://hub/api");
        assert_eq!(
            expand_env_vars("http://${MODELER_TEST_UNSET_HOST:-localhost}:8080"),
            "http://localhost:8080"
        );
        assert_eq!(expand_env_vars("${MODELER_TEST_UNSET_HOST}/api"), "/api");

        // SAFETY: the variable name is unique to this test.
        unsafe {
            std::env::set_var("MODELER_TEST_EXPAND_HOST", "hub.internal");
        }
        assert_eq!(
            expand_env_vars("http://${MODELER_TEST_EXPAND_HOST:-localhost}/api"),
            "http://hub.internal/api"
        );
        // SAFETY: see above.
        unsafe {
            std::env::remove_var("MODELER_TEST_EXPAND_HOST");
        }
    }

    #[test]
    fn test_field_checks() {
        assert!(require_positive("parallel", 1).is_ok());
        assert!(
            require_positive("parallel", 0)
                .unwrap_err()
                .to_string()
                .contains("parallel must be positive")
        );
        assert!(require_nonzero("client_timeout", Duration::ZERO).is_err());
        assert!(validate_organizer("/Devices/Server").is_ok());
        assert!(validate_organizer("Devices").is_err());
    }

    #[test]
    fn test_validate_hub_url() {
        assert!(validate_hub_url("https://hub.internal/api").is_ok());
        assert!(validate_hub_url("not a url").is_err());
        let err = validate_hub_url("ftp://hub.internal").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }
}
