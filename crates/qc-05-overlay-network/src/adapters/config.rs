//! TOML configuration loading.
//!
//! # Config File Format
//!
//! ```toml
//! [overlay]
//! children_limit = 10
//! uncle_limit = 1
//! nephew_limit = 10
//! seed_period_ms = 3000
//! alternate_send_period_ms = 1000
//! queue_capacity = 1000
//! detection_window_ms = 5000
//! seeds = ["10.0.0.1:7000", "10.0.0.2:7000"]
//!
//! [overlay.priority_queue_capacity]
//! 1 = 4000
//! ```
//!
//! Missing keys keep their defaults; other top-level tables are ignored so
//! the overlay section can live in a larger node config.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::{OverlayConfig, MAX_PRIORITY};

/// Errors that can occur during config loading.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    overlay: OverlayConfig,
}

/// Loads [`OverlayConfig`] from the `[overlay]` table of a TOML file.
pub struct TomlConfigLoader;

impl TomlConfigLoader {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<OverlayConfig, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<OverlayConfig, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate(&file.overlay)?;
        Ok(file.overlay)
    }
}

/// Rejects values the overlay cannot run with.
pub fn validate(config: &OverlayConfig) -> Result<(), ConfigError> {
    if config.seed_period_ms == 0 {
        return Err(ConfigError::Invalid("seed_period_ms must be positive".into()));
    }
    if config.detection_window_ms == 0 {
        return Err(ConfigError::Invalid(
            "detection_window_ms must be positive".into(),
        ));
    }
    if config.seen_cache_size == 0 {
        return Err(ConfigError::Invalid("seen_cache_size must be positive".into()));
    }
    if let Some(priority) = config
        .priority_queue_capacity
        .keys()
        .find(|p| **p > MAX_PRIORITY)
    {
        return Err(ConfigError::Invalid(format!(
            "priority {priority} exceeds {MAX_PRIORITY}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NetAddress;

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config = TomlConfigLoader::parse(
            r#"
            [node]
            name = "ignored"

            [overlay]
            children_limit = 4
            seeds = ["10.0.0.1:7000"]
            "#,
        )
        .unwrap();
        assert_eq!(config.children_limit, 4);
        assert_eq!(config.uncle_limit, OverlayConfig::default().uncle_limit);
        assert_eq!(config.seeds, vec![NetAddress::parse("10.0.0.1:7000").unwrap()]);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = TomlConfigLoader::parse("").unwrap();
        assert_eq!(config.queue_capacity, 1_000);
        assert_eq!(config.seed_period_ms, 3_000);
    }

    #[test]
    fn test_bad_seed_address_rejected() {
        let err = TomlConfigLoader::parse("[overlay]\nseeds = [\"no-port\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_period_invalid() {
        let err = TomlConfigLoader::parse("[overlay]\nseed_period_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = TomlConfigLoader::load("/nonexistent/overlay.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
