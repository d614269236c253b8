//! Configuration helpers shared by connector and driver configs

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Configuration loading and validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A field holds an unusable value
    #[error("invalid configuration field {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why the value is rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid field error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Parse a TOML document into a config struct
pub fn parse_toml<T: DeserializeOwned>(source: &str) -> Result<T, ConfigError> {
    toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
}
