//! Driver configuration

use std::time::Duration;

use cirrus_core::{config::parse_toml, ConfigError};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Settings for one driver stub
///
/// Every field has a default, so a TOML document only needs to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Role the driver accepts sessions for
    pub role: String,

    /// Backend family fronted by the driver
    pub backend: BackendKind,

    /// Concurrent backend operations
    pub worker_threads: usize,

    /// How long shutdown waits for running operations, in milliseconds
    pub shutdown_grace_ms: u64,

    /// Protocol violations tolerated on one session before it is aborted
    pub max_protocol_violations: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            role: "kv-driver".to_string(),
            backend: BackendKind::Memory,
            worker_threads: 4,
            shutdown_grace_ms: 1_000,
            max_protocol_violations: 3,
        }
    }
}

impl DriverConfig {
    /// Default configuration accepting sessions for `role`
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_toml(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the driver cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role.trim().is_empty() {
            return Err(ConfigError::invalid("role", "must not be empty"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads", "must be at least 1"));
        }
        if self.max_protocol_violations == 0 {
            return Err(ConfigError::invalid(
                "max_protocol_violations",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = DriverConfig::from_toml_str(
            r#"
            role = "orders-driver"
            backend = "redis"
            worker_threads = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.role, "orders-driver");
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.max_protocol_violations, 3);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(1));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            DriverConfig::from_toml_str("worker_threads = 0"),
            Err(ConfigError::Invalid {
                field: "worker_threads",
                ..
            })
        );
        assert_matches!(
            DriverConfig::from_toml_str("role = \"\""),
            Err(ConfigError::Invalid { field: "role", .. })
        );
        assert_matches!(
            DriverConfig::from_toml_str("backend = \"postgres\""),
            Err(ConfigError::Parse(_))
        );
    }
}
