//! Connector configuration

use std::time::Duration;

use cirrus_core::{config::parse_toml, ConfigError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settings for one connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Client identity stamped on every token; unique per connector
    pub client_id: String,

    /// Role of the driver to connect to
    pub driver_role: String,

    /// Bucket named in `ACCESS`
    pub bucket: String,

    /// Concurrent sends
    pub worker_threads: usize,

    /// How long `close` and `shutdown` wait for queued sends, in milliseconds
    pub close_grace_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            client_id: format!("connector-{}", Uuid::new_v4()),
            driver_role: "kv-driver".to_string(),
            bucket: "default".to_string(),
            worker_threads: 2,
            close_grace_ms: 1_000,
        }
    }
}

impl ConnectorConfig {
    /// Default configuration for `client_id` using `bucket`
    pub fn new(client_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Replace the driver role
    pub fn with_driver_role(mut self, role: impl Into<String>) -> Self {
        self.driver_role = role.into();
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_toml(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the connector cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::invalid("client_id", "must not be empty"));
        }
        if self.driver_role.trim().is_empty() {
            return Err(ConfigError::invalid("driver_role", "must not be empty"));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::invalid("bucket", "must not be empty"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads", "must be at least 1"));
        }
        Ok(())
    }

    /// Grace period for `close` and `shutdown`
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_generate_distinct_client_ids() {
        assert_ne!(
            ConnectorConfig::default().client_id,
            ConnectorConfig::default().client_id
        );
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = ConnectorConfig::from_toml_str(
            r#"
            client_id = "billing"
            bucket = "orders"
            close_grace_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.client_id, "billing");
        assert_eq!(config.bucket, "orders");
        assert_eq!(config.driver_role, "kv-driver");
        assert_eq!(config.close_grace(), Duration::from_millis(250));
    }

    #[test]
    fn empty_bucket_is_rejected() {
        assert_matches!(
            ConnectorConfig::from_toml_str("bucket = \"\""),
            Err(ConfigError::Invalid { field: "bucket", .. })
        );
    }
}
