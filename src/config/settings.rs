//! # Configuration Settings
//!
//! Defines the configuration structure for the synchronization core.

use crate::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Prefix for environment overrides, e.g. `SECRETSYNC__CACHE__CLIENT_CAPACITY=512`
pub const ENV_PREFIX: &str = "SECRETSYNC";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache sizing
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Ownership and refresh defaults
    #[validate(nested)]
    pub protocol: ProtocolConfig,
}

impl AppConfig {
    /// Load configuration: defaults, then an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            client_capacity = config.cache.client_capacity,
            record_capacity = config.cache.record_capacity,
            marker = %config.protocol.marker_name,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(SyncError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.protocol.marker_name.contains(char::is_whitespace) {
            return Err(SyncError::config("Ownership marker name cannot contain whitespace"));
        }
        Ok(())
    }
}

/// Sizes of the two bounded LRU caches
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of constructed store clients kept alive
    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Client cache capacity must be between 1 and 1000000"
    ))]
    pub client_capacity: usize,

    /// Maximum number of fetched remote records kept per provider
    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Record cache capacity must be between 1 and 1000000"
    ))]
    pub record_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { client_capacity: 256, record_capacity: 2048 }
    }
}

/// Ownership marker and refresh defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Metadata key written on every record this system owns
    #[validate(length(min = 1, message = "Marker name cannot be empty"))]
    pub marker_name: String,

    /// Value written under `marker_name`
    #[validate(length(min = 1, message = "Marker value cannot be empty"))]
    pub marker_value: String,

    /// Refresh interval applied when an ExternalSecret does not set one
    #[validate(range(max = 604_800, message = "Refresh interval cannot exceed 7 days"))]
    pub default_refresh_interval_seconds: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            marker_name: "managed-by".to_string(),
            marker_value: "secretsync".to_string(),
            default_refresh_interval_seconds: 3600,
        }
    }
}

impl ProtocolConfig {
    pub fn default_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.default_refresh_interval_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full directive string
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON formatted logs
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "secretsync".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
