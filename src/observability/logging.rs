//! # Structured Logging
//!
//! Subscriber setup and span macros for reconciliation and provider calls.
//!
//! Secret material must never reach a log line: fields carry store names,
//! remote keys and provider kinds only.

use crate::config::ObservabilityConfig;
use crate::errors::{Result, SyncError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Create a tracing span for one reconciliation pass.
///
/// ```rust,ignore
/// let span = reconcile_span!("external_secret", "team-a/db-creds");
/// ```
#[macro_export]
macro_rules! reconcile_span {
    ($kind:expr, $object:expr) => {
        tracing::info_span!(
            "reconcile",
            kind = %$kind,
            object = %$object,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($kind:expr, $object:expr, $($field:tt)*) => {
        tracing::info_span!(
            "reconcile",
            kind = %$kind,
            object = %$object,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a single backend call.
#[macro_export]
macro_rules! provider_span {
    ($operation:expr, $provider:expr) => {
        tracing::debug_span!(
            "provider_call",
            operation = %$operation,
            provider = %$provider,
            remote_key = tracing::field::Empty
        )
    };
    ($operation:expr, $provider:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "provider_call",
            operation = %$operation,
            provider = %$provider,
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            SyncError::config_with_source(
                format!("Invalid log level '{}'", config.log_level),
                Box::new(e),
            )
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| SyncError::config_with_source("Logging already initialized", Box::new(e)))?;

    tracing::info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        "Logging initialized"
    );
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        client_cache_capacity = config.cache.client_capacity,
        record_cache_capacity = config.cache.record_capacity,
        marker_name = %config.protocol.marker_name,
        default_refresh_interval_seconds = config.protocol.default_refresh_interval_seconds,
        "Secret synchronization configuration"
    );
}
