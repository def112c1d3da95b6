//! # Error Types
//!
//! Error types for the synchronization core using `thiserror`.

use super::validation::ValidationErrors;

/// Custom result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for the synchronization core
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// Malformed or contradictory configuration, rejected before reconciliation
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// One or more structural rule violations, reported together
    #[error(transparent)]
    Validation(ValidationErrors),

    /// Network or authentication failure talking to a backend
    #[error("Backend unavailable ({provider}): {message}")]
    BackendUnavailable { provider: String, message: String },

    /// Remote record missing
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// Remote record exists but does not carry this system's ownership marker
    #[error("Secret '{key}' is not managed by {owner}")]
    NotManaged { key: String, owner: String },

    /// Property path resolved to nothing
    #[error("property {property} does not exist in key {key}")]
    PropertyNotFound { key: String, property: String },

    /// Tag lookup resolved to nothing
    #[error("tag {tag} does not exist in key {key}")]
    TagNotFound { key: String, tag: String },

    /// A map was requested but the resolved value is a scalar
    #[error("cannot expand property {property} of key {key}: value is not an object")]
    CannotExpand { key: String, property: String },

    /// The resolved value has the wrong shape for the request
    #[error("ambiguous property {property} in key {key}: {reason}")]
    AmbiguousProperty {
        key: String,
        property: String,
        reason: String,
    },

    /// Operation not supported by the provider or by the store's capabilities
    #[error("Operation '{operation}' is not supported by provider {provider}")]
    UnsupportedOperation { operation: String, provider: String },

    /// Store spec sets more than one backend
    #[error("store {store} must only have exactly one backend specified, found {count}")]
    MultipleBackends { store: String, count: usize },

    /// Store spec sets no backend
    #[error("store {store} must only have exactly one backend specified, found 0")]
    NoBackend { store: String },

    /// Store spec selects a backend with no registered provider
    #[error("store {store} uses provider {kind} which is not registered")]
    UnknownBackend { store: String, kind: String },

    /// Duplicate provider registration at bootstrap
    #[error("provider {kind} is already registered")]
    AlreadyRegistered { kind: String },

    /// The surrounding reconciliation pass was cancelled
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable { provider: provider.into(), message: message.into() }
    }

    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a not managed error
    pub fn not_managed(key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::NotManaged { key: key.into(), owner: owner.into() }
    }

    pub fn property_not_found(key: impl Into<String>, property: impl Into<String>) -> Self {
        Self::PropertyNotFound { key: key.into(), property: property.into() }
    }

    pub fn tag_not_found(key: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::TagNotFound { key: key.into(), tag: tag.into() }
    }

    pub fn cannot_expand(key: impl Into<String>, property: impl Into<String>) -> Self {
        Self::CannotExpand { key: key.into(), property: property.into() }
    }

    pub fn ambiguous_property(
        key: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::AmbiguousProperty { key: key.into(), property: property.into(), reason: reason.into() }
    }

    /// Create an unsupported operation error
    pub fn unsupported(operation: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::UnsupportedOperation { operation: operation.into(), provider: provider.into() }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the external scheduler should retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::BackendUnavailable { .. })
    }

    /// Whether the remote record is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    /// Whether the error is an admission-time rejection that must never be reconciled
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SyncError::Config { .. }
                | SyncError::Validation(_)
                | SyncError::MultipleBackends { .. }
                | SyncError::NoBackend { .. }
                | SyncError::UnknownBackend { .. }
        )
    }
}

impl From<ValidationErrors> for SyncError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut aggregated = ValidationErrors::new();
        for (field, field_errors) in errors.field_errors() {
            for e in field_errors {
                let message =
                    e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string());
                aggregated.push(field.to_string(), message);
            }
        }
        Self::Validation(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = SyncError::config("Test configuration error");
        assert!(matches!(error, SyncError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = SyncError::property_not_found("db-creds", "Age");
        assert_eq!(err.to_string(), "property Age does not exist in key db-creds");

        let err = SyncError::tag_not_found("db-creds", "something");
        assert_eq!(err.to_string(), "tag something does not exist in key db-creds");

        let err = SyncError::not_managed("app/token", "secretsync");
        assert!(err.to_string().contains("app/token"));
        assert!(err.to_string().contains("not managed"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::backend_unavailable("vault", "connection refused").is_retryable());
        assert!(!SyncError::not_managed("k", "secretsync").is_retryable());
        assert!(!SyncError::not_found("k").is_retryable());
        assert!(!SyncError::config("bad").is_retryable());
    }

    #[test]
    fn test_config_classification() {
        assert!(SyncError::NoBackend { store: "s".into() }.is_config());
        assert!(SyncError::MultipleBackends { store: "s".into(), count: 2 }.is_config());
        assert!(!SyncError::not_found("k").is_config());
    }

    #[test]
    fn test_error_conversions() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: SyncError = json_error.into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }
}
