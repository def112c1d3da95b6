//! # Providers
//!
//! The plugin contract every backend implements, the registry mapping store
//! configurations to providers, the capability guard, and the built-in
//! providers.
//!
//! A [`Provider`] validates store configurations and builds [`SecretsClient`]s.
//! Clients are cached per store version by [`crate::cache::StoreClientCache`],
//! so construction may be expensive (authentication, discovery calls).

pub mod fake;
pub mod gitlab;
pub mod guard;
pub mod registry;
pub mod vault;
pub mod webhook;

pub use guard::GuardedClient;
pub use registry::{ProviderDescriptor, ProviderRegistry, ProviderRegistryBuilder};

use crate::cache::VersionToken;
use crate::domain::{
    FindQuery, PushSecretData, RemoteRecord, RemoteRef, SecretData, SecretKeySelector, SecretString,
    StoreSpec,
};
use crate::errors::{Result, SyncError};
use crate::push::{DeleteOutcome, PushOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A fetched record and the backend version it was read at
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    pub version: VersionToken,
    pub record: RemoteRecord,
}

impl VersionedRecord {
    pub fn new(version: impl Into<VersionToken>, record: RemoteRecord) -> Self {
        Self { version: version.into(), record }
    }

    /// The record, or NotFound when `requested` names a different version
    pub fn pinned(self, requested: Option<&str>) -> Result<RemoteRecord> {
        match requested {
            Some(version) if version != self.version.as_str() => {
                Err(SyncError::not_found(format!("{}@{}", self.record.name, version)))
            }
            _ => Ok(self.record),
        }
    }
}

/// Operations a provider supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capabilities {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Capabilities {
    pub fn can_read(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether a provider still receives maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceStatus {
    Maintained,
    NotMaintained,
}

/// Outcome of a client health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Ready,
    /// The provider cannot tell without doing a real read
    Unknown,
    Error,
}

/// Resolves secret selectors to credential values.
///
/// Supplied by the embedding layer, which owns access to locally held secrets.
#[async_trait]
pub trait SecretKeyResolver: Send + Sync {
    async fn resolve(&self, namespace: Option<&str>, selector: &SecretKeySelector) -> Result<SecretString>;
}

/// In-memory [`SecretKeyResolver`], keyed by `(namespace, name)`
#[derive(Debug, Default, Clone)]
pub struct StaticSecretResolver {
    secrets: HashMap<(Option<String>, String), HashMap<String, SecretString>>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        value: impl Into<SecretString>,
    ) -> Self {
        self.secrets
            .entry((namespace.map(str::to_string), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
impl SecretKeyResolver for StaticSecretResolver {
    async fn resolve(&self, namespace: Option<&str>, selector: &SecretKeySelector) -> Result<SecretString> {
        let secret = self
            .secrets
            .get(&(namespace.map(str::to_string), selector.name.clone()))
            .ok_or_else(|| SyncError::not_found(format!("secret {}", selector.name)))?;
        secret
            .get(&selector.key)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("key {} in secret {}", selector.key, selector.name)))
    }
}

/// A backend plugin
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> Capabilities;

    /// Validate the provider-specific part of a store configuration.
    ///
    /// Returns non-fatal warnings on success.
    fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>>;

    /// Build a client for `store`; credentials are looked up through `auth`.
    async fn new_client(
        &self,
        store: &StoreSpec,
        auth: Arc<dyn SecretKeyResolver>,
    ) -> Result<Arc<dyn SecretsClient>>;
}

/// A constructed, authenticated handle to one store's backend
#[async_trait]
pub trait SecretsClient: Send + Sync + fmt::Debug {
    /// One value; `remote_ref.property` selects a property or dotted path
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// A record expanded into its top-level properties
    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData>;

    /// Every record matching `query`, named per the multi-record rule
    async fn get_all_secrets(&self, query: &FindQuery, cancel: &CancellationToken) -> Result<SecretData>;

    /// Write one value from `source` under the ownership protocol
    async fn push_secret(
        &self,
        source: &SecretData,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome>;

    async fn delete_secret(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<DeleteOutcome>;

    async fn secret_exists(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<bool>;

    async fn validate(&self) -> Result<ValidationResult>;

    async fn close(&self) -> Result<()>;
}
