//! Desired-secret declarations.

use crate::domain::refs::{FindQuery, RemoteRef};
use crate::domain::store::StoreKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What the synchronizer may do with the local target secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CreationPolicy {
    /// Create the target and stamp it as owned
    #[default]
    Owner,
    /// Create or update the target without claiming ownership
    Orphan,
    /// Only merge into a target that already exists
    Merge,
    /// Never write the target
    None,
}

/// What happens to the target when every remote entry is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Merge,
    #[default]
    Retain,
}

impl fmt::Display for CreationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reference to a store by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StoreRef {
    pub name: String,
    #[serde(default)]
    pub kind: StoreKind,
}

impl StoreRef {
    pub fn secret_store(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: StoreKind::SecretStore }
    }

    pub fn cluster_secret_store(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: StoreKind::ClusterSecretStore }
    }
}

/// Reference to a generator object producing values instead of a store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Alternative source for one entry: another store, or a generator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_ref: Option<StoreRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_ref: Option<GeneratorRef>,
}

/// The local secret the synchronizer writes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Target name; defaults to the ExternalSecret's own name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub creation_policy: CreationPolicy,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// One explicitly named output key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretData {
    pub secret_key: String,
    pub remote_ref: RemoteRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}

/// One bulk source of output keys
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<RemoteRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find: Option<FindQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}

impl DataFromSource {
    pub fn extract(remote_ref: RemoteRef) -> Self {
        Self { extract: Some(remote_ref), ..Default::default() }
    }

    pub fn find(query: FindQuery) -> Self {
        Self { find: Some(query), ..Default::default() }
    }

    pub fn with_source(mut self, source_ref: SourceRef) -> Self {
        self.source_ref = Some(source_ref);
        self
    }

    /// Whether this entry reads from a generator instead of a store
    pub fn uses_generator(&self) -> bool {
        self.source_ref.as_ref().is_some_and(|s| s.generator_ref.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Seconds between refreshes; `None` falls back to the configured default, `0` disables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_seconds: Option<u64>,
    pub secret_store_ref: StoreRef,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub data: Vec<ExternalSecretData>,
    #[serde(default)]
    pub data_from: Vec<DataFromSource>,
}

impl ExternalSecretSpec {
    pub fn refresh_interval(&self, default: Duration) -> Duration {
        self.refresh_interval_seconds.map(Duration::from_secs).unwrap_or(default)
    }
}

/// A desired-secret object as delivered by the admission layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecret {
    pub name: String,
    pub namespace: String,
    pub spec: ExternalSecretSpec,
}

impl ExternalSecret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ExternalSecretSpec) -> Self {
        Self { name: name.into(), namespace: namespace.into(), spec }
    }

    /// `namespace/name`, the single-flight key for reconciliation
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn target_name(&self) -> &str {
        self.spec.target.name.as_deref().unwrap_or(&self.name)
    }
}
