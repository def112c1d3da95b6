//! Secret store declarations.
//!
//! A [`StoreSpec`] is an immutable snapshot of one store object taken at the
//! start of a reconciliation pass. It names exactly one backend configuration;
//! the registry refuses anything else.

use crate::domain::refs::SecretKeySelector;
use crate::providers::fake::FakeProviderConfig;
use crate::providers::gitlab::GitlabProviderConfig;
use crate::providers::vault::VaultProviderConfig;
use crate::providers::webhook::WebhookProviderConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend kinds a store may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Fake,
    Vault,
    Webhook,
    Gitlab,
    Aws,
    Gcpsm,
    Azurekv,
    Keyhub,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fake => "fake",
            Self::Vault => "vault",
            Self::Webhook => "webhook",
            Self::Gitlab => "gitlab",
            Self::Aws => "aws",
            Self::Gcpsm => "gcpsm",
            Self::Azurekv => "azurekv",
            Self::Keyhub => "keyhub",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fake" => Ok(Self::Fake),
            "vault" => Ok(Self::Vault),
            "webhook" => Ok(Self::Webhook),
            "gitlab" => Ok(Self::Gitlab),
            "aws" => Ok(Self::Aws),
            "gcpsm" => Ok(Self::Gcpsm),
            "azurekv" => Ok(Self::Azurekv),
            "keyhub" => Ok(Self::Keyhub),
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a store is scoped to one namespace or shared cluster-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StoreKind {
    #[default]
    SecretStore,
    ClusterSecretStore,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretStore => "SecretStore",
            Self::ClusterSecretStore => "ClusterSecretStore",
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::ClusterSecretStore)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a store object; the client cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub kind: StoreKind,
}

impl StoreIdentity {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: Some(namespace.into()), kind: StoreKind::SecretStore }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: None, kind: StoreKind::ClusterSecretStore }
    }
}

impl fmt::Display for StoreIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Backend configuration; exactly one field must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake: Option<FakeProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitlabProviderConfig>,
    // Cloud backends are accepted in the schema but have no built-in binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcpsm: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azurekv: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyhub: Option<serde_json::Value>,
}

impl ProviderConfig {
    /// Every backend field that is set, in declaration order
    pub fn configured_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds = Vec::new();
        if self.fake.is_some() {
            kinds.push(ProviderKind::Fake);
        }
        if self.vault.is_some() {
            kinds.push(ProviderKind::Vault);
        }
        if self.webhook.is_some() {
            kinds.push(ProviderKind::Webhook);
        }
        if self.gitlab.is_some() {
            kinds.push(ProviderKind::Gitlab);
        }
        if self.aws.is_some() {
            kinds.push(ProviderKind::Aws);
        }
        if self.gcpsm.is_some() {
            kinds.push(ProviderKind::Gcpsm);
        }
        if self.azurekv.is_some() {
            kinds.push(ProviderKind::Azurekv);
        }
        if self.keyhub.is_some() {
            kinds.push(ProviderKind::Keyhub);
        }
        kinds
    }
}

/// Snapshot of one store object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    #[serde(flatten)]
    pub identity: StoreIdentity,
    /// Opaque token that changes whenever the store object changes
    #[serde(default)]
    pub resource_version: String,
    pub provider: ProviderConfig,
}

impl StoreSpec {
    pub fn new(identity: StoreIdentity, resource_version: impl Into<String>, provider: ProviderConfig) -> Self {
        Self { identity, resource_version: resource_version.into(), provider }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Namespace of a namespaced store
    pub fn namespace(&self) -> Option<&str> {
        self.identity.namespace.as_deref()
    }

    /// Resolve the namespace a selector points at, defaulting to the store's namespace
    pub fn selector_namespace<'a>(&'a self, selector: &'a SecretKeySelector) -> Option<&'a str> {
        selector.namespace.as_deref().or(self.namespace())
    }
}
