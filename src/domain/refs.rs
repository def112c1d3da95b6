//! References into backends and into locally held secrets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Points at one key of a locally held secret (credentials for a backend)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretKeySelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self { name: name.into(), key: key.into(), namespace: None }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Whether the resolver reads a record's value or its tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetadataPolicy {
    #[default]
    None,
    Fetch,
}

/// A single-value request against a backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub key: String,
    /// Property or dotted path; empty selects the provider's default property
    #[serde(default)]
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata_policy: MetadataPolicy,
}

impl RemoteRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ..Default::default() }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn fetch_metadata(mut self) -> Self {
        self.metadata_policy = MetadataPolicy::Fetch;
        self
    }
}

/// Name filter of a find query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FindName {
    /// Regular expression matched anywhere in the record name
    pub regexp: String,
}

/// A multi-record request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindQuery {
    /// Only records whose key starts with this prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<FindName>,
    /// Every listed tag must be present with the same value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl FindQuery {
    pub fn by_name(regexp: impl Into<String>) -> Self {
        Self { name: Some(FindName { regexp: regexp.into() }), ..Default::default() }
    }

    pub fn by_tags<I, K, V>(tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Default::default()
        }
    }
}

/// A write request: which local key goes to which remote key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSecretData {
    pub remote_key: String,
    /// Key of the local secret holding the value; empty pushes the whole secret as JSON
    #[serde(default)]
    pub secret_key: String,
    /// When set, the value is merged into a JSON object under this property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Versioned push metadata document, see [`crate::push::PushMetadata`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl PushSecretData {
    pub fn new(remote_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { remote_key: remote_key.into(), secret_key: secret_key.into(), ..Default::default() }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Property to merge into, with an empty string treated as unset
    pub fn property(&self) -> Option<&str> {
        self.property.as_deref().filter(|p| !p.is_empty())
    }
}
