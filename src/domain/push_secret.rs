//! Push declarations: local secret values written out to backends.

use crate::domain::external_secret::StoreRef;
use crate::domain::refs::PushSecretData;
use serde::{Deserialize, Serialize};

/// What happens to pushed remote records when the push object goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PushDeletionPolicy {
    /// Delete every pushed record (ownership permitting)
    Delete,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSecretSpec {
    pub secret_store_refs: Vec<StoreRef>,
    /// Name of the local secret holding the values, in the object's namespace
    pub source_secret: String,
    #[serde(default)]
    pub data: Vec<PushSecretData>,
    #[serde(default)]
    pub deletion_policy: PushDeletionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSecret {
    pub name: String,
    pub namespace: String,
    pub spec: PushSecretSpec,
}

impl PushSecret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: PushSecretSpec) -> Self {
        Self { name: name.into(), namespace: namespace.into(), spec }
    }

    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
