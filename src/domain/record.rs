//! Records as held by backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output of multi-key reads: key to raw bytes, in key order
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// One remote record: its primary value plus tags/labels
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Key or display name used for multi-record naming
    pub name: String,
    pub value: Vec<u8>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RemoteRecord {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), value: value.into(), tags: BTreeMap::new() }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}
