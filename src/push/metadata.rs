//! Push metadata document.
//!
//! ```yaml
//! apiVersion: secretsync.io/v1alpha1
//! kind: PushSecretMetadata
//! spec:
//!   tags:
//!     team: payments
//!   expirationDate: "2027-01-01T00:00:00Z"
//!   mergePolicy: Replace   # provider specific, passed through
//! ```

use crate::errors::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const METADATA_API_VERSION: &str = "secretsync.io/v1alpha1";
pub const METADATA_KIND: &str = "PushSecretMetadata";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    api_version: String,
    kind: String,
    #[serde(default)]
    spec: MetadataSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataSpec {
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(flatten)]
    passthrough: serde_json::Map<String, serde_json::Value>,
}

/// Backend-agnostic hints extracted from a push metadata document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PushMetadata {
    /// Tags stamped on the remote record next to the ownership marker
    pub tags: BTreeMap<String, String>,
    pub expiration: Option<DateTime<Utc>>,
    /// Provider-specific fields, not examined here
    pub passthrough: serde_json::Map<String, serde_json::Value>,
}

impl PushMetadata {
    /// Parse an optional document; absence yields empty metadata
    pub fn parse(document: Option<&serde_json::Value>) -> Result<Self> {
        let Some(document) = document else {
            return Ok(Self::default());
        };

        let doc: MetadataDocument = serde_json::from_value(document.clone())
            .map_err(|e| SyncError::config_with_source("Invalid push metadata document", Box::new(e)))?;

        if doc.api_version != METADATA_API_VERSION {
            return Err(SyncError::config(format!(
                "unsupported push metadata apiVersion {}, expected {}",
                doc.api_version, METADATA_API_VERSION
            )));
        }
        if doc.kind != METADATA_KIND {
            return Err(SyncError::config(format!(
                "unsupported push metadata kind {}, expected {}",
                doc.kind, METADATA_KIND
            )));
        }

        let expiration = doc
            .spec
            .expiration_date
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(|e| {
                    SyncError::config_with_source(
                        format!("expirationDate {} is not an RFC 3339 timestamp", raw),
                        Box::new(e),
                    )
                })
            })
            .transpose()?;

        Ok(Self { tags: doc.spec.tags, expiration, passthrough: doc.spec.passthrough })
    }
}
