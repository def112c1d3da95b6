//! # Push and Ownership
//!
//! Shared write semantics for every writable backend. Backends supply four
//! primitives through [`RecordStore`]; [`OwnershipProtocol`] decides what to
//! call so that this system only ever mutates records it stamped itself, and
//! repeating a push with the same input is a no-op.

pub mod metadata;

pub use metadata::{PushMetadata, METADATA_API_VERSION, METADATA_KIND};

use crate::cache::with_cancel;
use crate::config::ProtocolConfig;
use crate::domain::{PushSecretData, SecretData};
use crate::errors::{Result, SyncError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Only one property was removed; the record still holds others
    PropertyRemoved,
    Absent,
}

impl PushOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

impl DeleteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::PropertyRemoved => "property_removed",
            Self::Absent => "absent",
        }
    }
}

/// Tag identifying records owned by this system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipMarker {
    pub name: String,
    pub value: String,
}

impl OwnershipMarker {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.marker_name.clone(), config.marker_value.clone())
    }

    pub fn is_owned(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.name) == Some(&self.value)
    }

    /// Add the marker, overriding any user tag of the same name
    pub fn stamp(&self, tags: &mut BTreeMap<String, String>) {
        tags.insert(self.name.clone(), self.value.clone());
    }
}

impl fmt::Display for OwnershipMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// A record's value and tags as the backend stores them
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteObject {
    pub value: Vec<u8>,
    pub tags: BTreeMap<String, String>,
}

/// CRUD primitives a writable backend provides.
///
/// `read` reports absence as `Ok(None)`; an `Err(NotFound)` is treated the same way.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<RemoteObject>>;
    async fn create(&self, key: &str, object: RemoteObject) -> Result<()>;
    async fn update(&self, key: &str, object: RemoteObject) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Create/update/delete/exists semantics enforcing the ownership marker
#[derive(Debug, Clone)]
pub struct OwnershipProtocol {
    marker: OwnershipMarker,
}

impl OwnershipProtocol {
    pub fn new(marker: OwnershipMarker) -> Self {
        Self { marker }
    }

    pub fn marker(&self) -> &OwnershipMarker {
        &self.marker
    }

    async fn read<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteObject>> {
        match with_cancel(cancel, "read", store.read(key)).await? {
            Ok(object) => Ok(object),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// NotFound is `false`; any other read failure propagates. Ownership is not checked.
    pub async fn exists<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        Ok(self.read(store, &data.remote_key, cancel).await?.is_some())
    }

    /// Write `value` to `data.remote_key`.
    ///
    /// Absent records are created with the marker; records without the marker
    /// are refused with `NotManaged`; owned records are updated only when the
    /// value or tags differ.
    pub async fn push<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        data: &PushSecretData,
        value: Vec<u8>,
        metadata: &PushMetadata,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let key = data.remote_key.as_str();
        if key.is_empty() {
            return Err(SyncError::config("remote key must be defined"));
        }

        let current = self.read(store, key, cancel).await?;

        let mut tags = metadata.tags.clone();
        self.marker.stamp(&mut tags);

        match current {
            None => {
                let value = match data.property() {
                    Some(property) => merge_property(key, None, property, &value)?,
                    None => value,
                };
                with_cancel(cancel, "create", store.create(key, RemoteObject { value, tags })).await??;
                info!(remote_key = %key, "Created remote record");
                Ok(PushOutcome::Created)
            }
            Some(existing) if !self.marker.is_owned(&existing.tags) => {
                Err(SyncError::not_managed(key, self.marker.value.clone()))
            }
            Some(existing) => {
                let value = match data.property() {
                    Some(property) => merge_property(key, Some(&existing.value), property, &value)?,
                    None => value,
                };
                if existing.value == value && existing.tags == tags {
                    debug!(remote_key = %key, "Remote record already up to date");
                    return Ok(PushOutcome::Unchanged);
                }
                with_cancel(cancel, "update", store.update(key, RemoteObject { value, tags })).await??;
                info!(remote_key = %key, "Updated remote record");
                Ok(PushOutcome::Updated)
            }
        }
    }

    /// Delete `data.remote_key`, or only `data.property` of it.
    pub async fn delete<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome> {
        let key = data.remote_key.as_str();
        let Some(existing) = self.read(store, key, cancel).await? else {
            return Ok(DeleteOutcome::Absent);
        };
        if !self.marker.is_owned(&existing.tags) {
            return Err(SyncError::not_managed(key, self.marker.value.clone()));
        }

        if let Some(property) = data.property() {
            let mut object = decode_object(key, property, &existing.value)?;
            if object.remove(property).is_none() {
                return Ok(DeleteOutcome::Absent);
            }
            if !object.is_empty() {
                let value = serde_json::to_vec(&object)?;
                let updated = RemoteObject { value, tags: existing.tags };
                with_cancel(cancel, "update", store.update(key, updated)).await??;
                info!(remote_key = %key, property = %property, "Removed property from remote record");
                return Ok(DeleteOutcome::PropertyRemoved);
            }
        }

        with_cancel(cancel, "delete", store.delete(key)).await??;
        info!(remote_key = %key, "Deleted remote record");
        Ok(DeleteOutcome::Deleted)
    }
}

fn decode_object(
    key: &str,
    property: &str,
    raw: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        _ => Err(SyncError::ambiguous_property(key, property, "existing value is not a JSON object")),
    }
}

/// Set `property` to `value` inside the JSON object held in `existing`
fn merge_property(key: &str, existing: Option<&[u8]>, property: &str, value: &[u8]) -> Result<Vec<u8>> {
    let mut object = match existing {
        Some(raw) => decode_object(key, property, raw)?,
        None => serde_json::Map::new(),
    };
    object.insert(property.to_string(), serde_json::Value::String(String::from_utf8_lossy(value).into_owned()));
    Ok(serde_json::to_vec(&object)?)
}

/// The bytes a push sends: one key of the source secret, or all of it as a JSON object
pub fn extract_push_value(source: &SecretData, data: &PushSecretData) -> Result<Vec<u8>> {
    if data.secret_key.is_empty() {
        let object: BTreeMap<&str, String> = source
            .iter()
            .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v).into_owned()))
            .collect();
        return Ok(serde_json::to_vec(&object)?);
    }
    source.get(&data.secret_key).cloned().ok_or_else(|| {
        SyncError::config(format!("secret key {} not found in source secret", data.secret_key))
    })
}
