//! Local target secrets and the policy rules for writing them.
//!
//! Planning is pure: [`plan`] turns the creation/deletion policies, the current
//! target and the freshly resolved data into one [`TargetAction`]. Applying the
//! action is the only step touching a [`TargetStore`].

use crate::domain::{CreationPolicy, DeletionPolicy, SecretData, TargetSpec};
use crate::errors::{Result, SyncError};
use crate::push::OwnershipMarker;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// A locally held secret
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSecret {
    pub data: SecretData,
    pub labels: BTreeMap<String, String>,
    /// Keys the synchronizer wrote, removed again by `deletionPolicy=Merge`
    pub managed_keys: BTreeSet<String>,
}

impl TargetSecret {
    pub fn new(data: SecretData) -> Self {
        let managed_keys = data.keys().cloned().collect();
        Self { data, labels: BTreeMap::new(), managed_keys }
    }
}

/// Storage for local target secrets, supplied by the embedding layer
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetSecret>>;
    async fn put(&self, namespace: &str, name: &str, secret: TargetSecret) -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// In-memory [`TargetStore`] counting writes
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    secrets: RwLock<BTreeMap<(String, String), TargetSecret>>,
    writes: AtomicUsize,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<TargetSecret> {
        self.secrets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Seed a secret without counting a write
    pub fn insert(&self, namespace: &str, name: &str, secret: TargetSecret) {
        self.secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetSecret>> {
        Ok(self.secret(namespace, name))
    }

    async fn put(&self, namespace: &str, name: &str, secret: TargetSecret) -> Result<()> {
        self.insert(namespace, name, secret);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(namespace.to_string(), name.to_string()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Result of resolving every entry of a desired secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Data(SecretData),
    /// Every referenced remote entry is gone
    AllNotFound,
}

/// What to do with the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAction {
    Write { secret: TargetSecret, created: bool },
    Delete,
    Unchanged,
    /// `creationPolicy=Merge` with no target to merge into yet
    Wait,
    /// `creationPolicy=None`
    Skip,
}

/// Outcome reported for one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Waiting,
    Skipped,
}

impl TargetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOutcome::Created => "created",
            TargetOutcome::Updated => "updated",
            TargetOutcome::Unchanged => "unchanged",
            TargetOutcome::Deleted => "deleted",
            TargetOutcome::Waiting => "waiting",
            TargetOutcome::Skipped => "skipped",
        }
    }
}

fn write_if_changed(existing: Option<&TargetSecret>, secret: TargetSecret) -> TargetAction {
    match existing {
        Some(current) if *current == secret => TargetAction::Unchanged,
        Some(_) => TargetAction::Write { secret, created: false },
        None => TargetAction::Write { secret, created: true },
    }
}

/// Decide how the target changes.
///
/// `Retain` with nothing found is an error carrying `target`; the caller
/// surfaces it as NotFound.
pub fn plan(
    policy: &TargetSpec,
    target: &str,
    existing: Option<&TargetSecret>,
    resolved: Resolved,
    marker: &OwnershipMarker,
) -> Result<TargetAction> {
    let owned = existing.map(|s| marker.is_owned(&s.labels));

    match resolved {
        Resolved::Data(data) => match policy.creation_policy {
            CreationPolicy::None => Ok(TargetAction::Skip),
            CreationPolicy::Owner => {
                if owned == Some(false) {
                    return Err(SyncError::not_managed(target, marker.value.clone()));
                }
                let mut secret = TargetSecret::new(data);
                if let Some(current) = existing {
                    secret.labels = current.labels.clone();
                }
                marker.stamp(&mut secret.labels);
                Ok(write_if_changed(existing, secret))
            }
            CreationPolicy::Orphan => {
                let mut secret = TargetSecret::new(data);
                if let Some(current) = existing {
                    secret.labels = current.labels.clone();
                }
                Ok(write_if_changed(existing, secret))
            }
            CreationPolicy::Merge => {
                let Some(current) = existing else {
                    return Ok(TargetAction::Wait);
                };
                let mut secret = current.clone();
                secret.managed_keys.extend(data.keys().cloned());
                secret.data.extend(data);
                Ok(write_if_changed(existing, secret))
            }
        },
        Resolved::AllNotFound => match policy.deletion_policy {
            DeletionPolicy::Retain => Err(SyncError::not_found(target)),
            DeletionPolicy::Delete => match owned {
                None => Ok(TargetAction::Unchanged),
                Some(false) => Err(SyncError::not_managed(target, marker.value.clone())),
                Some(true) => Ok(TargetAction::Delete),
            },
            DeletionPolicy::Merge => {
                let Some(current) = existing else {
                    return Ok(TargetAction::Unchanged);
                };
                let mut secret = current.clone();
                for key in std::mem::take(&mut secret.managed_keys) {
                    secret.data.remove(&key);
                }
                Ok(write_if_changed(existing, secret))
            }
        },
    }
}

/// Carry out a planned action
pub async fn apply<T: TargetStore + ?Sized>(
    store: &T,
    namespace: &str,
    name: &str,
    action: TargetAction,
) -> Result<TargetOutcome> {
    match action {
        TargetAction::Write { secret, created } => {
            store.put(namespace, name, secret).await?;
            Ok(if created { TargetOutcome::Created } else { TargetOutcome::Updated })
        }
        TargetAction::Delete => {
            store.delete(namespace, name).await?;
            Ok(TargetOutcome::Deleted)
        }
        TargetAction::Unchanged => Ok(TargetOutcome::Unchanged),
        TargetAction::Wait => Ok(TargetOutcome::Waiting),
        TargetAction::Skip => Ok(TargetOutcome::Skipped),
    }
}
