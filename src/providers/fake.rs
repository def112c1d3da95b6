//! In-memory provider.
//!
//! Holds records in process memory, one backing store per store identity, so
//! data survives client reconstruction. Reads use the versioned record cache
//! exactly like a remote backend would (cheap version probe, expensive fetch),
//! and writes go through the shared ownership protocol. Used by tests and for
//! local development.

use super::{Capabilities, Provider, SecretKeyResolver, SecretsClient, ValidationResult, VersionedRecord};
use crate::cache::{VersionToken, VersionedCache};
use crate::domain::{FindQuery, PushSecretData, RemoteRecord, RemoteRef, SecretData, StoreIdentity, StoreSpec};
use crate::errors::{Result, SyncError, ValidationErrors};
use crate::observability::MetricsRecorder;
use crate::push::{
    extract_push_value, DeleteOutcome, OwnershipMarker, OwnershipProtocol, PushMetadata, PushOutcome, RecordStore,
    RemoteObject,
};
use crate::resolver::{resolve_many, resolve_ref, resolve_ref_map, FindMatcher};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Property used when a reference leaves it empty
pub const DEFAULT_PROPERTY: &str = "password";

/// One record to seed the backing store with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FakeRecordSeed {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FakeProviderConfig {
    #[serde(default)]
    pub data: Vec<FakeRecordSeed>,
}

#[derive(Debug, Clone)]
struct FakeEntry {
    value: Vec<u8>,
    tags: BTreeMap<String, String>,
    version: u64,
}

/// Backing store of one fake store, with call counters for assertions
#[derive(Debug, Default)]
pub struct FakeBackend {
    records: RwLock<BTreeMap<String, FakeEntry>>,
    next_version: AtomicU64,
    probes: AtomicUsize,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl FakeBackend {
    fn records(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, FakeEntry>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn records_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, FakeEntry>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Put a record directly, bypassing ownership checks and counters
    pub fn set_record(&self, key: &str, value: impl Into<Vec<u8>>, tags: BTreeMap<String, String>) {
        let version = self.bump();
        self.records_mut().insert(key.to_string(), FakeEntry { value: value.into(), tags, version });
    }

    /// Value and tags of a record, bypassing counters
    pub fn record(&self, key: &str) -> Option<RemoteObject> {
        self.records().get(key).map(|e| RemoteObject { value: e.value.clone(), tags: e.tags.clone() })
    }

    /// Cheap freshness probes served
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Full record fetches served
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Creates, updates and deletes served
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn probe(&self, key: &str) -> Result<VersionToken> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.records()
            .get(key)
            .map(|e| VersionToken::from(e.version))
            .ok_or_else(|| SyncError::not_found(key))
    }

    fn fetch(&self, key: &str) -> Result<(VersionToken, VersionedRecord)> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let records = self.records();
        let entry = records.get(key).ok_or_else(|| SyncError::not_found(key))?;
        let record = RemoteRecord { name: key.to_string(), value: entry.value.clone(), tags: entry.tags.clone() };
        let snapshot = VersionedRecord::new(entry.version, record);
        Ok((snapshot.version.clone(), snapshot))
    }

    fn list(&self, matcher: &FindMatcher) -> Vec<String> {
        self.records()
            .iter()
            .filter(|(key, entry)| matcher.matches(key, &entry.tags))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for FakeBackend {
    async fn read(&self, key: &str) -> Result<Option<RemoteObject>> {
        Ok(self.record(key))
    }

    async fn create(&self, key: &str, object: RemoteObject) -> Result<()> {
        let version = self.bump();
        let mut records = self.records_mut();
        if records.contains_key(key) {
            return Err(SyncError::internal(format!("record {} already exists", key)));
        }
        records.insert(key.to_string(), FakeEntry { value: object.value, tags: object.tags, version });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, key: &str, object: RemoteObject) -> Result<()> {
        let version = self.bump();
        let mut records = self.records_mut();
        let entry = records.get_mut(key).ok_or_else(|| SyncError::not_found(key))?;
        *entry = FakeEntry { value: object.value, tags: object.tags, version };
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records_mut().remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider for in-memory stores
#[derive(Debug)]
pub struct FakeProvider {
    marker: OwnershipMarker,
    record_capacity: usize,
    backends: DashMap<StoreIdentity, Arc<FakeBackend>>,
}

impl FakeProvider {
    pub fn new(marker: OwnershipMarker, record_capacity: usize) -> Self {
        Self { marker, record_capacity, backends: DashMap::new() }
    }

    /// Backing store of a store identity, if a client was ever built for it
    pub fn backend(&self, identity: &StoreIdentity) -> Option<Arc<FakeBackend>> {
        self.backends.get(identity).map(|b| Arc::clone(&b))
    }

    fn backend_for(&self, store: &StoreSpec, config: &FakeProviderConfig) -> Arc<FakeBackend> {
        let entry = self.backends.entry(store.identity.clone()).or_insert_with(|| {
            let backend = FakeBackend::default();
            for seed in &config.data {
                backend.set_record(&seed.key, seed.value.clone(), seed.tags.clone());
            }
            Arc::new(backend)
        });
        Arc::clone(&entry)
    }
}

fn fake_config(store: &StoreSpec) -> Result<&FakeProviderConfig> {
    store
        .provider
        .fake
        .as_ref()
        .ok_or_else(|| SyncError::config(format!("store {} has no fake provider configured", store.name())))
}

#[async_trait]
impl Provider for FakeProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadWrite
    }

    fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>> {
        let config = fake_config(store)?;
        let mut errors = ValidationErrors::new();
        let mut seen = HashSet::new();
        for (i, seed) in config.data.iter().enumerate() {
            if seed.key.is_empty() {
                errors.push(format!("data[{}].key", i), "cannot be empty");
            } else if !seen.insert(seed.key.as_str()) {
                errors.push(format!("data[{}].key", i), format!("duplicate key {}", seed.key));
            }
        }
        errors.into_result()?;
        Ok(Vec::new())
    }

    async fn new_client(
        &self,
        store: &StoreSpec,
        _auth: Arc<dyn SecretKeyResolver>,
    ) -> Result<Arc<dyn SecretsClient>> {
        let config = fake_config(store)?;
        Ok(Arc::new(FakeClient {
            backend: self.backend_for(store, config),
            records: VersionedCache::new("fake_records", self.record_capacity),
            protocol: OwnershipProtocol::new(self.marker.clone()),
            metrics: MetricsRecorder::new(),
        }))
    }
}

/// Client over one fake backing store
#[derive(Debug)]
pub struct FakeClient {
    backend: Arc<FakeBackend>,
    records: VersionedCache<String, VersionedRecord>,
    protocol: OwnershipProtocol,
    metrics: MetricsRecorder,
}

impl FakeClient {
    async fn snapshot(&self, key: &str, cancel: &CancellationToken) -> Result<VersionedRecord> {
        let backend = &self.backend;
        let result = self
            .records
            .get_or_fetch(
                key.to_string(),
                cancel,
                || async move { backend.probe(key) },
                || async move { backend.fetch(key) },
            )
            .await;
        self.metrics.record_backend_call("fake", "get_secret", result.is_ok());
        result
    }

    async fn record(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<RemoteRecord> {
        self.snapshot(&remote_ref.key, cancel).await?.pinned(remote_ref.version.as_deref())
    }
}

#[async_trait]
impl SecretsClient for FakeClient {
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref(&record, remote_ref, Some(DEFAULT_PROPERTY))
    }

    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref_map(&record, remote_ref)
    }

    async fn get_all_secrets(&self, query: &FindQuery, cancel: &CancellationToken) -> Result<SecretData> {
        let matcher = FindMatcher::new(query)?;
        let keys = self.backend.list(&matcher);
        debug!(matched = keys.len(), "Fake find query evaluated");

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.snapshot(&key, cancel).await {
                Ok(snapshot) => records.push(snapshot.record),
                // Deleted between listing and fetching
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        resolve_many(&records, "")
    }

    async fn push_secret(
        &self,
        source: &SecretData,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let value = extract_push_value(source, data)?;
        let metadata = PushMetadata::parse(data.metadata.as_ref())?;
        self.protocol.push(self.backend.as_ref(), data, value, &metadata, cancel).await
    }

    async fn delete_secret(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<DeleteOutcome> {
        self.protocol.delete(self.backend.as_ref(), data, cancel).await
    }

    async fn secret_exists(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<bool> {
        self.protocol.exists(self.backend.as_ref(), data, cancel).await
    }

    async fn validate(&self) -> Result<ValidationResult> {
        Ok(ValidationResult::Ready)
    }

    async fn close(&self) -> Result<()> {
        debug!(cached = self.records.len(), "Closing fake client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderConfig;
    use crate::providers::StaticSecretResolver;

    fn store(seeds: Vec<FakeRecordSeed>) -> StoreSpec {
        StoreSpec::new(
            StoreIdentity::namespaced("team-a", "fake"),
            "1",
            ProviderConfig { fake: Some(FakeProviderConfig { data: seeds }), ..Default::default() },
        )
    }

    fn seed(key: &str, value: &str) -> FakeRecordSeed {
        FakeRecordSeed { key: key.to_string(), value: value.to_string(), tags: BTreeMap::new() }
    }

    async fn client(provider: &FakeProvider, spec: &StoreSpec) -> Arc<dyn SecretsClient> {
        provider.new_client(spec, Arc::new(StaticSecretResolver::new())).await.unwrap()
    }

    fn provider() -> FakeProvider {
        FakeProvider::new(OwnershipMarker::new("managed-by", "secretsync"), 32)
    }

    #[tokio::test]
    async fn test_reads_revalidate_through_record_cache() {
        let provider = provider();
        let spec = store(vec![seed("db-creds", r#"{"password":"s3cr3t"}"#)]);
        let client = client(&provider, &spec).await;
        let backend = provider.backend(&spec.identity).unwrap();
        let cancel = CancellationToken::new();

        let value = client.get_secret(&RemoteRef::new("db-creds"), &cancel).await.unwrap();
        assert_eq!(value, b"s3cr3t");
        assert_eq!((backend.probe_count(), backend.fetch_count()), (0, 1));

        client.get_secret(&RemoteRef::new("db-creds"), &cancel).await.unwrap();
        assert_eq!((backend.probe_count(), backend.fetch_count()), (1, 1));

        backend.set_record("db-creds", r#"{"password":"rotated"}"#, BTreeMap::new());
        let value = client.get_secret(&RemoteRef::new("db-creds"), &cancel).await.unwrap();
        assert_eq!(value, b"rotated");
        assert_eq!(backend.fetch_count(), 2);
    }

    async fn read_concurrently(client: &Arc<dyn SecretsClient>, key: &str, callers: usize) -> Vec<Vec<u8>> {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let client = Arc::clone(client);
                let remote_ref = RemoteRef::new(key);
                tokio::spawn(async move { client.get_secret(&remote_ref, &CancellationToken::new()).await })
            })
            .collect();
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }
        values
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_reads_fetch_once() {
        let provider = provider();
        let spec = store(vec![seed("db-creds", r#"{"password":"s3cr3t"}"#)]);
        let client = client(&provider, &spec).await;
        let backend = provider.backend(&spec.identity).unwrap();

        let values = read_concurrently(&client, "db-creds", 16).await;

        assert!(values.iter().all(|v| v == b"s3cr3t"));
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_refetch_once() {
        let provider = provider();
        let spec = store(vec![seed("db-creds", r#"{"password":"s3cr3t"}"#)]);
        let client = client(&provider, &spec).await;
        let backend = provider.backend(&spec.identity).unwrap();
        client.get_secret(&RemoteRef::new("db-creds"), &CancellationToken::new()).await.unwrap();
        assert_eq!(backend.fetch_count(), 1);

        backend.set_record("db-creds", r#"{"password":"rotated"}"#, BTreeMap::new());
        let values = read_concurrently(&client, "db-creds", 16).await;

        assert!(values.iter().all(|v| v == b"rotated"));
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let provider = provider();
        let client = client(&provider, &store(vec![])).await;
        let err = client.get_secret(&RemoteRef::new("nope"), &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_explicit_version_must_match() {
        let provider = provider();
        let client = client(&provider, &store(vec![seed("k", "v")])).await;
        let cancel = CancellationToken::new();
        assert_eq!(client.get_secret(&RemoteRef::new("k").with_version("1"), &cancel).await.unwrap(), b"v");
        assert!(client.get_secret(&RemoteRef::new("k").with_version("9"), &cancel).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_backend_survives_client_rebuild() {
        let provider = provider();
        let spec = store(vec![]);
        let cancel = CancellationToken::new();
        let mut source = SecretData::new();
        source.insert("token".to_string(), b"abc".to_vec());

        let first = client(&provider, &spec).await;
        first.push_secret(&source, &PushSecretData::new("app/token", "token"), &cancel).await.unwrap();

        let second = client(&provider, &spec).await;
        assert_eq!(second.get_secret(&RemoteRef::new("app/token"), &cancel).await.unwrap(), b"abc");
    }

    #[test]
    fn test_validate_store_rejects_duplicate_keys() {
        let provider = provider();
        let err = provider.validate_store(&store(vec![seed("a", "1"), seed("a", "2"), seed("", "3")])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("duplicate key a"));
        assert!(message.contains("data[2].key: cannot be empty"));
    }
}
