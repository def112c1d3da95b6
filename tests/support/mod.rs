//! Shared harness for integration tests.
//!
//! Builds a synchronizer over the in-memory provider while keeping a handle on
//! the provider itself, so tests can seed records and count backend calls.

#![allow(dead_code)]

use secretsync::config::AppConfig;
use secretsync::domain::{
    ExternalSecret, ExternalSecretData, ExternalSecretSpec, ProviderConfig, ProviderKind, RemoteRef, StoreIdentity,
    StoreRef, StoreSpec,
};
use secretsync::providers::fake::{FakeBackend, FakeProvider, FakeProviderConfig};
use secretsync::providers::{MaintenanceStatus, Provider, StaticSecretResolver};
use secretsync::{MemoryStoreCatalog, MemoryTargetStore, OwnershipMarker, ProviderRegistry, SecretSynchronizer};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NAMESPACE: &str = "team-a";
pub const STORE: &str = "backend";

pub struct Harness {
    pub sync: SecretSynchronizer,
    pub provider: Arc<FakeProvider>,
    pub stores: Arc<MemoryStoreCatalog>,
    pub targets: Arc<MemoryTargetStore>,
}

impl Harness {
    pub fn new() -> Self {
        let config = AppConfig::default();
        let provider = Arc::new(FakeProvider::new(OwnershipMarker::from_config(&config.protocol), 64));
        let registry = ProviderRegistry::builder()
            .register(
                ProviderKind::Fake,
                provider.capabilities(),
                MaintenanceStatus::Maintained,
                Arc::clone(&provider) as Arc<dyn Provider>,
            )
            .unwrap()
            .build();

        let stores = Arc::new(MemoryStoreCatalog::new());
        stores.insert(fake_store(STORE, "1"));
        let targets = Arc::new(MemoryTargetStore::new());

        let sync = SecretSynchronizer::new(
            &config,
            Arc::new(registry),
            Arc::new(StaticSecretResolver::new()),
            Arc::clone(&stores) as _,
            Arc::clone(&targets) as _,
        );
        Self { sync, provider, stores, targets }
    }

    /// Backing store of the default store; built on first use through a client
    pub async fn backend(&self) -> Arc<FakeBackend> {
        let store = fake_store(STORE, "1");
        self.sync.clients().client_for(&store, &Default::default()).await.unwrap();
        self.provider.backend(&store.identity).unwrap()
    }

    pub async fn seed(&self, key: &str, value: &str) {
        self.backend().await.set_record(key, value, BTreeMap::new());
    }

    pub async fn seed_tagged(&self, key: &str, value: &str, tags: &[(&str, &str)]) {
        let tags = tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.backend().await.set_record(key, value, tags);
    }
}

pub fn fake_store(name: &str, version: &str) -> StoreSpec {
    StoreSpec::new(
        StoreIdentity::namespaced(NAMESPACE, name),
        version,
        ProviderConfig { fake: Some(FakeProviderConfig::default()), ..Default::default() },
    )
}

pub fn external_secret(name: &str, spec: ExternalSecretSpec) -> ExternalSecret {
    ExternalSecret::new(NAMESPACE, name, spec)
}

pub fn spec_with_data(entries: &[(&str, RemoteRef)]) -> ExternalSecretSpec {
    ExternalSecretSpec {
        secret_store_ref: StoreRef::secret_store(STORE),
        data: entries
            .iter()
            .map(|(secret_key, remote_ref)| ExternalSecretData {
                secret_key: secret_key.to_string(),
                remote_ref: remote_ref.clone(),
                source_ref: None,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn text(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap()
}
