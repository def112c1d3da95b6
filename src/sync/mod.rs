//! # Synchronization
//!
//! [`SecretSynchronizer`] ties the pieces together for one declarative object:
//! validate, look up the store, get a cached client, resolve every entry, then
//! plan and apply the target write. Pushes run the other direction, from a
//! local secret to one or more stores.
//!
//! Reconciles of the same object are single-flight; distinct objects run in
//! parallel. Scheduling (timers, watches, retries) belongs to the caller.

pub mod target;

pub use target::{
    apply, plan, MemoryTargetStore, Resolved, TargetAction, TargetOutcome, TargetSecret, TargetStore,
};

use crate::cache::{with_cancel, KeyedMutex, StoreClientCache};
use crate::config::AppConfig;
use crate::domain::{
    DeletionPolicy, ExternalSecret, PushDeletionPolicy, PushSecret, SecretData, SourceRef, StoreIdentity, StoreKind,
    StoreRef, StoreSpec,
};
use crate::errors::{Result, SyncError};
use crate::observability::MetricsRecorder;
use crate::providers::{ProviderRegistry, SecretKeyResolver, SecretsClient};
use crate::push::{DeleteOutcome, OwnershipMarker, PushOutcome};
use crate::validation::{validate_external_secret, validate_push_secret, validate_store};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Source of store objects, supplied by the embedding layer
#[async_trait]
pub trait StoreCatalog: Send + Sync {
    /// The store `store_ref` names, as seen from `namespace`
    async fn store(&self, namespace: &str, store_ref: &StoreRef) -> Result<StoreSpec>;
}

/// In-memory [`StoreCatalog`]
#[derive(Debug, Default)]
pub struct MemoryStoreCatalog {
    stores: RwLock<HashMap<StoreIdentity, StoreSpec>>,
}

impl MemoryStoreCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a store
    pub fn insert(&self, store: StoreSpec) {
        self.stores
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(store.identity.clone(), store);
    }

    pub fn remove(&self, identity: &StoreIdentity) -> Option<StoreSpec> {
        self.stores.write().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(identity)
    }
}

fn identity_for(namespace: &str, store_ref: &StoreRef) -> StoreIdentity {
    match store_ref.kind {
        StoreKind::SecretStore => StoreIdentity::namespaced(namespace, store_ref.name.clone()),
        StoreKind::ClusterSecretStore => StoreIdentity::cluster(store_ref.name.clone()),
    }
}

#[async_trait]
impl StoreCatalog for MemoryStoreCatalog {
    async fn store(&self, namespace: &str, store_ref: &StoreRef) -> Result<StoreSpec> {
        let identity = identity_for(namespace, store_ref);
        self.stores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&identity)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("store {}", identity)))
    }
}

/// Clients used within one pass, keyed by store reference
type PassClients = HashMap<StoreRef, Arc<dyn SecretsClient>>;

pub struct SecretSynchronizer {
    registry: Arc<ProviderRegistry>,
    clients: StoreClientCache,
    stores: Arc<dyn StoreCatalog>,
    targets: Arc<dyn TargetStore>,
    marker: OwnershipMarker,
    default_refresh: Duration,
    in_flight: KeyedMutex<String>,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for SecretSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSynchronizer")
            .field("registry", &self.registry)
            .field("clients", &self.clients)
            .field("marker", &self.marker)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SecretSynchronizer {
    pub fn new(
        config: &AppConfig,
        registry: Arc<ProviderRegistry>,
        resolver: Arc<dyn SecretKeyResolver>,
        stores: Arc<dyn StoreCatalog>,
        targets: Arc<dyn TargetStore>,
    ) -> Self {
        let clients = StoreClientCache::new(Arc::clone(&registry), resolver, config.cache.client_capacity);
        Self {
            registry,
            clients,
            stores,
            targets,
            marker: OwnershipMarker::from_config(&config.protocol),
            default_refresh: config.protocol.default_refresh_interval(),
            in_flight: KeyedMutex::new(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn clients(&self) -> &StoreClientCache {
        &self.clients
    }

    /// Delay before the next scheduled refresh; `None` when refreshing is disabled
    pub fn refresh_interval(&self, object: &ExternalSecret) -> Option<Duration> {
        let interval = object.spec.refresh_interval(self.default_refresh);
        (!interval.is_zero()).then_some(interval)
    }

    async fn client(
        &self,
        pass: &mut PassClients,
        namespace: &str,
        store_ref: &StoreRef,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SecretsClient>> {
        if let Some(client) = pass.get(store_ref) {
            return Ok(Arc::clone(client));
        }
        let store = self.stores.store(namespace, store_ref).await?;
        for warning in validate_store(&self.registry, &store)? {
            warn!(store = %store.identity, warning = %warning, "Store validation warning");
        }
        let client = self.clients.client_for(&store, cancel).await?;
        pass.insert(store_ref.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Reconcile one desired secret into its local target.
    pub async fn reconcile(&self, object: &ExternalSecret, cancel: &CancellationToken) -> Result<TargetOutcome> {
        let span = crate::reconcile_span!("ExternalSecret", object.object_key());
        let result: Result<TargetOutcome> = async {
            let _guard =
                with_cancel(cancel, "reconcile", self.in_flight.lock(format!("ExternalSecret/{}", object.object_key())))
                    .await?;
            validate_external_secret(&object.spec)?;

            let resolved = self.resolve(object, cancel).await?;
            let target = object.target_name();
            let existing = self.targets.get(&object.namespace, target).await?;
            let action = plan(&object.spec.target, target, existing.as_ref(), resolved, &self.marker)?;
            let outcome = apply(self.targets.as_ref(), &object.namespace, target, action).await?;

            info!(target = %target, outcome = outcome.as_str(), "Reconciled external secret");
            Ok(outcome)
        }
        .instrument(span)
        .await;

        self.record("ExternalSecret", &object.object_key(), &result);
        result
    }

    /// Fetch every entry; `data[]` wins over `dataFrom[]` on key collision
    async fn resolve(&self, object: &ExternalSecret, cancel: &CancellationToken) -> Result<Resolved> {
        let spec = &object.spec;
        let tolerate_missing = spec.target.deletion_policy != DeletionPolicy::Retain;
        let mut pass = PassClients::new();
        let mut output = SecretData::new();
        let mut missing = 0usize;

        for source in &spec.data_from {
            let store_ref = store_for(source.source_ref.as_ref(), &spec.secret_store_ref)?;
            let client = self.client(&mut pass, &object.namespace, store_ref, cancel).await?;
            let result = match (&source.extract, &source.find) {
                (Some(remote_ref), _) => client.get_secret_map(remote_ref, cancel).await,
                (None, Some(query)) => client.get_all_secrets(query, cancel).await,
                (None, None) => continue,
            };
            match result {
                Ok(map) => output.extend(map),
                Err(e) if e.is_not_found() && tolerate_missing => {
                    debug!(error = %e, "dataFrom entry not found");
                    missing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for data in &spec.data {
            let store_ref = store_for(data.source_ref.as_ref(), &spec.secret_store_ref)?;
            let client = self.client(&mut pass, &object.namespace, store_ref, cancel).await?;
            match client.get_secret(&data.remote_ref, cancel).await {
                Ok(value) => {
                    output.insert(data.secret_key.clone(), value);
                }
                Err(e) if e.is_not_found() && tolerate_missing => {
                    debug!(secret_key = %data.secret_key, error = %e, "data entry not found");
                    missing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if output.is_empty() && missing > 0 {
            Ok(Resolved::AllNotFound)
        } else {
            Ok(Resolved::Data(output))
        }
    }

    /// Push every entry of a push declaration to every referenced store.
    pub async fn push(&self, object: &PushSecret, cancel: &CancellationToken) -> Result<Vec<PushOutcome>> {
        let span = crate::reconcile_span!("PushSecret", object.object_key());
        let result: Result<Vec<PushOutcome>> = async {
            let _guard =
                with_cancel(cancel, "push", self.in_flight.lock(format!("PushSecret/{}", object.object_key()))).await?;
            validate_push_secret(&object.spec)?;

            let source = self
                .targets
                .get(&object.namespace, &object.spec.source_secret)
                .await?
                .ok_or_else(|| SyncError::not_found(format!("secret {}/{}", object.namespace, object.spec.source_secret)))?;

            let mut pass = PassClients::new();
            let mut outcomes = Vec::with_capacity(object.spec.data.len() * object.spec.secret_store_refs.len());
            for store_ref in &object.spec.secret_store_refs {
                let client = self.client(&mut pass, &object.namespace, store_ref, cancel).await?;
                for data in &object.spec.data {
                    let outcome = client.push_secret(&source.data, data, cancel).await?;
                    debug!(store = %store_ref.name, remote_key = %data.remote_key, outcome = outcome.as_str(), "Pushed");
                    self.metrics.record_push_outcome(outcome.as_str());
                    outcomes.push(outcome);
                }
            }
            info!(pushed = outcomes.len(), "Reconciled push secret");
            Ok(outcomes)
        }
        .instrument(span)
        .await;

        self.record("PushSecret", &object.object_key(), &result);
        result
    }

    /// Remove what a push declaration wrote, when its deletion policy asks for it.
    pub async fn delete_pushed(&self, object: &PushSecret, cancel: &CancellationToken) -> Result<Vec<DeleteOutcome>> {
        if object.spec.deletion_policy == PushDeletionPolicy::None {
            return Ok(Vec::new());
        }
        let span = crate::reconcile_span!("PushSecret", object.object_key(), deleting = true);
        let result: Result<Vec<DeleteOutcome>> = async {
            let _guard =
                with_cancel(cancel, "delete", self.in_flight.lock(format!("PushSecret/{}", object.object_key()))).await?;

            let mut pass = PassClients::new();
            let mut outcomes = Vec::new();
            for store_ref in &object.spec.secret_store_refs {
                let client = self.client(&mut pass, &object.namespace, store_ref, cancel).await?;
                for data in &object.spec.data {
                    let outcome = client.delete_secret(data, cancel).await?;
                    self.metrics.record_push_outcome(outcome.as_str());
                    outcomes.push(outcome);
                }
            }
            Ok(outcomes)
        }
        .instrument(span)
        .await;

        self.record("PushSecret", &object.object_key(), &result);
        result
    }

    fn record<T>(&self, kind: &str, object: &str, result: &Result<T>) {
        self.metrics.record_reconcile(kind, result.is_ok());
        if let Err(e) = result {
            warn!(kind = %kind, object = %object, retryable = e.is_retryable(), error = %e, "Reconciliation failed");
        }
    }
}

/// The store an entry reads from; generators are not supported
fn store_for<'a>(source: Option<&'a SourceRef>, default: &'a StoreRef) -> Result<&'a StoreRef> {
    match source {
        Some(SourceRef { generator_ref: Some(generator), .. }) => {
            Err(SyncError::unsupported(format!("generatorRef {}/{}", generator.kind, generator.name), "synchronizer"))
        }
        Some(SourceRef { store_ref: Some(store_ref), .. }) => Ok(store_ref),
        _ => Ok(default),
    }
}
