//! Cache of constructed backend clients.
//!
//! Building a client usually means authenticating against the backend, so each
//! store keeps one client per resource version. A client replaced by a new
//! store version or evicted for capacity is closed; eviction only costs a
//! reconstruction.

use super::versioned::{VersionToken, VersionedCache};
use crate::domain::{StoreIdentity, StoreSpec};
use crate::errors::Result;
use crate::providers::{GuardedClient, ProviderRegistry, SecretKeyResolver, SecretsClient};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct StoreClientCache {
    clients: VersionedCache<StoreIdentity, Arc<dyn SecretsClient>>,
    registry: Arc<ProviderRegistry>,
    resolver: Arc<dyn SecretKeyResolver>,
}

impl StoreClientCache {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resolver: Arc<dyn SecretKeyResolver>,
        capacity: usize,
    ) -> Self {
        Self { clients: VersionedCache::new("clients", capacity), registry, resolver }
    }

    /// Client for `store`, built through its provider on first use or after a version change.
    ///
    /// The returned client enforces the provider's capability set.
    pub async fn client_for(
        &self,
        store: &StoreSpec,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SecretsClient>> {
        let descriptor = self.registry.lookup(store)?;
        let version = VersionToken::new(store.resource_version.clone());

        self.get_or_create(store.identity.clone(), version, cancel, || async {
            let client = descriptor.provider.new_client(store, Arc::clone(&self.resolver)).await?;
            info!(
                store = %store.identity,
                provider = %descriptor.kind,
                version = %store.resource_version,
                "Constructed store client"
            );
            let guarded: Arc<dyn SecretsClient> =
                Arc::new(GuardedClient::new(client, descriptor.kind, descriptor.capabilities));
            Ok(guarded)
        })
        .await
    }

    /// At most one `factory` call per `(identity, version)` among concurrent callers.
    /// Failures are not cached. A client displaced by the new one is closed.
    pub async fn get_or_create<F, Fut>(
        &self,
        identity: StoreIdentity,
        version: VersionToken,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Arc<dyn SecretsClient>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn SecretsClient>>>,
    {
        let (client, displaced) =
            self.clients.get_or_replace_with(identity.clone(), version, cancel, factory).await?;
        if let Some(previous) = displaced {
            if let Err(e) = previous.close().await {
                warn!(replaced_by = %identity, error = %e, "Failed to close displaced store client");
            }
        }
        Ok(client)
    }

    /// Drop the cached client for a store, closing it
    pub async fn invalidate(&self, identity: &StoreIdentity) -> Result<()> {
        if let Some(client) = self.clients.remove(identity) {
            client.close().await?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for StoreClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClientCache").field("cached_clients", &self.clients.len()).finish()
    }
}
