//! Provider registry
//!
//! Process-lifetime mapping from provider kind to its descriptor. Built once
//! through an explicit, ordered bootstrap and read-only afterwards.

use super::fake::FakeProvider;
use super::gitlab::GitlabProvider;
use super::vault::VaultProvider;
use super::webhook::WebhookProvider;
use super::{Capabilities, MaintenanceStatus, Provider};
use crate::config::AppConfig;
use crate::domain::{ProviderKind, StoreSpec};
use crate::errors::{Result, SyncError};
use crate::push::OwnershipMarker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the core knows about one backend kind
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub capabilities: Capabilities,
    pub maintenance: MaintenanceStatus,
    pub provider: Arc<dyn Provider>,
}

/// Immutable registry of providers
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, ProviderDescriptor>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.registered_kinds()).finish()
    }
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Register the built-in providers in a fixed order
    pub fn bootstrap(config: &AppConfig) -> Result<Self> {
        let marker = OwnershipMarker::from_config(&config.protocol);
        let record_capacity = config.cache.record_capacity;

        let fake = Arc::new(FakeProvider::new(marker.clone(), record_capacity));
        let vault = Arc::new(VaultProvider::new(marker, record_capacity));
        let webhook = Arc::new(WebhookProvider::new());
        let gitlab = Arc::new(GitlabProvider::new());

        let registry = Self::builder()
            .register(ProviderKind::Fake, fake.capabilities(), MaintenanceStatus::Maintained, fake)?
            .register(ProviderKind::Vault, vault.capabilities(), MaintenanceStatus::Maintained, vault)?
            .register(
                ProviderKind::Webhook,
                webhook.capabilities(),
                MaintenanceStatus::Maintained,
                webhook,
            )?
            .register(ProviderKind::Gitlab, gitlab.capabilities(), MaintenanceStatus::Maintained, gitlab)?
            .build();

        Ok(registry)
    }

    /// Descriptor of the single backend configured in `store`
    pub fn lookup(&self, store: &StoreSpec) -> Result<&ProviderDescriptor> {
        let kinds = store.provider.configured_kinds();
        match kinds.as_slice() {
            [] => Err(SyncError::NoBackend { store: store.name().to_string() }),
            [kind] => self.providers.get(kind).ok_or_else(|| SyncError::UnknownBackend {
                store: store.name().to_string(),
                kind: kind.to_string(),
            }),
            _ => Err(SyncError::MultipleBackends {
                store: store.name().to_string(),
                count: kinds.len(),
            }),
        }
    }

    /// Exactly-one-backend check plus the provider's own rules.
    ///
    /// Returns warnings, including one for unmaintained providers.
    pub fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>> {
        let descriptor = self.lookup(store)?;
        let mut warnings = Vec::new();
        if descriptor.maintenance == MaintenanceStatus::NotMaintained {
            warn!(store = %store.identity, provider = %descriptor.kind, "Store uses an unmaintained provider");
            warnings.push(format!("store {} is using an unmaintained provider", store.name()));
        }
        warnings.extend(descriptor.provider.validate_store(store)?);
        Ok(warnings)
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDescriptor> {
        self.providers.get(&kind)
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Registered kinds, sorted
    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Collects registrations; duplicates are rejected
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: HashMap<ProviderKind, ProviderDescriptor>,
}

impl ProviderRegistryBuilder {
    pub fn register(
        mut self,
        kind: ProviderKind,
        capabilities: Capabilities,
        maintenance: MaintenanceStatus,
        provider: Arc<dyn Provider>,
    ) -> Result<Self> {
        if self.providers.contains_key(&kind) {
            return Err(SyncError::AlreadyRegistered { kind: kind.to_string() });
        }
        info!(provider = %kind, capabilities = %capabilities, "Registering provider");
        self.providers.insert(kind, ProviderDescriptor { kind, capabilities, maintenance, provider });
        Ok(self)
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry { providers: self.providers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProviderConfig, StoreIdentity};
    use crate::providers::fake::FakeProviderConfig;

    fn store(provider: ProviderConfig) -> StoreSpec {
        StoreSpec::new(StoreIdentity::namespaced("team-a", "backend"), "1", provider)
    }

    fn fake_provider() -> Arc<dyn Provider> {
        Arc::new(FakeProvider::new(OwnershipMarker::new("managed-by", "secretsync"), 16))
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = ProviderRegistry::builder()
            .register(ProviderKind::Fake, Capabilities::ReadWrite, MaintenanceStatus::Maintained, fake_provider())
            .and_then(|b| {
                b.register(ProviderKind::Fake, Capabilities::ReadOnly, MaintenanceStatus::Maintained, fake_provider())
            });
        assert!(matches!(result, Err(SyncError::AlreadyRegistered { kind }) if kind == "fake"));
    }

    #[test]
    fn test_bootstrap_registers_builtins() {
        let registry = ProviderRegistry::bootstrap(&AppConfig::default()).unwrap();
        assert_eq!(
            registry.registered_kinds(),
            vec![ProviderKind::Fake, ProviderKind::Vault, ProviderKind::Webhook, ProviderKind::Gitlab]
        );
        assert_eq!(registry.get(ProviderKind::Webhook).unwrap().capabilities, Capabilities::ReadOnly);
        assert_eq!(registry.get(ProviderKind::Vault).unwrap().capabilities, Capabilities::ReadWrite);
    }

    #[test]
    fn test_lookup_errors() {
        let registry = ProviderRegistry::bootstrap(&AppConfig::default()).unwrap();

        let err = registry.lookup(&store(ProviderConfig::default())).unwrap_err();
        assert!(matches!(err, SyncError::NoBackend { .. }));

        let two = ProviderConfig {
            fake: Some(FakeProviderConfig::default()),
            gcpsm: Some(serde_json::json!({})),
            ..Default::default()
        };
        let err = registry.lookup(&store(two)).unwrap_err();
        assert!(matches!(err, SyncError::MultipleBackends { count: 2, .. }));
        assert_eq!(err.to_string(), "store backend must only have exactly one backend specified, found 2");

        let opaque = ProviderConfig { aws: Some(serde_json::json!({})), ..Default::default() };
        let err = registry.lookup(&store(opaque)).unwrap_err();
        assert!(matches!(err, SyncError::UnknownBackend { ref kind, .. } if kind == "aws"));

        let fake = ProviderConfig { fake: Some(FakeProviderConfig::default()), ..Default::default() };
        assert_eq!(registry.lookup(&store(fake)).unwrap().kind, ProviderKind::Fake);
    }

    #[test]
    fn test_unmaintained_provider_warns() {
        let registry = ProviderRegistry::builder()
            .register(ProviderKind::Fake, Capabilities::ReadWrite, MaintenanceStatus::NotMaintained, fake_provider())
            .unwrap()
            .build();

        let fake = ProviderConfig { fake: Some(FakeProviderConfig::default()), ..Default::default() };
        let warnings = registry.validate_store(&store(fake)).unwrap();
        assert_eq!(warnings, vec!["store backend is using an unmaintained provider".to_string()]);
    }
}
