//! HashiCorp Vault KV v2 provider.
//!
//! Records are KV v2 secrets under the configured mount. The secret's
//! `current_version` is the freshness token for the record cache, and the
//! ownership marker plus push tags live in the secret's custom metadata.
//!
//! Values are JSON objects on the Vault side; a record's raw value is that
//! object serialized with sorted keys.

use super::{Capabilities, Provider, SecretKeyResolver, SecretsClient, ValidationResult, VersionedRecord};
use crate::cache::{with_cancel, VersionToken, VersionedCache};
use crate::domain::{
    FindQuery, PushSecretData, RemoteRecord, RemoteRef, SecretData, SecretKeySelector, StoreSpec,
};
use crate::errors::{Result, SyncError, ValidationErrors};
use crate::observability::MetricsRecorder;
use crate::push::{
    extract_push_value, DeleteOutcome, OwnershipMarker, OwnershipProtocol, PushMetadata, PushOutcome, RecordStore,
    RemoteObject,
};
use crate::resolver::{resolve_many, resolve_ref, resolve_ref_map, FindMatcher};
use crate::validation::validate_selector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultrs::api::kv2::requests::SetSecretMetadataRequestBuilder;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

const PROVIDER: &str = "vault";

fn default_mount() -> String {
    "secret".to_string()
}

fn default_approle_mount() -> String {
    "approle".to_string()
}

/// AppRole login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultAppRole {
    /// Mount path of the AppRole auth method
    #[serde(default = "default_approle_mount")]
    pub path: String,
    pub role_id: String,
    pub secret_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_role: Option<VaultAppRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultProviderConfig {
    /// Vault server address
    pub server: String,
    /// KV v2 mount path
    #[serde(default = "default_mount")]
    pub path: String,
    /// Vault namespace (Enterprise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub auth: VaultAuth,
}

impl Default for VaultProviderConfig {
    fn default() -> Self {
        Self { server: String::new(), path: default_mount(), namespace: None, auth: VaultAuth::default() }
    }
}

fn vault_config(store: &StoreSpec) -> Result<&VaultProviderConfig> {
    store
        .provider
        .vault
        .as_ref()
        .ok_or_else(|| SyncError::config(format!("store {} has no vault provider configured", store.name())))
}

/// Map a Vault client error, treating 404 as a missing record
fn map_vault_error(key: &str, error: ClientError) -> SyncError {
    match error {
        ClientError::APIError { code: 404, .. } => SyncError::not_found(key),
        other => SyncError::backend_unavailable(PROVIDER, other.to_string()),
    }
}

#[derive(Debug)]
pub struct VaultProvider {
    marker: OwnershipMarker,
    record_capacity: usize,
}

impl VaultProvider {
    pub fn new(marker: OwnershipMarker, record_capacity: usize) -> Self {
        Self { marker, record_capacity }
    }
}

#[async_trait]
impl Provider for VaultProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadWrite
    }

    fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>> {
        let config = vault_config(store)?;
        let mut errors = ValidationErrors::new();

        if config.server.is_empty() {
            errors.push("server", "cannot be empty");
        } else if let Err(e) = url::Url::parse(&config.server) {
            errors.push("server", format!("invalid URL: {}", e));
        }
        if config.path.is_empty() {
            errors.push("path", "cannot be empty");
        }

        match (&config.auth.token_secret_ref, &config.auth.app_role) {
            (Some(token), None) => validate_selector(store, token, "auth.tokenSecretRef", &mut errors),
            (None, Some(app_role)) => {
                if app_role.role_id.is_empty() {
                    errors.push("auth.appRole.roleId", "cannot be empty");
                }
                validate_selector(store, &app_role.secret_ref, "auth.appRole.secretRef", &mut errors);
            }
            (None, None) => errors.push("auth", "exactly one of tokenSecretRef or appRole must be set"),
            (Some(_), Some(_)) => {
                errors.push("auth", "tokenSecretRef and appRole cannot be set at the same time")
            }
        }

        errors.into_result()?;
        Ok(Vec::new())
    }

    async fn new_client(
        &self,
        store: &StoreSpec,
        auth: Arc<dyn SecretKeyResolver>,
    ) -> Result<Arc<dyn SecretsClient>> {
        let config = vault_config(store)?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.server);
        if let Some(ref namespace) = config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }
        if let Some(ref selector) = config.auth.token_secret_ref {
            let token = auth.resolve(store.selector_namespace(selector), selector).await?;
            settings_builder.token(token.expose_secret());
        }

        let settings = settings_builder
            .build()
            .map_err(|e| SyncError::config(format!("Invalid Vault configuration: {}", e)))?;
        let mut client = VaultClient::new(settings)
            .map_err(|e| SyncError::config(format!("Failed to create Vault client: {}", e)))?;

        if let Some(ref app_role) = config.auth.app_role {
            let secret_id = auth.resolve(store.selector_namespace(&app_role.secret_ref), &app_role.secret_ref).await?;
            let login = vaultrs::auth::approle::login(
                &client,
                &app_role.path,
                &app_role.role_id,
                secret_id.expose_secret(),
            )
            .await
            .map_err(|e| SyncError::backend_unavailable(PROVIDER, format!("AppRole login failed: {}", e)))?;
            client.set_token(&login.client_token);
        }

        info!(address = %config.server, mount = %config.path, store = %store.identity, "Initialized Vault client");

        let backend = Arc::new(VaultBackend { client, mount: config.path.clone() });
        Ok(Arc::new(VaultSecretsClient {
            backend,
            records: VersionedCache::new("vault_records", self.record_capacity),
            protocol: OwnershipProtocol::new(self.marker.clone()),
            metrics: MetricsRecorder::new(),
        }))
    }
}

/// Raw KV v2 access under one mount
struct VaultBackend {
    client: VaultClient,
    mount: String,
}

impl std::fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackend").field("mount", &self.mount).field("client", &"[VaultClient]").finish()
    }
}

impl VaultBackend {
    async fn current_version(&self, key: &str) -> Result<(u64, BTreeMap<String, String>)> {
        let metadata =
            kv2::read_metadata(&self.client, &self.mount, key).await.map_err(|e| map_vault_error(key, e))?;
        let tags = metadata.custom_metadata.unwrap_or_default().into_iter().collect();
        Ok((metadata.current_version, tags))
    }

    async fn probe(&self, key: &str) -> Result<VersionToken> {
        let (version, _) = self.current_version(key).await?;
        Ok(VersionToken::from(version))
    }

    async fn read_at(&self, key: &str, version: u64) -> Result<Vec<u8>> {
        let data: serde_json::Map<String, serde_json::Value> = kv2::read_version(&self.client, &self.mount, key, version)
            .await
            .map_err(|e| map_vault_error(key, e))?;
        Ok(serde_json::to_vec(&data)?)
    }

    /// Metadata first, then the data of exactly that version
    async fn fetch(&self, key: &str) -> Result<(VersionToken, VersionedRecord)> {
        let (version, tags) = self.current_version(key).await?;
        let value = self.read_at(key, version).await?;
        let record = RemoteRecord { name: key.to_string(), value, tags };
        Ok((VersionToken::from(version), VersionedRecord::new(version, record)))
    }

    async fn fetch_version(&self, key: &str, version: &str) -> Result<RemoteRecord> {
        let number: u64 = version
            .parse()
            .map_err(|_| SyncError::config(format!("vault version {} of key {} is not a number", version, key)))?;
        let (_, tags) = self.current_version(key).await?;
        let value = self.read_at(key, number).await?;
        Ok(RemoteRecord { name: key.to_string(), value, tags })
    }

    /// Every leaf key below `prefix`
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut pending = vec![prefix.trim_end_matches('/').to_string()];
        let mut keys = Vec::new();
        while let Some(dir) = pending.pop() {
            let entries = match kv2::list(&self.client, &self.mount, &dir).await {
                Ok(entries) => entries,
                Err(ClientError::APIError { code: 404, .. }) => continue,
                Err(e) => return Err(map_vault_error(&dir, e)),
            };
            for entry in entries {
                let full = if dir.is_empty() { entry.clone() } else { format!("{}/{}", dir, entry) };
                match full.strip_suffix('/') {
                    Some(sub) => pending.push(sub.to_string()),
                    None => keys.push(full),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn write(&self, key: &str, object: RemoteObject) -> Result<()> {
        let data: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&object.value)
            .map_err(|_| SyncError::ambiguous_property(key, "", "vault records must be JSON objects"))?;
        kv2::set(&self.client, &self.mount, key, &data).await.map_err(|e| map_vault_error(key, e))?;

        let custom: HashMap<String, String> = object.tags.into_iter().collect();
        let mut opts = SetSecretMetadataRequestBuilder::default();
        opts.custom_metadata(custom);
        kv2::set_metadata(&self.client, &self.mount, key, Some(&mut opts)).await.map_err(|e| map_vault_error(key, e))
    }
}

#[async_trait]
impl RecordStore for VaultBackend {
    async fn read(&self, key: &str) -> Result<Option<RemoteObject>> {
        match self.fetch(key).await {
            Ok((_, snapshot)) => {
                Ok(Some(RemoteObject { value: snapshot.record.value, tags: snapshot.record.tags }))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, key: &str, object: RemoteObject) -> Result<()> {
        self.write(key, object).await
    }

    async fn update(&self, key: &str, object: RemoteObject) -> Result<()> {
        self.write(key, object).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        kv2::delete_metadata(&self.client, &self.mount, key).await.map_err(|e| map_vault_error(key, e))
    }
}

#[derive(Debug)]
pub struct VaultSecretsClient {
    backend: Arc<VaultBackend>,
    records: VersionedCache<String, VersionedRecord>,
    protocol: OwnershipProtocol,
    metrics: MetricsRecorder,
}

impl VaultSecretsClient {
    async fn record(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<RemoteRecord> {
        let key = remote_ref.key.as_str();
        let result = match remote_ref.version.as_deref() {
            // Pinned versions are immutable and bypass the cache
            Some(version) => {
                with_cancel(cancel, "vault read version", self.backend.fetch_version(key, version))
                    .await
                    .and_then(|read| read)
            }
            None => self.cached(key, cancel).await.map(|snapshot| snapshot.record),
        };
        self.metrics.record_backend_call(PROVIDER, "get_secret", result.is_ok());
        result
    }

    async fn cached(&self, key: &str, cancel: &CancellationToken) -> Result<VersionedRecord> {
        let backend = &self.backend;
        self.records
            .get_or_fetch(
                key.to_string(),
                cancel,
                || async move { backend.probe(key).await },
                || async move { backend.fetch(key).await },
            )
            .await
    }

    /// Vault records are objects; a whole-value push is normalized so byte comparison is stable
    fn normalize(&self, data: &PushSecretData, value: Vec<u8>) -> Result<Vec<u8>> {
        if data.property().is_some() {
            return Ok(value);
        }
        match serde_json::from_slice::<serde_json::Value>(&value) {
            Ok(object @ serde_json::Value::Object(_)) => Ok(serde_json::to_vec(&object)?),
            _ => Err(SyncError::ambiguous_property(
                &data.remote_key,
                "",
                "vault records must be JSON objects; set a property to push a single value",
            )),
        }
    }
}

#[async_trait]
impl SecretsClient for VaultSecretsClient {
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref(&record, remote_ref, None)
    }

    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref_map(&record, remote_ref)
    }

    async fn get_all_secrets(&self, query: &FindQuery, cancel: &CancellationToken) -> Result<SecretData> {
        let matcher = FindMatcher::new(query)?;
        let keys = self.backend.list_recursive(query.path.as_deref().unwrap_or("")).await?;

        let mut records = Vec::new();
        for key in keys {
            let snapshot = match self.cached(&key, cancel).await {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if matcher.matches(&key, &snapshot.record.tags) {
                records.push(snapshot.record);
            }
        }
        debug!(matched = records.len(), "Vault find query evaluated");
        resolve_many(&records, "")
    }

    async fn push_secret(
        &self,
        source: &SecretData,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let value = self.normalize(data, extract_push_value(source, data)?)?;
        let metadata = PushMetadata::parse(data.metadata.as_ref())?;
        let result = self.protocol.push(self.backend.as_ref(), data, value, &metadata, cancel).await;
        self.metrics.record_backend_call(PROVIDER, "push_secret", result.is_ok());
        result
    }

    async fn delete_secret(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<DeleteOutcome> {
        self.protocol.delete(self.backend.as_ref(), data, cancel).await
    }

    async fn secret_exists(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<bool> {
        self.protocol.exists(self.backend.as_ref(), data, cancel).await
    }

    async fn validate(&self) -> Result<ValidationResult> {
        match vaultrs::sys::health(&self.backend.client).await {
            Ok(_) => Ok(ValidationResult::Ready),
            Err(e) => {
                warn!(error = %e, "Vault health check failed");
                Ok(ValidationResult::Error)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        debug!(mount = %self.backend.mount, "Closing Vault client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProviderConfig, StoreIdentity};

    fn provider() -> VaultProvider {
        VaultProvider::new(OwnershipMarker::new("managed-by", "secretsync"), 16)
    }

    fn store(identity: StoreIdentity, config: VaultProviderConfig) -> StoreSpec {
        StoreSpec::new(identity, "1", ProviderConfig { vault: Some(config), ..Default::default() })
    }

    fn token_config() -> VaultProviderConfig {
        VaultProviderConfig {
            server: "http://127.0.0.1:8200".to_string(),
            auth: VaultAuth { token_secret_ref: Some(SecretKeySelector::new("vault-token", "token")), app_role: None },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cancelled_pinned_read_never_reaches_vault() {
        let resolver =
            crate::providers::StaticSecretResolver::new().with_secret(Some("team-a"), "vault-token", "token", "hvs.x");
        let spec = store(StoreIdentity::namespaced("team-a", "vault"), token_config());
        let client = provider().new_client(&spec, Arc::new(resolver)).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let pinned = client.get_secret(&RemoteRef::new("app/db").with_version("3"), &cancel).await.unwrap_err();
        assert!(matches!(pinned, SyncError::Cancelled { .. }));

        let latest = client.get_secret(&RemoteRef::new("app/db"), &cancel).await.unwrap_err();
        assert!(matches!(latest, SyncError::Cancelled { .. }));
    }

    #[test]
    fn test_default_mount() {
        let config: VaultProviderConfig = serde_json::from_str(r#"{"server":"http://vault:8200"}"#).unwrap();
        assert_eq!(config.path, "secret");
        assert_eq!(VaultProviderConfig::default().path, "secret");
    }

    #[test]
    fn test_validate_store_accepts_token_auth() {
        let spec = store(StoreIdentity::namespaced("team-a", "vault"), token_config());
        assert!(provider().validate_store(&spec).unwrap().is_empty());
    }

    #[test]
    fn test_validate_store_requires_exactly_one_auth() {
        let mut config = token_config();
        config.auth.token_secret_ref = None;
        let spec = store(StoreIdentity::namespaced("team-a", "vault"), config.clone());
        let err = provider().validate_store(&spec).unwrap_err();
        assert!(err.to_string().contains("exactly one of tokenSecretRef or appRole"));

        config.auth.token_secret_ref = Some(SecretKeySelector::new("t", "k"));
        config.auth.app_role = Some(VaultAppRole {
            path: default_approle_mount(),
            role_id: "role".to_string(),
            secret_ref: SecretKeySelector::new("approle", "secret-id"),
        });
        let spec = store(StoreIdentity::namespaced("team-a", "vault"), config);
        let err = provider().validate_store(&spec).unwrap_err();
        assert!(err.to_string().contains("cannot be set at the same time"));
    }

    #[test]
    fn test_validate_store_reports_all_issues() {
        let mut config = token_config();
        config.server = String::new();
        config.auth.token_secret_ref = Some(SecretKeySelector::new("", "token"));
        let spec = store(StoreIdentity::namespaced("team-a", "vault"), config);

        match provider().validate_store(&spec).unwrap_err() {
            SyncError::Validation(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors.issues()[0].field, "server");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cluster_store_selector_needs_namespace() {
        let spec = store(StoreIdentity::cluster("vault"), token_config());
        let err = provider().validate_store(&spec).unwrap_err();
        assert!(err.to_string().contains("cluster scope requires namespace"));
    }

    #[test]
    fn test_not_found_mapping() {
        let err = map_vault_error("app/db", ClientError::APIError { code: 404, errors: vec![] });
        assert!(err.is_not_found());

        let err = map_vault_error("app/db", ClientError::APIError { code: 503, errors: vec!["sealed".into()] });
        assert!(err.is_retryable());
    }
}
