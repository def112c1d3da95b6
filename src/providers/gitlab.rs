//! GitLab CI/CD variables provider (read-only).
//!
//! Reads project variables through the REST API, falling back to group
//! variables (explicit `groupIDs`, or the project's ancestor groups when
//! `inheritFromGroups` is set). Environment-scoped lookups retry with the
//! `*` scope when the scoped variable does not exist.

use super::{Capabilities, Provider, SecretKeyResolver, SecretsClient, ValidationResult};
use crate::cache::with_cancel;
use crate::domain::{
    FindQuery, PushSecretData, RemoteRecord, RemoteRef, SecretData, SecretKeySelector, SecretString, StoreSpec,
};
use crate::errors::{Result, SyncError, ValidationErrors};
use crate::observability::MetricsRecorder;
use crate::push::{DeleteOutcome, PushOutcome};
use crate::resolver::{resolve_many, resolve_ref, resolve_ref_map, FindMatcher};
use crate::validation::{validate_selector, validate_selector_namespace};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROVIDER: &str = "gitlab";
const DEFAULT_URL: &str = "https://gitlab.com";
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabAuth {
    pub access_token: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabProviderConfig {
    /// Base URL; gitlab.com when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "projectID")]
    pub project_id: String,
    #[serde(default, rename = "groupIDs")]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub inherit_from_groups: bool,
    /// Environment scope to read; unset or `*` reads unscoped variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default)]
    pub auth: GitlabAuth,
    /// PEM bundle of extra trusted roots for the GitLab endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// Secret holding a PEM bundle, resolved like the access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_provider: Option<SecretKeySelector>,
}

impl GitlabProviderConfig {
    fn base_url(&self) -> &str {
        self.url.as_deref().filter(|u| !u.is_empty()).unwrap_or(DEFAULT_URL).trim_end_matches('/')
    }

    fn scoped_environment(&self) -> Option<&str> {
        self.environment.as_deref().filter(|env| !is_empty_or_wildcard(env))
    }
}

fn is_empty_or_wildcard(environment: &str) -> bool {
    environment.is_empty() || environment == "*"
}

/// A CI/CD variable as returned by the API
#[derive(Debug, Clone, Deserialize)]
struct Variable {
    key: String,
    value: String,
    #[serde(default)]
    environment_scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: u64,
}

fn gitlab_config(store: &StoreSpec) -> Result<&GitlabProviderConfig> {
    store
        .provider
        .gitlab
        .as_ref()
        .ok_or_else(|| SyncError::config(format!("store {} has no gitlab provider configured", store.name())))
}

/// Characters escaped inside one path segment; `/` too, so `group/project` stays one segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Certificates of a PEM bundle; a bundle without any is rejected
fn parse_ca_bundle(pem: &[u8]) -> Result<Vec<reqwest::Certificate>> {
    let certificates = reqwest::Certificate::from_pem_bundle(pem)
        .map_err(|e| SyncError::config(format!("invalid CA bundle: {}", e)))?;
    if certificates.is_empty() {
        return Err(SyncError::config("invalid CA bundle: no certificates found"));
    }
    Ok(certificates)
}

#[derive(Debug, Default)]
pub struct GitlabProvider;

impl GitlabProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for GitlabProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadOnly
    }

    fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>> {
        let config = gitlab_config(store)?;
        let access_token = &config.auth.access_token;
        let mut errors = ValidationErrors::new();

        validate_selector_namespace(store, access_token, "auth.accessToken", &mut errors);
        if config.project_id.is_empty() && config.group_ids.is_empty() {
            errors.push("", "projectID and groupIDs must not both be empty");
        }
        if config.inherit_from_groups && !config.group_ids.is_empty() {
            errors.push("", "defining groupIDs and inheritFromGroups = true is not allowed");
        }
        if access_token.key.is_empty() {
            errors.push("", "accessToken.key cannot be empty");
        }
        if access_token.name.is_empty() {
            errors.push("", "accessToken.name cannot be empty");
        }
        if let Some(ref url) = config.url {
            if !url.is_empty() && url::Url::parse(url).is_err() {
                errors.push("url", "invalid URL");
            }
        }
        if let Some(ref bundle) = config.ca_bundle {
            if parse_ca_bundle(bundle.as_bytes()).is_err() {
                errors.push("caBundle", "invalid PEM certificate bundle");
            }
        }
        if let Some(ref ca_provider) = config.ca_provider {
            validate_selector(store, ca_provider, "caProvider", &mut errors);
        }

        errors.into_result()?;
        Ok(Vec::new())
    }

    async fn new_client(
        &self,
        store: &StoreSpec,
        auth: Arc<dyn SecretKeyResolver>,
    ) -> Result<Arc<dyn SecretsClient>> {
        let config = gitlab_config(store)?.clone();
        let selector = &config.auth.access_token;
        let token = auth.resolve(store.selector_namespace(selector), selector).await?;

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(ref bundle) = config.ca_bundle {
            for certificate in parse_ca_bundle(bundle.as_bytes())? {
                builder = builder.add_root_certificate(certificate);
            }
        }
        if let Some(ref selector) = config.ca_provider {
            let bundle = auth.resolve(store.selector_namespace(selector), selector).await?;
            for certificate in parse_ca_bundle(bundle.expose_secret().as_bytes())? {
                builder = builder.add_root_certificate(certificate);
            }
        }
        let http = builder.build().map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        info!(url = %config.base_url(), project = %config.project_id, store = %store.identity, "Initialized GitLab client");
        Ok(Arc::new(GitlabClient { config, token, http, metrics: MetricsRecorder::new() }))
    }
}

pub struct GitlabClient {
    config: GitlabProviderConfig,
    token: SecretString,
    http: reqwest::Client,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for GitlabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabClient")
            .field("url", &self.config.base_url())
            .field("project_id", &self.config.project_id)
            .field("token", &self.token)
            .finish()
    }
}

impl GitlabClient {
    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.config.base_url(), path)
    }

    /// GET returning `None` on 404
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let request = self.http.get(url).header(TOKEN_HEADER, self.token.expose_secret()).query(query);
        let result = with_cancel(cancel, operation, async {
            let response = request.send().await.map_err(|e| SyncError::backend_unavailable(PROVIDER, e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(SyncError::backend_unavailable(PROVIDER, format!("{} returned {}", operation, status)));
            }
            let body = response.json::<T>().await.map_err(|e| SyncError::backend_unavailable(PROVIDER, e.to_string()))?;
            Ok(Some(body))
        })
        .await?;
        self.metrics.record_backend_call(PROVIDER, operation, result.is_ok());
        result
    }

    /// One variable, retrying with the `*` scope when the scoped lookup misses
    async fn scoped_variable(&self, owner: &str, key: &str, cancel: &CancellationToken) -> Result<Option<Variable>> {
        let url = self.api(&format!("{}/variables/{}", owner, encode_segment(key)));
        let environment = self.config.environment.clone().unwrap_or_default();
        let query = if environment.is_empty() {
            Vec::new()
        } else {
            vec![("filter[environment_scope]", environment.clone())]
        };

        if let Some(variable) = self.get_json::<Variable>("variable_get", &url, &query, cancel).await? {
            return Ok(Some(variable));
        }
        if is_empty_or_wildcard(&environment) {
            return Ok(None);
        }
        debug!(key = %key, environment = %environment, "Scoped variable missing, retrying with wildcard scope");
        self.get_json::<Variable>("variable_get", &url, &[("filter[environment_scope]", "*".to_string())], cancel).await
    }

    async fn group_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        if !self.config.inherit_from_groups || self.config.project_id.is_empty() {
            return Ok(self.config.group_ids.clone());
        }
        let url = self.api(&format!("projects/{}/groups", encode_segment(&self.config.project_id)));
        let groups: Vec<Group> = self.get_json("project_groups", &url, &[], cancel).await?.unwrap_or_default();
        Ok(groups.into_iter().map(|g| g.id.to_string()).collect())
    }

    /// Owners to search, most specific first
    async fn owners(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut owners = Vec::new();
        if !self.config.project_id.is_empty() {
            owners.push(format!("projects/{}", encode_segment(&self.config.project_id)));
        }
        for group in self.group_ids(cancel).await? {
            owners.push(format!("groups/{}", encode_segment(&group)));
        }
        Ok(owners)
    }

    async fn record(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<RemoteRecord> {
        for owner in self.owners(cancel).await? {
            if let Some(variable) = self.scoped_variable(&owner, &remote_ref.key, cancel).await? {
                return Ok(RemoteRecord::new(variable.key, variable.value));
            }
        }
        Err(SyncError::not_found(remote_ref.key.clone()))
    }

    async fn list_variables(&self, owner: &str, cancel: &CancellationToken) -> Result<Vec<Variable>> {
        let url = self.api(&format!("{}/variables", owner));
        let mut all = Vec::new();
        for page in 1.. {
            let query = [("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())];
            let batch: Vec<Variable> = self.get_json("variable_list", &url, &query, cancel).await?.unwrap_or_default();
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }

    fn in_scope(&self, variable: &Variable) -> bool {
        match (self.config.scoped_environment(), variable.environment_scope.as_deref()) {
            (None, _) => true,
            (Some(_), None) | (Some(_), Some("*")) => true,
            (Some(env), Some(scope)) => env == scope,
        }
    }
}

#[async_trait]
impl SecretsClient for GitlabClient {
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref(&record, remote_ref, None)
    }

    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData> {
        let record = self.record(remote_ref, cancel).await?;
        resolve_ref_map(&record, remote_ref)
    }

    /// Project variables win over group variables of the same key
    async fn get_all_secrets(&self, query: &FindQuery, cancel: &CancellationToken) -> Result<SecretData> {
        if !query.tags.is_empty() {
            return Err(SyncError::unsupported("find by tags", PROVIDER));
        }
        let matcher = FindMatcher::new(query)?;

        let scoped = self.config.scoped_environment();
        let mut selected: BTreeMap<String, (usize, bool, Variable)> = BTreeMap::new();
        for (rank, owner) in self.owners(cancel).await?.iter().enumerate() {
            for variable in self.list_variables(owner, cancel).await? {
                if !self.in_scope(&variable) || !matcher.matches(&variable.key, &BTreeMap::new()) {
                    continue;
                }
                let exact = scoped.is_some() && variable.environment_scope.as_deref() == scoped;
                // Earlier owners win; within one owner an exact scope beats the wildcard
                let replace = match selected.get(&variable.key) {
                    None => true,
                    Some((seen_rank, seen_exact, _)) => *seen_rank == rank && exact && !*seen_exact,
                };
                if replace {
                    selected.insert(variable.key.clone(), (rank, exact, variable));
                }
            }
        }

        let records: Vec<RemoteRecord> =
            selected.into_values().map(|(_, _, v)| RemoteRecord::new(v.key, v.value)).collect();
        resolve_many(&records, "")
    }

    async fn push_secret(
        &self,
        _source: &SecretData,
        _data: &PushSecretData,
        _cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        Err(SyncError::unsupported("push_secret", PROVIDER))
    }

    async fn delete_secret(&self, _data: &PushSecretData, _cancel: &CancellationToken) -> Result<DeleteOutcome> {
        Err(SyncError::unsupported("delete_secret", PROVIDER))
    }

    async fn secret_exists(&self, _data: &PushSecretData, _cancel: &CancellationToken) -> Result<bool> {
        Err(SyncError::unsupported("secret_exists", PROVIDER))
    }

    async fn validate(&self) -> Result<ValidationResult> {
        if self.config.project_id.is_empty() {
            return Ok(ValidationResult::Unknown);
        }
        let url = self.api(&format!("projects/{}", encode_segment(&self.config.project_id)));
        match self.get_json::<serde_json::Value>("project_get", &url, &[], &CancellationToken::new()).await {
            Ok(Some(_)) => Ok(ValidationResult::Ready),
            Ok(None) | Err(_) => Ok(ValidationResult::Error),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
