//! Generic HTTP webhook provider (read-only).
//!
//! Each read issues one request to a URL template. `{key}`, `{version}` and
//! `{property}` are replaced with the remote reference's fields, percent-encoded
//! so they cannot alter the query or fragment. When a result
//! path is configured the response is parsed as JSON and descended with the
//! dotted-path rule; otherwise the body is returned verbatim.

use super::{Capabilities, Provider, SecretKeyResolver, SecretsClient, ValidationResult};
use crate::cache::with_cancel;
use crate::domain::{
    FindQuery, PushSecretData, RemoteRef, SecretData, SecretKeySelector, SecretString, StoreSpec,
};
use crate::errors::{Result, SyncError, ValidationErrors};
use crate::observability::MetricsRecorder;
use crate::push::{DeleteOutcome, PushOutcome};
use crate::resolver::{descend, value_to_bytes};
use crate::validation::validate_selector;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROVIDER: &str = "webhook";

/// Request timeout when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the connectivity check
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(15);

fn default_method() -> String {
    "GET".to_string()
}

/// Header carrying a credential read from a secret selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuth {
    /// Header name, e.g. `Authorization`
    pub header: String,
    /// Prepended to the secret value, e.g. `Bearer `
    #[serde(default)]
    pub prefix: String,
    pub secret_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    /// Dotted path into the JSON response; a leading `$.` is accepted
    #[serde(default)]
    pub json_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookProviderConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WebhookResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for WebhookProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: BTreeMap::new(),
            auth: None,
            result: None,
            timeout_seconds: None,
        }
    }
}

impl WebhookProviderConfig {
    fn timeout(&self) -> Duration {
        self.timeout_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT)
    }

    fn json_path(&self) -> Option<&str> {
        let raw = self.result.as_ref()?.json_path.as_str();
        if raw.is_empty() {
            return None;
        }
        Some(raw.strip_prefix("$.").or_else(|| raw.strip_prefix('$')).unwrap_or(raw))
    }
}

/// Escaped in substituted values; `/` is kept so path-like keys address nested resources
const PLACEHOLDER: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Substitute the reference's fields into a URL template
pub fn render_url(template: &str, remote_ref: &RemoteRef) -> String {
    let encode = |value: &str| utf8_percent_encode(value, PLACEHOLDER).to_string();
    template
        .replace("{key}", &encode(&remote_ref.key))
        .replace("{version}", &encode(remote_ref.version.as_deref().unwrap_or("")))
        .replace("{property}", &encode(&remote_ref.property))
}

/// Turn one JSON result into secret bytes.
///
/// Arrays yield their first element, objects are serialized.
pub fn extract_secret_data(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Array(items) => match items.first() {
            Some(first) => extract_secret_data(first),
            None => Err(SyncError::not_found("filter worked but didn't get any result")),
        },
        other => Ok(value_to_bytes(other)),
    }
}

fn webhook_config(store: &StoreSpec) -> Result<&WebhookProviderConfig> {
    store
        .provider
        .webhook
        .as_ref()
        .ok_or_else(|| SyncError::config(format!("store {} has no webhook provider configured", store.name())))
}

#[derive(Debug, Default)]
pub struct WebhookProvider;

impl WebhookProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadOnly
    }

    fn validate_store(&self, store: &StoreSpec) -> Result<Vec<String>> {
        let config = webhook_config(store)?;
        let mut errors = ValidationErrors::new();

        if config.url.is_empty() {
            errors.push("url", "cannot be empty");
        } else {
            let sample = RemoteRef::new("key").with_property("property").with_version("1");
            if let Err(e) = url::Url::parse(&render_url(&config.url, &sample)) {
                errors.push("url", format!("invalid URL: {}", e));
            }
        }
        if reqwest::Method::from_bytes(config.method.as_bytes()).is_err() {
            errors.push("method", format!("invalid HTTP method {}", config.method));
        }
        if let Some(ref auth) = config.auth {
            if auth.header.is_empty() {
                errors.push("auth.header", "cannot be empty");
            }
            validate_selector(store, &auth.secret_ref, "auth.secretRef", &mut errors);
        }

        errors.into_result()?;
        Ok(Vec::new())
    }

    async fn new_client(
        &self,
        store: &StoreSpec,
        auth: Arc<dyn SecretKeyResolver>,
    ) -> Result<Arc<dyn SecretsClient>> {
        let config = webhook_config(store)?.clone();

        let credential = match config.auth {
            Some(ref header_auth) => {
                let secret = auth.resolve(store.selector_namespace(&header_auth.secret_ref), &header_auth.secret_ref).await?;
                Some(SecretString::new(format!("{}{}", header_auth.prefix, secret.expose_secret())))
            }
            None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(WebhookClient { config, credential, http, metrics: MetricsRecorder::new() }))
    }
}

pub struct WebhookClient {
    config: WebhookProviderConfig,
    credential: Option<SecretString>,
    http: reqwest::Client,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for WebhookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookClient")
            .field("url", &self.config.url)
            .field("method", &self.config.method)
            .field("credential", &self.credential)
            .finish()
    }
}

impl WebhookClient {
    fn request(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(self.config.method.as_bytes())
            .map_err(|_| SyncError::config(format!("invalid HTTP method {}", self.config.method)))?;
        let mut request = self.http.request(method, url);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let (Some(auth), Some(credential)) = (&self.config.auth, &self.credential) {
            let mut value = reqwest::header::HeaderValue::from_str(credential.expose_secret())
                .map_err(|_| SyncError::config("auth header value contains invalid characters"))?;
            value.set_sensitive(true);
            request = request.header(auth.header.as_str(), value);
        }
        Ok(request)
    }

    async fn fetch(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let url = render_url(&self.config.url, remote_ref);
        let request = self.request(&url)?;
        debug!(remote_key = %remote_ref.key, method = %self.config.method, "Calling webhook");

        let result = with_cancel(cancel, "webhook request", async {
            let response = request
                .send()
                .await
                .map_err(|e| SyncError::backend_unavailable(PROVIDER, e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(SyncError::not_found(remote_ref.key.clone()));
            }
            if !status.is_success() {
                return Err(SyncError::backend_unavailable(PROVIDER, format!("endpoint gave error {}", status)));
            }
            let body = response.bytes().await.map_err(|e| SyncError::backend_unavailable(PROVIDER, e.to_string()))?;
            Ok(body.to_vec())
        })
        .await?;

        self.metrics.record_backend_call(PROVIDER, "get_secret", result.is_ok());
        result
    }

    /// The JSON value selected by the result path, if one is configured
    fn select(&self, remote_ref: &RemoteRef, body: &[u8]) -> Result<Option<Value>> {
        let Some(path) = self.config.json_path() else {
            return Ok(None);
        };
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| SyncError::ambiguous_property(&remote_ref.key, path, format!("failed to parse response json: {}", e)))?;
        let selected = if path.is_empty() { Some(&document) } else { descend(&document, path) };
        selected
            .cloned()
            .map(Some)
            .ok_or_else(|| SyncError::property_not_found(&remote_ref.key, path))
    }
}

#[async_trait]
impl SecretsClient for WebhookClient {
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let body = self.fetch(remote_ref, cancel).await?;
        match self.select(remote_ref, &body)? {
            Some(value) => extract_secret_data(&value),
            None => Ok(body),
        }
    }

    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData> {
        let body = self.fetch(remote_ref, cancel).await?;
        let value = match self.select(remote_ref, &body)? {
            Some(value) => value,
            None => serde_json::from_slice(&body)
                .map_err(|_| SyncError::cannot_expand(&remote_ref.key, &remote_ref.property))?,
        };
        match value {
            Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), value_to_bytes(v))).collect()),
            _ => Err(SyncError::cannot_expand(&remote_ref.key, &remote_ref.property)),
        }
    }

    async fn get_all_secrets(&self, _query: &FindQuery, _cancel: &CancellationToken) -> Result<SecretData> {
        Err(SyncError::unsupported("get_all_secrets", PROVIDER))
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

    /// TCP reachability of the URL's host
    async fn validate(&self) -> Result<ValidationResult> {
        let sample = RemoteRef::new("key");
        let Ok(url) = url::Url::parse(&render_url(&self.config.url, &sample)) else {
            return Ok(ValidationResult::Error);
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return Ok(ValidationResult::Error);
        };

        match tokio::time::timeout(VALIDATE_TIMEOUT, tokio::net::TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(ValidationResult::Ready),
            Ok(Err(e)) => {
                warn!(host = %host, port = port, error = %e, "Webhook endpoint unreachable");
                Ok(ValidationResult::Error)
            }
            Err(_) => {
                warn!(host = %host, port = port, "Webhook endpoint check timed out");
                Ok(ValidationResult::Error)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_url() {
        let remote_ref = RemoteRef::new("db").with_property("password").with_version("3");
        assert_eq!(
            render_url("http://hook/secrets/{key}?v={version}&p={property}", &remote_ref),
            "http://hook/secrets/db?v=3&p=password"
        );
        assert_eq!(render_url("http://hook/{key}/{version}", &RemoteRef::new("db")), "http://hook/db/");
    }

    #[test]
    fn test_render_url_escapes_substituted_values() {
        let remote_ref = RemoteRef::new("db?admin=true&x").with_property("a b#c");
        assert_eq!(
            render_url("http://hook/secrets/{key}?p={property}", &remote_ref),
            "http://hook/secrets/db%3Fadmin%3Dtrue%26x?p=a%20b%23c"
        );
        assert_eq!(render_url("http://hook/{key}", &RemoteRef::new("team/db")), "http://hook/team/db");
    }

    #[test]
    fn test_extract_secret_data() {
        assert_eq!(extract_secret_data(&json!(true)).unwrap(), b"true");
        assert_eq!(extract_secret_data(&json!(null)).unwrap(), b"");
        assert_eq!(extract_secret_data(&json!(42)).unwrap(), b"42");
        assert_eq!(extract_secret_data(&json!("plain")).unwrap(), b"plain");
        assert_eq!(extract_secret_data(&json!(["first", "second"])).unwrap(), b"first");
        assert_eq!(
            serde_json::from_slice::<Value>(&extract_secret_data(&json!({"a": 1})).unwrap()).unwrap(),
            json!({"a": 1})
        );
        let err = extract_secret_data(&json!([])).unwrap_err();
        assert!(err.to_string().contains("didn't get any result"));
    }

    #[test]
    fn test_json_path_prefixes() {
        let mut config = WebhookProviderConfig { url: "http://hook".into(), ..Default::default() };
        assert_eq!(config.json_path(), None);

        config.result = Some(WebhookResult { json_path: "$.data.value".into() });
        assert_eq!(config.json_path(), Some("data.value"));

        config.result = Some(WebhookResult { json_path: "$".into() });
        assert_eq!(config.json_path(), Some(""));
    }

    #[test]
    fn test_validate_store() {
        use crate::domain::{ProviderConfig, StoreIdentity};

        let config = WebhookProviderConfig {
            url: String::new(),
            method: "NOT A METHOD".into(),
            ..Default::default()
        };
        let spec = StoreSpec::new(
            StoreIdentity::namespaced("team-a", "hook"),
            "1",
            ProviderConfig { webhook: Some(config), ..Default::default() },
        );
        let err = WebhookProvider::new().validate_store(&spec).unwrap_err();
        assert!(err.to_string().contains("url: cannot be empty"));
        assert!(err.to_string().contains("invalid HTTP method"));
    }
}
