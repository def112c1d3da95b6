//! Capability enforcement in front of a backend client.

use super::{Capabilities, SecretsClient, ValidationResult};
use crate::domain::{FindQuery, ProviderKind, PushSecretData, RemoteRef, SecretData};
use crate::errors::{Result, SyncError};
use crate::push::{DeleteOutcome, PushOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};

/// Rejects operations outside the provider's capability set before they reach
/// the backend.
#[derive(Debug)]
pub struct GuardedClient {
    inner: Arc<dyn SecretsClient>,
    kind: ProviderKind,
    capabilities: Capabilities,
}

impl GuardedClient {
    pub fn new(inner: Arc<dyn SecretsClient>, kind: ProviderKind, capabilities: Capabilities) -> Self {
        Self { inner, kind, capabilities }
    }

    fn require_read(&self, operation: &str) -> Result<()> {
        if self.capabilities.can_read() {
            return Ok(());
        }
        warn!(provider = %self.kind, operation, "Rejected read on write-only store");
        Err(SyncError::unsupported(operation, self.kind.as_str()))
    }

    fn require_write(&self, operation: &str) -> Result<()> {
        if self.capabilities.can_write() {
            return Ok(());
        }
        warn!(provider = %self.kind, operation, "Rejected write on read-only store");
        Err(SyncError::unsupported(operation, self.kind.as_str()))
    }
}

#[async_trait]
impl SecretsClient for GuardedClient {
    async fn get_secret(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.require_read("get_secret")?;
        let span = crate::provider_span!("get_secret", self.kind, remote_key = %remote_ref.key);
        self.inner.get_secret(remote_ref, cancel).instrument(span).await
    }

    async fn get_secret_map(&self, remote_ref: &RemoteRef, cancel: &CancellationToken) -> Result<SecretData> {
        self.require_read("get_secret_map")?;
        let span = crate::provider_span!("get_secret_map", self.kind, remote_key = %remote_ref.key);
        self.inner.get_secret_map(remote_ref, cancel).instrument(span).await
    }

    async fn get_all_secrets(&self, query: &FindQuery, cancel: &CancellationToken) -> Result<SecretData> {
        self.require_read("get_all_secrets")?;
        self.inner.get_all_secrets(query, cancel).instrument(crate::provider_span!("get_all_secrets", self.kind)).await
    }

    async fn push_secret(
        &self,
        source: &SecretData,
        data: &PushSecretData,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        self.require_write("push_secret")?;
        let span = crate::provider_span!("push_secret", self.kind, remote_key = %data.remote_key);
        self.inner.push_secret(source, data, cancel).instrument(span).await
    }

    async fn delete_secret(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<DeleteOutcome> {
        self.require_write("delete_secret")?;
        let span = crate::provider_span!("delete_secret", self.kind, remote_key = %data.remote_key);
        self.inner.delete_secret(data, cancel).instrument(span).await
    }

    async fn secret_exists(&self, data: &PushSecretData, cancel: &CancellationToken) -> Result<bool> {
        self.require_write("secret_exists")?;
        self.inner.secret_exists(data, cancel).await
    }

    async fn validate(&self) -> Result<ValidationResult> {
        self.inner.validate().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every call that reaches the backend
    #[derive(Debug, Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretsClient for CountingClient {
        async fn get_secret(&self, _: &RemoteRef, _: &CancellationToken) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"value".to_vec())
        }
        async fn get_secret_map(&self, _: &RemoteRef, _: &CancellationToken) -> Result<SecretData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SecretData::new())
        }
        async fn get_all_secrets(&self, _: &FindQuery, _: &CancellationToken) -> Result<SecretData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SecretData::new())
        }
        async fn push_secret(&self, _: &SecretData, _: &PushSecretData, _: &CancellationToken) -> Result<PushOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PushOutcome::Created)
        }
        async fn delete_secret(&self, _: &PushSecretData, _: &CancellationToken) -> Result<DeleteOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeleteOutcome::Deleted)
        }
        async fn secret_exists(&self, _: &PushSecretData, _: &CancellationToken) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn validate(&self) -> Result<ValidationResult> {
            Ok(ValidationResult::Ready)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes_before_backend() {
        let inner = Arc::new(CountingClient::default());
        let guarded = GuardedClient::new(inner.clone(), ProviderKind::Webhook, Capabilities::ReadOnly);
        let cancel = CancellationToken::new();
        let data = PushSecretData::new("remote", "key");

        let err = guarded.push_secret(&SecretData::new(), &data, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedOperation { .. }));
        assert!(guarded.delete_secret(&data, &cancel).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);

        assert_eq!(guarded.get_secret(&RemoteRef::new("k"), &cancel).await.unwrap(), b"value");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_only_rejects_reads() {
        let inner = Arc::new(CountingClient::default());
        let guarded = GuardedClient::new(inner.clone(), ProviderKind::Fake, Capabilities::WriteOnly);
        let cancel = CancellationToken::new();

        assert!(guarded.get_secret(&RemoteRef::new("k"), &cancel).await.is_err());
        assert!(guarded.get_all_secrets(&FindQuery::default(), &cancel).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);

        let data = PushSecretData::new("remote", "key");
        assert!(guarded.secret_exists(&data, &cancel).await.unwrap());
    }
}
