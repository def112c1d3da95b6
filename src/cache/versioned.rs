//! Bounded cache whose entries are only valid for the version they were stored with.
//!
//! Versions are opaque tokens (resource versions, revision numbers, modification
//! timestamps); the cache only compares them for equality.

use super::keyed_lock::KeyedMutex;
use super::with_cancel;
use crate::errors::Result;
use crate::observability::MetricsRecorder;
use lru::LruCache;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Opaque freshness token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VersionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for VersionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<u64> for VersionToken {
    fn from(token: u64) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry<V> {
    version: VersionToken,
    value: V,
}

/// LRU cache keyed by `K`, validated against a [`VersionToken`] on every read
pub struct VersionedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    name: &'static str,
    entries: Mutex<LruCache<K, Entry<V>>>,
    locks: KeyedMutex<K>,
    metrics: MetricsRecorder,
}

impl<K, V> VersionedCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (a zero capacity is treated as one)
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            locks: KeyedMutex::new(),
            metrics: MetricsRecorder::new(),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, LruCache<K, Entry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hit only when `key` is present and was stored with exactly `version`
    pub fn get(&self, version: &VersionToken, key: &K) -> Option<V> {
        let mut entries = self.entries();
        let hit = match entries.get(key) {
            Some(entry) if &entry.version == version => Some(entry.value.clone()),
            _ => None,
        };
        drop(entries);
        self.metrics.record_cache_lookup(self.name, hit.is_some());
        hit
    }

    /// Unconditional overwrite.
    ///
    /// Returns the value the write displaced: the previous entry for `key`, or
    /// the least recently used entry evicted to make room.
    pub fn add(&self, version: VersionToken, key: K, value: V) -> Option<V> {
        self.entries().push(key, Entry { version, value }).map(|(_, entry)| entry.value)
    }

    /// Whether any version of `key` is cached; does not touch recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries().contains(key)
    }

    /// Version currently stored for `key`
    pub fn version_of(&self, key: &K) -> Option<VersionToken> {
        self.entries().peek(key).map(|entry| entry.version.clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries().pop(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Return the value for `(key, version)`, constructing it at most once.
    ///
    /// Concurrent callers for the same key wait for the first construction and
    /// reuse its result. Failed or cancelled constructions leave nothing behind.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: K,
        version: VersionToken,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let (value, _) = self.get_or_replace_with(key, version, cancel, factory).await?;
        Ok(value)
    }

    /// [`get_or_insert_with`](Self::get_or_insert_with) that also hands back
    /// whatever a fresh construction displaced, so owners of closeable values
    /// can release it.
    pub async fn get_or_replace_with<F, Fut>(
        &self,
        key: K,
        version: VersionToken,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<(V, Option<V>)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&version, &key) {
            return Ok((value, None));
        }

        let _guard = with_cancel(cancel, "cache lock", self.locks.lock(key.clone())).await?;

        if let Some(value) = self.get(&version, &key) {
            return Ok((value, None));
        }

        debug!(cache = self.name, key = ?key, version = %version, "Constructing cache entry");
        let value = with_cancel(cancel, "cache construct", factory()).await??;
        self.metrics.record_cache_construction(self.name);
        let displaced = self.add(version, key, value.clone());
        Ok((value, displaced))
    }

    /// Two-probe revalidated fetch.
    ///
    /// When the key is cached, `probe` supplies the current version cheaply and a
    /// matching entry is returned. Otherwise the per-key lock is taken, the probe
    /// and lookup repeated, and only then `fetch` runs; its version is what gets
    /// stored.
    pub async fn get_or_fetch<P, PFut, F, FFut>(
        &self,
        key: K,
        cancel: &CancellationToken,
        probe: P,
        fetch: F,
    ) -> Result<V>
    where
        P: Fn() -> PFut,
        PFut: Future<Output = Result<VersionToken>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<(VersionToken, V)>>,
    {
        if let Some(value) = self.probe_and_get(&key, cancel, &probe).await? {
            return Ok(value);
        }

        let _guard = with_cancel(cancel, "cache lock", self.locks.lock(key.clone())).await?;

        if let Some(value) = self.probe_and_get(&key, cancel, &probe).await? {
            return Ok(value);
        }

        let (version, value) = with_cancel(cancel, "cache fetch", fetch()).await??;
        debug!(cache = self.name, key = ?key, version = %version, "Caching fetched record");
        self.metrics.record_cache_construction(self.name);
        self.add(version, key, value.clone());
        Ok(value)
    }

    async fn probe_and_get<P, PFut>(
        &self,
        key: &K,
        cancel: &CancellationToken,
        probe: &P,
    ) -> Result<Option<V>>
    where
        P: Fn() -> PFut,
        PFut: Future<Output = Result<VersionToken>>,
    {
        if !self.contains(key) {
            return Ok(None);
        }
        let version = with_cancel(cancel, "cache probe", probe()).await??;
        Ok(self.get(&version, key))
    }
}

impl<K, V> fmt::Debug for VersionedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedCache").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_get_requires_matching_version() {
        let cache = VersionedCache::new("test", 4);
        cache.add("v1".into(), "key", 1);

        assert_eq!(cache.get(&"v1".into(), &"key"), Some(1));
        assert_eq!(cache.get(&"v2".into(), &"key"), None);
        assert_eq!(cache.get(&"v1".into(), &"other"), None);
    }

    #[test]
    fn test_add_overwrites() {
        let cache = VersionedCache::new("test", 4);
        assert_eq!(cache.add("v1".into(), "key", 1), None);
        assert_eq!(cache.add("v2".into(), "key", 2), Some(1));

        assert_eq!(cache.get(&"v1".into(), &"key"), None);
        assert_eq!(cache.get(&"v2".into(), &"key"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = VersionedCache::new("test", 2);
        cache.add("1".into(), "a", 1);
        cache.add("1".into(), "b", 2);
        assert!(cache.get(&"1".into(), &"a").is_some());
        assert_eq!(cache.add("1".into(), "c", 3), Some(2));

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    proptest! {
        #[test]
        fn prop_hit_only_for_stored_version(stored in "[a-z0-9]{1,8}", requested in "[a-z0-9]{1,8}") {
            let cache = VersionedCache::new("prop", 8);
            cache.add(VersionToken::new(stored.clone()), 7u32, "value");
            let hit = cache.get(&VersionToken::new(requested.clone()), &7u32);
            prop_assert_eq!(hit.is_some(), stored == requested);
        }
    }

    #[tokio::test]
    async fn test_single_flight_construction() {
        let cache = Arc::new(VersionedCache::new("test", 8));
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_insert_with("store", "1".into(), &cancel, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, SyncError>(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_factory_errors_are_not_cached() {
        let cache = VersionedCache::new("test", 8);
        let cancel = CancellationToken::new();

        let result = cache
            .get_or_insert_with("store", "1".into(), &cancel, || async {
                Err::<u32, _>(SyncError::backend_unavailable("fake", "boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(!cache.contains(&"store"));

        let value = cache
            .get_or_insert_with("store", "1".into(), &cancel, || async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancelled_construction_leaves_nothing() {
        let cache = VersionedCache::new("test", 8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cache
            .get_or_insert_with("store", "1".into(), &cancel, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled { .. })));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_version_change_reconstructs() {
        let cache = VersionedCache::new("test", 8);
        let cancel = CancellationToken::new();

        let first = cache.get_or_insert_with("s", "1".into(), &cancel, || async { Ok(1) }).await;
        let again = cache.get_or_insert_with("s", "1".into(), &cancel, || async { Ok(99) }).await;
        let bumped = cache.get_or_insert_with("s", "2".into(), &cancel, || async { Ok(2) }).await;

        assert_eq!(first.unwrap(), 1);
        assert_eq!(again.unwrap(), 1);
        assert_eq!(bumped.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_fetch_fetches_once() {
        let cache = Arc::new(VersionedCache::new("records", 8));
        let fetches = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(1));

        let race = |expected: &'static str| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let (cache, fetches, current) = (cache.clone(), fetches.clone(), current.clone());
                    tokio::spawn(async move {
                        let probe_version = current.clone();
                        cache
                            .get_or_fetch(
                                "k",
                                &CancellationToken::new(),
                                move || {
                                    let version = probe_version.load(Ordering::SeqCst);
                                    async move { Ok(VersionToken::from(version as u64)) }
                                },
                                move || async move {
                                    fetches.fetch_add(1, Ordering::SeqCst);
                                    tokio::time::sleep(Duration::from_millis(20)).await;
                                    let version = current.load(Ordering::SeqCst);
                                    Ok((VersionToken::from(version as u64), format!("value-{}", version)))
                                },
                            )
                            .await
                    })
                })
                .collect::<Vec<_>>();
            async move {
                for handle in handles {
                    assert_eq!(handle.await.unwrap().unwrap(), expected);
                }
            }
        };

        // Cold key
        race("value-1").await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Stale key
        current.store(2, Ordering::SeqCst);
        race("value-2").await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_fetch_revalidates_with_probe() {
        let cache = VersionedCache::new("records", 8);
        let cancel = CancellationToken::new();
        let probes = AtomicUsize::new(0);
        let fetches = AtomicUsize::new(0);
        let current = Mutex::new(1u64);
        let (probes, fetches, current) = (&probes, &fetches, &current);

        let probe = move || async move {
            probes.fetch_add(1, Ordering::SeqCst);
            Ok(VersionToken::from(*current.lock().unwrap()))
        };
        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            let version = *current.lock().unwrap();
            Ok((VersionToken::from(version), format!("value-{}", version)))
        };

        // Cold: no probe, one fetch
        assert_eq!(cache.get_or_fetch("k", &cancel, probe, fetch).await.unwrap(), "value-1");
        assert_eq!(probes.load(Ordering::SeqCst), 0);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Warm and fresh: one probe, no fetch
        assert_eq!(cache.get_or_fetch("k", &cancel, probe, fetch).await.unwrap(), "value-1");
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Stale: probe before and after the lock, then fetch
        *current.lock().unwrap() = 2;
        assert_eq!(cache.get_or_fetch("k", &cancel, probe, fetch).await.unwrap(), "value-2");
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
