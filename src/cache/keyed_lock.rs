//! Per-key async locking.
//!
//! Callers for the same key serialize; callers for different keys never block
//! each other. Lock entries are dropped from the map once the last holder or
//! waiter lets go, so the map only grows with in-flight keys.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of independent async mutexes, one per key
pub struct KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { locks: Arc::new(DashMap::new()) }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Dropping the returned future before it resolves is safe: the pending
    /// guard shell is dropped with it and reclaims the entry if nobody else
    /// references it.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mutex = Arc::clone(&self.locks.entry(key.clone()).or_default());
        // Unlocked until the wait completes; dropped after the wait when cancelled.
        let mut held = KeyedGuard { key, locks: Arc::clone(&self.locks), guard: None };
        held.guard = Some(mutex.lock_owned().await);
        held
    }

    /// Number of keys currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMutex").field("active_keys", &self.locks.len()).finish()
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    key: K,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> fmt::Debug for KeyedGuard<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", &self.key)
            .field("locked", &self.guard.is_some())
            .finish()
    }
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Release first so the map holds the only remaining reference when idle.
        // A waiter cancelled mid-wait arrives here with no guard and still reclaims.
        self.guard.take();
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("record-a".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks = KeyedMutex::new();
        let held = locks.lock("a").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock("a")).await;
        assert!(waited.is_err());

        drop(held);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_waiter_cancelled_after_release_leaves_no_entry() {
        let locks = KeyedMutex::new();
        let held = tokio_test::block_on(locks.lock("a"));

        let mut waiter = tokio_test::task::spawn(locks.lock("a"));
        tokio_test::assert_pending!(waiter.poll());

        // The holder lets go while the waiter still references the mutex
        drop(held);
        assert_eq!(locks.len(), 1);

        drop(waiter);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let locks = KeyedMutex::new();
        let held = tokio_test::block_on(locks.lock("a"));

        let mut waiter = tokio_test::task::spawn(locks.lock("a"));
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let _guard = tokio_test::assert_ready!(waiter.poll());
        assert_eq!(locks.len(), 1);
    }
}
