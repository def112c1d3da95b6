//! # Caching
//!
//! Shared mutable state of the synchronization core lives here: a generic
//! versioned LRU cache with a single-flight construction primitive, the store
//! client cache built on it, and the per-key lock both rely on.

pub mod clients;
pub mod keyed_lock;
pub mod versioned;

pub use clients::StoreClientCache;
pub use keyed_lock::{KeyedGuard, KeyedMutex};
pub use versioned::{VersionToken, VersionedCache};

use crate::errors::{Result, SyncError};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `future` unless `cancel` fires first.
///
/// A cancelled future is dropped before it completes, so nothing it would have
/// produced is ever observed or cached.
pub async fn with_cancel<F>(cancel: &CancellationToken, operation: &str, future: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::cancelled(operation)),
        output = future => Ok(output),
    }
}
