//! # secretsync
//!
//! Backend-agnostic core of a secret synchronization control plane. It keeps
//! local secrets in step with external secret backends and writes local values
//! out to those backends, without ever touching remote records it does not own.
//!
//! ## Architecture
//!
//! ```text
//! ExternalSecret / PushSecret → Validation → SecretSynchronizer → TargetStore
//!                                                 ↓
//!                         StoreClientCache → ProviderRegistry → Provider → Backend
//!                                                 ↓
//!                                   Resolver / OwnershipProtocol
//! ```
//!
//! ## Core Components
//!
//! - **Provider registry**: maps a store configuration to exactly one backend plugin
//! - **Client cache**: versioned LRU of constructed clients, single-flight per store
//! - **Resolver**: property, tag and map resolution shared by every backend
//! - **Ownership protocol**: marker-guarded create, update and delete for pushes
//! - **Synchronizer**: reconciles desired secrets into local targets
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secretsync::{AppConfig, ProviderRegistry, Result};
//!
//! fn main() -> Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let registry = ProviderRegistry::bootstrap(&config)?;
//!     println!("{:?}", registry.registered_kinds());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod providers;
pub mod push;
pub mod resolver;
pub mod sync;
pub mod validation;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Result, SyncError, ValidationErrors};
pub use providers::{Provider, ProviderRegistry, SecretKeyResolver, SecretsClient};
pub use push::{DeleteOutcome, OwnershipMarker, PushOutcome};
pub use sync::{MemoryStoreCatalog, MemoryTargetStore, SecretSynchronizer, StoreCatalog, TargetOutcome, TargetStore};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
