//! # Domain Types
//!
//! Declarative shapes consumed by the synchronization core: stores, desired
//! secrets, push declarations, remote references and records.

pub mod external_secret;
pub mod push_secret;
pub mod record;
pub mod refs;
pub mod sensitive;
pub mod store;

pub use external_secret::{
    CreationPolicy, DataFromSource, DeletionPolicy, ExternalSecret, ExternalSecretData,
    ExternalSecretSpec, GeneratorRef, SourceRef, StoreRef, TargetSpec,
};
pub use push_secret::{PushDeletionPolicy, PushSecret, PushSecretSpec};
pub use record::{RemoteRecord, SecretData};
pub use refs::{FindName, FindQuery, MetadataPolicy, PushSecretData, RemoteRef, SecretKeySelector};
pub use sensitive::SecretString;
pub use store::{ProviderConfig, ProviderKind, StoreIdentity, StoreKind, StoreSpec};
