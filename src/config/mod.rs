//! # Configuration Management
//!
//! Layered configuration for the synchronization core: built-in defaults,
//! an optional file, then `SECRETSYNC__`-prefixed environment variables.

pub mod settings;

pub use settings::{AppConfig, CacheConfig, ObservabilityConfig, ProtocolConfig, ENV_PREFIX};
