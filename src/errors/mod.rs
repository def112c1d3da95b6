//! # Error Handling
//!
//! Error types for the synchronization core. Every fallible operation returns
//! [`Result`], and validators report all violated rules through
//! [`ValidationErrors`] rather than failing on the first one.

pub mod types;
pub mod validation;

pub use types::{Result, SyncError};
pub use validation::{ValidationErrors, ValidationIssue};
