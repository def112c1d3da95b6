//! # Observability Infrastructure
//!
//! Structured logging and metrics for the synchronization core.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::MetricsRecorder;

use crate::config::ObservabilityConfig;
use crate::errors::Result;

/// Initialize logging and register metric descriptions
pub fn init_observability(config: &ObservabilityConfig) -> Result<MetricsRecorder> {
    init_logging(config)?;
    MetricsRecorder::describe();
    Ok(MetricsRecorder::new())
}
