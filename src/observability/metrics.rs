//! # Metrics Collection
//!
//! Counters for cache behaviour, backend calls and reconciliation outcomes.
//! Recording goes through the `metrics` facade; installing an exporter is
//! left to the embedding process.

use metrics::{counter, describe_counter};

/// Metrics recorder that tracks synchronization metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Register metric descriptions with the installed recorder
    pub fn describe() {
        describe_counter!("secretsync_cache_lookups_total", "Cache lookups by cache and result");
        describe_counter!(
            "secretsync_cache_constructions_total",
            "Values constructed on cache miss or version change"
        );
        describe_counter!("secretsync_backend_calls_total", "Backend calls by provider and outcome");
        describe_counter!("secretsync_push_outcomes_total", "Push results by outcome");
        describe_counter!("secretsync_reconcile_total", "Reconciliation passes by kind and result");
    }

    /// Record a cache lookup
    pub fn record_cache_lookup(&self, cache: &str, hit: bool) {
        let labels = [
            ("cache", cache.to_string()),
            ("result", if hit { "hit" } else { "miss" }.to_string()),
        ];
        counter!("secretsync_cache_lookups_total", &labels).increment(1);
    }

    /// Record a value built by a cache factory
    pub fn record_cache_construction(&self, cache: &str) {
        let labels = [("cache", cache.to_string())];
        counter!("secretsync_cache_constructions_total", &labels).increment(1);
    }

    /// Record a backend call outcome
    pub fn record_backend_call(&self, provider: &str, operation: &str, success: bool) {
        let labels = [
            ("provider", provider.to_string()),
            ("operation", operation.to_string()),
            ("status", if success { "success" } else { "error" }.to_string()),
        ];
        counter!("secretsync_backend_calls_total", &labels).increment(1);
    }

    /// Record a push or delete outcome
    pub fn record_push_outcome(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("secretsync_push_outcomes_total", &labels).increment(1);
    }

    /// Record the result of a reconciliation pass
    pub fn record_reconcile(&self, kind: &str, success: bool) {
        let labels = [
            ("kind", kind.to_string()),
            ("status", if success { "success" } else { "error" }.to_string()),
        ];
        counter!("secretsync_reconcile_total", &labels).increment(1);
    }
}
