//! Metrics for [super::Relational].

use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Contention metrics for [super::Relational], registered alongside the shared
/// [crate::metrics::Metrics].
#[derive(Default)]
pub struct Metrics {
    /// Attempts that hit a busy or locked database.
    pub conflicts: Counter,
    /// Attempts retried after a conflict.
    pub retries: Counter,
}

impl Metrics {
    /// Create and register metrics with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "conflicts",
            "Attempts that hit a busy or locked database",
            metrics.conflicts.clone(),
        );
        registry.register(
            "retries",
            "Attempts retried after a conflict",
            metrics.retries.clone(),
        );
        metrics
    }
}
