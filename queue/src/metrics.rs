//! Metrics shared by all engines.

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for a [Queue](crate::Queue) engine.
#[derive(Default)]
pub struct Metrics {
    /// Messages queued.
    pub queued: Counter,
    /// Messages taken.
    pub taken: Counter,
    /// Messages finished.
    pub finished: Counter,
    /// Messages requeued (including silent requeues and explicit moves).
    pub requeued: Counter,
    /// Operations rejected because a store was full.
    pub rejected: Counter,
    /// Visible messages (only maintained by engines that can count cheaply).
    pub size: Gauge,
    /// In-flight messages (only maintained by engines that can count cheaply).
    pub ephemeral: Gauge,
}

impl Metrics {
    /// Create and register metrics with the given registry.
    ///
    /// Use [Registry::sub_registry_with_prefix] to give each engine its own namespace.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register("queued", "Messages queued", metrics.queued.clone());
        registry.register("taken", "Messages taken", metrics.taken.clone());
        registry.register("finished", "Messages finished", metrics.finished.clone());
        registry.register("requeued", "Messages requeued", metrics.requeued.clone());
        registry.register(
            "rejected",
            "Operations rejected because a store was full",
            metrics.rejected.clone(),
        );
        registry.register("size", "Visible messages", metrics.size.clone());
        registry.register("ephemeral", "In-flight messages", metrics.ephemeral.clone());
        metrics
    }

    /// Record the current sizes.
    pub(crate) fn sizes(&self, size: usize, ephemeral: usize) {
        self.size.set(size as i64);
        self.ephemeral.set(ephemeral as i64);
    }
}

#[cfg(test)]
pub(crate) fn encode(registry: &Registry) -> String {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, registry).expect("encoding failed");
    buffer
}
