use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for a load.
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of chunks discovered
    pub scanned: Counter,
    /// Number of chunks loaded
    pub loaded: Counter,
    /// Current number of chunks that failed their latest attempt
    pub failed: Gauge,
    /// Number of chunks put back in the queue after exhausting their retry budget
    pub requeued: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "scanned",
            "Number of chunks discovered",
            metrics.scanned.clone(),
        );
        context.register("loaded", "Number of chunks loaded", metrics.loaded.clone());
        context.register(
            "failed",
            "Current number of chunks that failed their latest attempt",
            metrics.failed.clone(),
        );
        context.register(
            "requeued",
            "Number of chunks requeued after exhausting their retry budget",
            metrics.requeued.clone(),
        );
        metrics
    }
}
