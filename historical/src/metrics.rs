use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Engine`](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of lookups resolved with a round
    pub resolved: Counter,
    /// Number of lookups that exhausted their retries
    pub failed: Counter,
    /// Number of times a round was reported missing without exhausting retries
    pub retried: Counter,
    /// Number of batches sent to a gateway
    pub flushes: Counter,
    /// Number of batches that could not be sent
    pub rpc_failures: Counter,
    /// Number of lookups in the current batch
    pub batch: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "resolved",
            "Number of lookups resolved with a round",
            metrics.resolved.clone(),
        );
        context.register(
            "failed",
            "Number of lookups that exhausted their retries",
            metrics.failed.clone(),
        );
        context.register(
            "retried",
            "Number of times a round was reported missing without exhausting retries",
            metrics.retried.clone(),
        );
        context.register(
            "flushes",
            "Number of batches sent to a gateway",
            metrics.flushes.clone(),
        );
        context.register(
            "rpc_failures",
            "Number of batches that could not be sent",
            metrics.rpc_failures.clone(),
        );
        context.register(
            "batch",
            "Number of lookups in the current batch",
            metrics.batch.clone(),
        );
        metrics
    }
}
