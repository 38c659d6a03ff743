//! Metric names and the sink the reader emits into.
//!
//! Events are fire-and-forget; the sink has no return value and must not
//! block the read path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter: number of on-demand file fetches from the remote registry.
pub const ON_DEMAND_REMOTE_REGISTRY_FETCH_COUNT: &str = "on_demand_remote_registry_fetch_count";

/// Byte counter: number of on-demand bytes served to readers.
pub const ON_DEMAND_BYTES_SERVED: &str = "on_demand_bytes_served";

/// Receiver for counter and byte-counter events, tagged with the layer
/// digest.
pub trait MetricsSink: Send + Sync {
    /// Increment the named counter by one.
    fn inc_operation_count(&self, metric: &'static str, layer_digest: &str);

    /// Add `bytes` to the named byte counter.
    fn add_bytes_count(&self, metric: &'static str, layer_digest: &str, bytes: u64);
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopMetrics;

impl MetricsSink for NopMetrics {
    fn inc_operation_count(&self, _metric: &'static str, _layer_digest: &str) {}

    fn add_bytes_count(&self, _metric: &'static str, _layer_digest: &str, _bytes: u64) {}
}

/// In-memory counting sink.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    fetches: AtomicU64,
    bytes_served: AtomicU64,
}

impl CountingMetrics {
    /// Number of fetch-count events observed.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Total bytes-served observed.
    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingMetrics {
    fn inc_operation_count(&self, metric: &'static str, _layer_digest: &str) {
        if metric == ON_DEMAND_REMOTE_REGISTRY_FETCH_COUNT {
            self.fetches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn add_bytes_count(&self, metric: &'static str, _layer_digest: &str, bytes: u64) {
        if metric == ON_DEMAND_BYTES_SERVED {
            self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
        }
    }
}
