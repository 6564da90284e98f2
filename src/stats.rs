//! Observability snapshot exposed by [`crate::facade::CleverKeysEngine::stats`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// A point-in-time snapshot of pool, latency, and queue-depth counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stats {
    pub pool_acquisitions: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub pool_active: u64,
    pub avg_encoder_ms: f64,
    pub avg_decoder_ms: f64,
    pub encoder_queue_depth: usize,
    pub decoder_queue_depth: usize,
}

impl Stats {
    pub fn pool_hit_rate(&self) -> f64 {
        if self.pool_acquisitions == 0 {
            0.0
        } else {
            self.pool_hits as f64 / self.pool_acquisitions as f64
        }
    }
}

/// Rolling-average accumulator for a single latency series.
///
/// Backed by a sum (nanoseconds) and a count, both `Relaxed` atomics: these are
/// observability counters, not synchronization, so ordering between them and the work
/// they describe is not load-bearing.
#[derive(Debug, Default)]
pub(crate) struct LatencyAccumulator {
    total_ns: AtomicU64,
    count: AtomicU64,
}

impl LatencyAccumulator {
    pub(crate) fn record(&self, elapsed: std::time::Duration) {
        self.total_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }
}

/// Tracks the approximate number of items currently enqueued (sent but not yet received) on
/// a [`std::sync::mpsc::sync_channel`] — which exposes no depth query of its own.
#[derive(Debug, Default)]
pub(crate) struct QueueDepth(AtomicUsize);

impl QueueDepth {
    pub(crate) fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}
