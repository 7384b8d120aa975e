//! Lock-free queue metrics.
//!
//! Counters sit on the enqueue/dequeue hot path, so they are plain atomics;
//! [`QueueMetrics::snapshot`] produces a consistent-enough view for the
//! stats endpoint. Gauges and counters are mirrored to the `metrics` facade
//! for the Prometheus exporter.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct QueueMetrics {
    total_enqueued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    depth: AtomicI64,
    // For the running average wait: total waited micros over dequeue count.
    wait_micros_total: AtomicU64,
    dequeues: AtomicU64,
}

/// Point-in-time view for external consumption.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetricsSnapshot {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub depth: i64,
    pub avg_wait_ms: f64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&self) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.depth.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("queue.enqueued").increment(1);
        metrics::gauge!("queue.depth").increment(1.0);
    }

    pub fn record_dequeue(&self, waited: Duration) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.wait_micros_total
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        self.dequeues.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("queue.depth").decrement(1.0);
        metrics::histogram!("queue.wait_seconds").record(waited.as_secs_f64());
    }

    pub fn record_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("queue.processed").increment(1);
    }

    pub fn record_failed(&self) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("queue.failed").increment(1);
    }

    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        let dequeues = self.dequeues.load(Ordering::Relaxed);
        let avg_wait_ms = if dequeues == 0 {
            0.0
        } else {
            self.wait_micros_total.load(Ordering::Relaxed) as f64 / dequeues as f64 / 1_000.0
        };
        QueueMetricsSnapshot {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            depth: self.depth.load(Ordering::Relaxed),
            avg_wait_ms,
        }
    }
}
