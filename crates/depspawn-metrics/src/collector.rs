//! Runtime metrics collector

use crate::{Histogram, HistogramSummary, MetricsSnapshot};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Thread-safe metrics of one runtime
///
/// Every method is lock-free and may be called from any worker.
pub struct RuntimeMetrics {
    spawned: AtomicU64,
    deferred: AtomicU64,
    dependency_edges: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    outstanding: AtomicI64,
    run_time: Histogram,
    predecessors: Histogram,
}

impl RuntimeMetrics {
    /// Create an empty metrics store
    pub fn new() -> Self {
        Self {
            spawned: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            dependency_edges: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            outstanding: AtomicI64::new(0),
            run_time: Histogram::new(),
            predecessors: Histogram::for_counts(),
        }
    }

    /// Record a spawned task and the number of tasks it waits for
    pub fn record_spawn(&self, predecessors: usize) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        if predecessors > 0 {
            self.deferred.fetch_add(1, Ordering::Relaxed);
        }
        self.dependency_edges
            .fetch_add(predecessors as u64, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.predecessors.observe(predecessors as f64);
    }

    /// Histogram of body run times in microseconds
    pub fn run_time(&self) -> &Histogram {
        &self.run_time
    }

    /// Record a failed body
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that finished, subtasks included
    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    /// Tasks spawned so far
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Tasks completed so far
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks spawned but not completed
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spawned: self.spawned(),
            deferred: self.deferred.load(Ordering::Relaxed),
            dependency_edges: self.dependency_edges.load(Ordering::Relaxed),
            completed: self.completed(),
            failed: self.failed.load(Ordering::Relaxed),
            outstanding: self.outstanding(),
            run_time_us: HistogramSummary::from_histogram(&self.run_time),
            predecessors: HistogramSummary::from_histogram(&self.predecessors),
        }
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_counters() {
        let metrics = RuntimeMetrics::new();
        metrics.record_spawn(0);
        metrics.record_spawn(2);
        metrics.record_spawn(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.spawned, 3);
        assert_eq!(snap.deferred, 2);
        assert_eq!(snap.dependency_edges, 3);
        assert_eq!(snap.outstanding, 3);
        assert_eq!(snap.predecessors.count, 3);
        assert_eq!(snap.predecessors.mean, 1.0);
    }

    #[test]
    fn test_completion_counters() {
        let metrics = RuntimeMetrics::new();
        metrics.record_spawn(0);
        metrics.record_spawn(0);
        metrics.run_time().observe(120.0);
        metrics.record_failure();
        metrics.record_completion();

        let snap = metrics.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.outstanding, 1);
        assert_eq!(snap.run_time_us.count, 1);
        assert_eq!(snap.run_time_us.max, 120);
    }
}
