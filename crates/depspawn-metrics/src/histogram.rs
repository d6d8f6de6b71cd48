//! Histogram with fixed bucket boundaries

use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram for tracking value distributions
pub struct Histogram {
    /// Inclusive upper bucket boundaries
    buckets: Vec<f64>,
    /// Counts per bucket, plus one overflow slot
    counts: Vec<AtomicU64>,
    /// Sum of all values
    sum: AtomicU64,
    /// Largest value seen
    max: AtomicU64,
    /// Total count
    count: AtomicU64,
}

impl Histogram {
    /// Create histogram with default latency buckets (microseconds)
    pub fn new() -> Self {
        Self::with_buckets(vec![
            10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 100000.0,
        ])
    }

    /// Create histogram with buckets suited to small counts
    pub fn for_counts() -> Self {
        Self::with_buckets(vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 64.0])
    }

    /// Create histogram with custom buckets
    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        let counts = (0..=buckets.len()).map(|_| AtomicU64::new(0)).collect();
        Histogram {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value
    pub fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.max.fetch_max(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let slot = self
            .buckets
            .iter()
            .position(|boundary| value <= *boundary)
            .unwrap_or(self.buckets.len());
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Get mean value
    pub fn mean(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Get largest observed value, truncated
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Get total count
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Bucket boundaries with their counts; the overflow bucket has no boundary
    pub fn bucket_counts(&self) -> Vec<(Option<f64>, u64)> {
        self.buckets
            .iter()
            .map(|b| Some(*b))
            .chain(std::iter::once(None))
            .zip(&self.counts)
            .map(|(bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_max() {
        let h = Histogram::new();
        assert_eq!(h.mean(), 0.0);
        h.observe(100.0);
        h.observe(300.0);
        assert_eq!(h.mean(), 200.0);
        assert_eq!(h.max(), 300);
        assert_eq!(h.total_count(), 2);
    }

    #[test]
    fn test_overflow_bucket() {
        let h = Histogram::with_buckets(vec![1.0, 10.0]);
        h.observe(0.5);
        h.observe(10.0);
        h.observe(11.0);

        let buckets = h.bucket_counts();
        assert_eq!(buckets, vec![(Some(1.0), 1), (Some(10.0), 1), (None, 1)]);
    }

    #[test]
    fn test_count_buckets() {
        let h = Histogram::for_counts();
        h.observe(0.0);
        h.observe(0.0);
        h.observe(3.0);
        let buckets = h.bucket_counts();
        assert_eq!(buckets[0], (Some(0.0), 2));
        assert_eq!(buckets[3], (Some(4.0), 1));
    }
}
