//! # depspawn-metrics
//!
//! Runtime metrics for the depspawn engine.
//!
//! Features:
//! - Lock-free counters for spawns, dependency edges and completions
//! - Histograms for task run time and predecessors per task
//! - JSON export

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod export;
mod histogram;

pub use collector::RuntimeMetrics;
pub use export::{HistogramSummary, MetricsSnapshot};
pub use histogram::Histogram;

/// Time a block of code and record its duration in microseconds
#[macro_export]
macro_rules! timed {
    ($histogram:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        $histogram.observe(start.elapsed().as_micros() as f64);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_records_observation() {
        let histogram = Histogram::new();
        let value = timed!(histogram, { 40 + 2 });
        assert_eq!(value, 42);
        assert_eq!(histogram.total_count(), 1);
    }
}
