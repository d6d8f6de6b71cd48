//! Metrics export and snapshot functionality

use crate::Histogram;
use serde::{Deserialize, Serialize};

/// Snapshot of the runtime metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks spawned
    pub spawned: u64,
    /// Tasks that had at least one predecessor when spawned
    pub deferred: u64,
    /// Dependency edges created
    pub dependency_edges: u64,
    /// Tasks completed
    pub completed: u64,
    /// Task bodies that returned an error or panicked
    pub failed: u64,
    /// Tasks spawned but not yet completed
    pub outstanding: i64,
    /// Body run time in microseconds
    pub run_time_us: HistogramSummary,
    /// Predecessors per spawned task
    pub predecessors: HistogramSummary,
}

/// Summary of a histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Mean value
    pub mean: f64,
    /// Largest value
    pub max: u64,
    /// Total observation count
    pub count: u64,
}

impl HistogramSummary {
    /// Summarize a histogram
    pub fn from_histogram(histogram: &Histogram) -> Self {
        Self {
            mean: histogram.mean(),
            max: histogram.max(),
            count: histogram.total_count(),
        }
    }
}

impl MetricsSnapshot {
    /// Export snapshot as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export snapshot as compact JSON string
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
