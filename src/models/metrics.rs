//! Latency statistics and test report data models

use crate::stats::{self, BufferbloatAnalysis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary statistics over one phase's latency samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStatistics {
    /// Mean latency (milliseconds)
    pub mean_ms: f64,

    /// Minimum latency (milliseconds)
    pub min_ms: f64,

    /// Maximum latency (milliseconds)
    pub max_ms: f64,

    /// Population standard deviation around the mean (milliseconds)
    pub std_dev_ms: f64,

    /// Number of samples included in the statistics
    pub sample_count: usize,

    /// How many of those samples are timeout substitutes
    pub timeout_count: usize,
}

impl LatencyStatistics {
    /// Calculate statistics from latency values in milliseconds
    pub fn from_millis(values: &[f64]) -> Self {
        let count = values.len();

        if count == 0 {
            return Self::empty();
        }

        let mean = stats::mean(values);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Self {
            mean_ms: mean,
            min_ms: min,
            max_ms: max,
            std_dev_ms: stats::population_std_dev(values, mean),
            sample_count: count,
            timeout_count: 0,
        }
    }

    /// Record how many samples were timeout substitutes
    pub fn with_timeouts(mut self, timeout_count: usize) -> Self {
        self.timeout_count = timeout_count;
        self
    }

    /// Create empty statistics
    pub fn empty() -> Self {
        Self {
            mean_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            std_dev_ms: 0.0,
            sample_count: 0,
            timeout_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Format mean for display
    pub fn format_mean(&self) -> String {
        format!("{:.1}ms", self.mean_ms)
    }
}

/// Result of the upload phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMeasurement {
    pub speed_mbps: f64,
    pub bytes: u64,
    pub elapsed_secs: f64,
    /// Every chunk of every stream was acknowledged before the phase timeout
    pub completed: bool,
}

/// Result of the loaded phase's download streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadMeasurement {
    pub speed_mbps: f64,
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub per_stream_bytes: Vec<u64>,
}

/// Everything one orchestrated run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub run_id: Uuid,
    pub server_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub upload: UploadMeasurement,
    pub download: DownloadMeasurement,
    pub baseline_samples: Vec<f64>,
    pub loaded_samples: Vec<f64>,
    pub baseline: LatencyStatistics,
    pub loaded: LatencyStatistics,
    pub analysis: BufferbloatAnalysis,
}

impl TestReport {
    /// Wall-clock duration of the run in seconds
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Export the report as pretty JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
