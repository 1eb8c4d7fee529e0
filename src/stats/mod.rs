//! Statistical analysis and bufferbloat scoring

use crate::{
    error::{AppError, Result},
    models::metrics::LatencyStatistics,
    types::Grade,
};
use serde::{Deserialize, Serialize};

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a precomputed mean
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Throughput in Mbps (`bytes * 8 / (secs * 1_048_576)`); 0 when no time has elapsed
pub fn throughput_mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    if !(elapsed_secs > 0.0) {
        return 0.0;
    }
    (bytes as f64 * 8.0) / (elapsed_secs * crate::defaults::BYTES_PER_MIB as f64)
}

/// Configuration for scoring
#[derive(Debug, Clone)]
pub struct StatisticsConfig {
    /// Loaded mean at or above which the severe explanation is used
    pub severe_loaded_latency_ms: f64,
    /// Percentiles reported alongside the analysis (e.g. 50th, 95th)
    pub percentiles: Vec<f64>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            severe_loaded_latency_ms: crate::defaults::SEVERE_LOADED_LATENCY_MS,
            percentiles: vec![50.0, 95.0],
        }
    }
}

/// Outcome of comparing loaded latency against baseline latency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferbloatAnalysis {
    /// loaded mean / baseline mean
    pub ratio: f64,
    pub grade: Grade,
    /// Standard deviation of the loaded samples
    pub jitter_ms: f64,
    /// Latency increase, `round((ratio - 1) * 100)`
    pub increase_percent: i64,
    /// Loaded mean reached the severe threshold
    pub severe: bool,
    pub explanation: String,
    /// Loaded-phase percentiles as `(percentile, value_ms)`
    pub loaded_percentiles: Vec<(f64, f64)>,
}

/// Scoring engine for a completed run
pub struct StatisticsEngine {
    config: StatisticsConfig,
}

impl StatisticsEngine {
    pub fn new(config: StatisticsConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(StatisticsConfig::default())
    }

    /// Bufferbloat ratio; 0 when the baseline mean is not positive
    pub fn ratio(baseline_mean_ms: f64, loaded_mean_ms: f64) -> f64 {
        if baseline_mean_ms > 0.0 {
            loaded_mean_ms / baseline_mean_ms
        } else {
            0.0
        }
    }

    /// Score a run from its baseline and loaded samples
    pub fn analyze(&self, baseline_ms: &[f64], loaded_ms: &[f64]) -> Result<BufferbloatAnalysis> {
        if baseline_ms.is_empty() {
            return Err(AppError::baseline_unavailable("Failed to measure baseline latency"));
        }
        if loaded_ms.is_empty() {
            return Err(AppError::statistics("No latency samples were collected under load"));
        }

        let baseline = LatencyStatistics::from_millis(baseline_ms);
        let loaded = LatencyStatistics::from_millis(loaded_ms);
        Ok(self.analyze_statistics(&baseline, &loaded, loaded_ms))
    }

    fn analyze_statistics(&self, baseline: &LatencyStatistics, loaded: &LatencyStatistics, loaded_ms: &[f64]) -> BufferbloatAnalysis {
        let ratio = Self::ratio(baseline.mean_ms, loaded.mean_ms);
        let grade = Grade::from_ratio(ratio);
        let increase_percent = ((ratio - 1.0) * 100.0).round() as i64;
        let severe = loaded.mean_ms >= self.config.severe_loaded_latency_ms;

        let explanation = if severe {
            Grade::severe_explanation(loaded.mean_ms, increase_percent)
        } else {
            grade.explanation(increase_percent)
        };

        let mut sorted = loaded_ms.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let loaded_percentiles = self.config.percentiles.iter()
            .map(|&p| (p, self.calculate_percentile(&sorted, p)))
            .collect();

        BufferbloatAnalysis {
            ratio,
            grade,
            jitter_ms: loaded.std_dev_ms,
            increase_percent,
            severe,
            explanation,
            loaded_percentiles,
        }
    }

    /// Linear-interpolated percentile of an ascending slice
    fn calculate_percentile(&self, sorted_values: &[f64], percentile: f64) -> f64 {
        if sorted_values.is_empty() {
            return 0.0;
        }

        let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted_values.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;

        if lower == upper {
            sorted_values[lower]
        } else {
            let weight = rank - lower as f64;
            sorted_values[lower] * (1.0 - weight) + sorted_values[upper] * weight
        }
    }
}


#[cfg(test)]
mod comprehensive_tests;
