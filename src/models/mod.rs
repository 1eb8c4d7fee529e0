//! Data models and structures for the bufferbloat tester

pub mod config;
pub mod metrics;

// Re-export main model types
pub use config::{Config, ServerConfig, TestPlan};
pub use metrics::{DownloadMeasurement, LatencyStatistics, TestReport, UploadMeasurement};
