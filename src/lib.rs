//! Bufferbloat Tester
//!
//! An HTTP-only network quality tester. The measurement server streams
//! throttled downloads, drains uploads and answers latency probes; the client
//! orchestrates an upload phase, a baseline latency phase and a loaded latency
//! phase, then grades the latency increase caused by load.

pub mod app;
pub mod cli;
pub mod config;
pub mod client;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod models;
pub mod server;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use models::{Config, LatencyStatistics, ServerConfig, TestPlan, TestReport};
pub use client::{HttpMeasurementClient, LatencyProbe, LatencySample, MeasurementClient};
pub use orchestrator::{ProgressSink, ProgressTracker, ProgressUpdate, TestOrchestrator};
pub use server::{AccountingSnapshot, BufferbloatServer, RateLimiter, StreamAccountant};
pub use stats::{BufferbloatAnalysis, StatisticsEngine};
pub use types::{Grade, TestPhase};
pub use output::{OutputFormatter, ColoredFormatter, PlainFormatter, OutputFormatterFactory};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Bytes per MiB, used by every Mbps conversion
    pub const BYTES_PER_MIB: u64 = 1_048_576;

    // Server
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;
    pub const DOWNLOAD_TARGET_BYTES_PER_SEC: u64 = 1_280_000;  // ~10 Mbps
    pub const MAX_RATE_LIMIT_SLEEP: Duration = Duration::from_millis(200);
    pub const DOWNLOAD_LOG_INTERVAL_BYTES: u64 = 5 * BYTES_PER_MIB;
    pub const UPLOAD_READ_SIZE: usize = 8 * 1024;
    pub const MAX_FIXED_DOWNLOAD_MB: u64 = 1024;
    /// Upper bound accepted for the fixed-download cap (1 TiB)
    pub const FIXED_DOWNLOAD_MB_LIMIT: u64 = 1_048_576;
    /// Chunk size for fixed downloads paced by a bandwidth cap
    pub const CAPPED_DOWNLOAD_CHUNK_SIZE: usize = 256 * 1024;
    /// How long `serve` waits for open connections after shutdown is requested
    pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    // Client
    pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
    pub const UPLOAD_STREAMS: usize = 2;
    pub const UPLOADS_PER_STREAM: usize = 8;
    pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
    pub const UPLOAD_CHUNK_DELAY: Duration = Duration::from_millis(5);
    pub const UPLOAD_PHASE_TIMEOUT: Duration = Duration::from_secs(8);
    pub const UPLOAD_MIN_PARTIAL_BYTES: u64 = 512 * 1024;
    pub const PROBE_TIMEOUT: Duration = Duration::from_millis(2000);
    pub const PROBE_TIMEOUT_JITTER: Duration = Duration::from_millis(1000);
    pub const BASELINE_DURATION: Duration = Duration::from_secs(3);
    pub const BASELINE_INTERVAL: Duration = Duration::from_millis(250);
    pub const DOWNLOAD_STREAMS: usize = 2;
    pub const LOAD_SETTLE_DELAY: Duration = Duration::from_secs(3);
    pub const LOADED_DURATION: Duration = Duration::from_secs(10);
    pub const LOADED_INTERVAL: Duration = Duration::from_millis(500);
    pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DOWNLOAD_LOG_INTERVAL: Duration = Duration::from_secs(3);

    // Scoring
    pub const SEVERE_LOADED_LATENCY_MS: f64 = 2000.0;

    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
