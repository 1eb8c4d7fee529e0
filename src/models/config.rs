//! Configuration data model and validation

use crate::types::{AppError, Result};
use crate::server::rate_limiter::RateLimiter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Maximum number of concurrent upload or download streams
pub const MAX_STREAMS: usize = 16;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Measurement server settings (`bbt serve`)
    #[serde(default)]
    pub server: ServerConfig,

    /// Test plan for the client orchestrator (`bbt run`)
    #[serde(default)]
    pub plan: TestPlan,

    /// Base URL of the measurement server the client talks to
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    /// Print reports as JSON instead of a table
    #[serde(default)]
    pub json_output: bool,

    /// Explicit log level (overrides the verbose/debug derived level)
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Measurement server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads; `None` means one per CPU
    pub worker_threads: Option<usize>,
    /// Target rate of the throttled download stream
    pub download_rate_bps: u64,
    pub download_chunk_size: usize,
    pub max_rate_limit_sleep: Duration,
    pub upload_read_size: usize,
    /// Cap for `GET /api/download/{n}`
    pub max_fixed_download_mb: u64,
    /// Optional bandwidth cap pacing `GET /api/download/{n}`
    #[serde(default)]
    pub max_download_mbps: Option<f64>,
    /// Optional bandwidth cap on how fast upload bodies are consumed
    #[serde(default)]
    pub max_upload_mbps: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            worker_threads: None,
            download_rate_bps: DOWNLOAD_TARGET_BYTES_PER_SEC,
            download_chunk_size: DOWNLOAD_CHUNK_SIZE,
            max_rate_limit_sleep: MAX_RATE_LIMIT_SLEEP,
            upload_read_size: UPLOAD_READ_SIZE,
            max_fixed_download_mb: MAX_FIXED_DOWNLOAD_MB,
            max_download_mbps: None,
            max_upload_mbps: None,
        }
    }
}

impl ServerConfig {
    /// Socket address string to bind
    pub fn bind_address(&self) -> String {
        match IpAddr::from_str(&self.host) {
            Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Worker thread count actually used by the runtime
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Nominal download rate in Mbps, as advertised in `X-Stream-Type`
    pub fn download_rate_mbps(&self) -> u64 {
        (self.download_rate_bps as f64 * 8.0 / crate::defaults::BYTES_PER_MIB as f64).round() as u64
    }

    /// Limiter for fixed-size downloads, if a download cap is set
    pub fn download_cap(&self) -> Option<RateLimiter> {
        self.max_download_mbps.map(|mbps| RateLimiter::from_mbps(mbps, self.max_rate_limit_sleep))
    }

    /// Limiter for upload consumption, if an upload cap is set
    pub fn upload_cap(&self) -> Option<RateLimiter> {
        self.max_upload_mbps.map(|mbps| RateLimiter::from_mbps(mbps, self.max_rate_limit_sleep))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::config("Server host cannot be empty"));
        }
        if self.download_rate_bps == 0 {
            return Err(AppError::config("Download rate must be greater than 0"));
        }
        if self.download_chunk_size == 0 || self.upload_read_size == 0 {
            return Err(AppError::config("Chunk sizes must be greater than 0"));
        }
        if self.max_rate_limit_sleep.is_zero() {
            return Err(AppError::config("Maximum rate limit sleep must be greater than 0"));
        }
        let limit = crate::defaults::FIXED_DOWNLOAD_MB_LIMIT;
        if self.max_fixed_download_mb == 0 || self.max_fixed_download_mb > limit {
            return Err(AppError::config(format!(
                "Maximum fixed download size must be between 1 and {} MB, got {}",
                limit, self.max_fixed_download_mb
            )));
        }
        for (name, cap) in [("download", self.max_download_mbps), ("upload", self.max_upload_mbps)] {
            if let Some(mbps) = cap {
                if !mbps.is_finite() || mbps <= 0.0 {
                    return Err(AppError::config(format!("Maximum {} bandwidth must be a positive number of Mbps, got {}", name, mbps)));
                }
            }
        }
        if let Some(threads) = self.worker_threads {
            if threads == 0 || threads > 512 {
                return Err(AppError::config(format!("Worker threads must be between 1 and 512, got {}", threads)));
            }
        }
        Ok(())
    }
}

/// Phase timings and sizes for one orchestrated test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub upload_streams: usize,
    pub uploads_per_stream: usize,
    pub upload_chunk_size: usize,
    pub upload_chunk_delay: Duration,
    pub upload_phase_timeout: Duration,
    /// Minimum bytes needed to report a speed from a failed or timed-out upload phase
    pub upload_min_partial_bytes: u64,
    pub probe_timeout: Duration,
    pub probe_timeout_jitter: Duration,
    pub baseline_duration: Duration,
    pub baseline_interval: Duration,
    pub download_streams: usize,
    pub load_settle_delay: Duration,
    pub loaded_duration: Duration,
    pub loaded_interval: Duration,
    pub teardown_timeout: Duration,
    pub download_log_interval: Duration,
}

impl Default for TestPlan {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            upload_streams: UPLOAD_STREAMS,
            uploads_per_stream: UPLOADS_PER_STREAM,
            upload_chunk_size: UPLOAD_CHUNK_SIZE,
            upload_chunk_delay: UPLOAD_CHUNK_DELAY,
            upload_phase_timeout: UPLOAD_PHASE_TIMEOUT,
            upload_min_partial_bytes: UPLOAD_MIN_PARTIAL_BYTES,
            probe_timeout: PROBE_TIMEOUT,
            probe_timeout_jitter: PROBE_TIMEOUT_JITTER,
            baseline_duration: BASELINE_DURATION,
            baseline_interval: BASELINE_INTERVAL,
            download_streams: DOWNLOAD_STREAMS,
            load_settle_delay: LOAD_SETTLE_DELAY,
            loaded_duration: LOADED_DURATION,
            loaded_interval: LOADED_INTERVAL,
            teardown_timeout: TEARDOWN_TIMEOUT,
            download_log_interval: DOWNLOAD_LOG_INTERVAL,
        }
    }
}

impl TestPlan {
    /// Number of probes in the baseline phase
    pub fn baseline_probe_count(&self) -> usize {
        probe_count(self.baseline_duration, self.baseline_interval)
    }

    /// Number of probes in the loaded phase
    pub fn loaded_probe_count(&self) -> usize {
        probe_count(self.loaded_duration, self.loaded_interval)
    }

    /// Total bytes the upload phase sends when every chunk succeeds
    pub fn planned_upload_bytes(&self) -> u64 {
        (self.upload_streams * self.uploads_per_stream * self.upload_chunk_size) as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_streams == 0 || self.upload_streams > MAX_STREAMS {
            return Err(AppError::config(format!("Upload streams must be between 1 and {}", MAX_STREAMS)));
        }
        if self.download_streams == 0 || self.download_streams > MAX_STREAMS {
            return Err(AppError::config(format!("Download streams must be between 1 and {}", MAX_STREAMS)));
        }
        if self.uploads_per_stream == 0 {
            return Err(AppError::config("Uploads per stream must be greater than 0"));
        }
        if self.upload_chunk_size == 0 {
            return Err(AppError::config("Upload chunk size must be greater than 0"));
        }
        if self.upload_phase_timeout.is_zero() {
            return Err(AppError::config("Upload phase timeout must be greater than 0"));
        }
        if self.probe_timeout.is_zero() {
            return Err(AppError::config("Probe timeout must be greater than 0"));
        }
        if self.baseline_interval.is_zero() || self.baseline_interval > self.baseline_duration {
            return Err(AppError::config("Baseline interval must be greater than 0 and no longer than the baseline duration"));
        }
        if self.loaded_interval.is_zero() || self.loaded_interval > self.loaded_duration {
            return Err(AppError::config("Loaded interval must be greater than 0 and no longer than the loaded duration"));
        }
        if self.teardown_timeout.is_zero() {
            return Err(AppError::config("Teardown timeout must be greater than 0"));
        }
        Ok(())
    }
}

fn probe_count(duration: Duration, interval: Duration) -> usize {
    if interval.is_zero() {
        return 1;
    }
    ((duration.as_millis() / interval.as_millis().max(1)) as usize).max(1)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            plan: TestPlan::default(),
            server_url: default_server_url(),
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
            json_output: false,
            log_level: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed server URL
    pub fn server_url(&self) -> Result<url::Url> {
        Ok(url::Url::parse(&self.server_url)?)
    }

    /// Whether the client targets a loopback host
    pub fn targets_localhost(&self) -> bool {
        match url::Url::parse(&self.server_url) {
            Ok(parsed) => match parsed.host() {
                Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
                Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
                Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(AppError::config("Server URL cannot be empty"));
        }

        match url::Url::parse(&self.server_url) {
            Ok(parsed) => {
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(AppError::config(format!("Server URL must use http or https: {}", self.server_url)));
                }
                if parsed.host().is_none() {
                    return Err(AppError::config(format!("Server URL has no host: {}", self.server_url)));
                }
            }
            Err(e) => {
                return Err(AppError::config(format!("Invalid server URL '{}': {}", self.server_url, e)));
            }
        }

        if let Some(level) = &self.log_level {
            level.parse::<crate::logging::LogLevel>()
                .map_err(|_| AppError::config(format!("Invalid log level: {}", level)))?;
        }

        self.server.validate()?;
        self.plan.validate()?;

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host.trim().to_string();
        }

        if let Ok(port) = std::env::var("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }

        if let Ok(threads) = std::env::var("WORKER_THREADS") {
            self.server.worker_threads = Some(parse_env("WORKER_THREADS", &threads)?);
        }

        if let Ok(rate) = std::env::var("DOWNLOAD_RATE_BPS") {
            self.server.download_rate_bps = parse_env("DOWNLOAD_RATE_BPS", &rate)?;
        }

        if let Ok(max_mb) = std::env::var("MAX_FIXED_DOWNLOAD_MB") {
            self.server.max_fixed_download_mb = parse_env("MAX_FIXED_DOWNLOAD_MB", &max_mb)?;
        }

        if let Ok(mbps) = std::env::var("MAX_DOWNLOAD_MBPS") {
            self.server.max_download_mbps = Some(parse_env("MAX_DOWNLOAD_MBPS", &mbps)?);
        }

        if let Ok(mbps) = std::env::var("MAX_UPLOAD_MBPS") {
            self.server.max_upload_mbps = Some(parse_env("MAX_UPLOAD_MBPS", &mbps)?);
        }

        if let Ok(server_url) = std::env::var("SERVER_URL") {
            self.server_url = server_url.trim().to_string();
        }

        if let Ok(streams) = std::env::var("UPLOAD_STREAMS") {
            self.plan.upload_streams = parse_env("UPLOAD_STREAMS", &streams)?;
        }

        if let Ok(count) = std::env::var("UPLOADS_PER_STREAM") {
            self.plan.uploads_per_stream = parse_env("UPLOADS_PER_STREAM", &count)?;
        }

        if let Ok(chunk_kb) = std::env::var("UPLOAD_CHUNK_KB") {
            let kb: usize = parse_env("UPLOAD_CHUNK_KB", &chunk_kb)?;
            self.plan.upload_chunk_size = kb.checked_mul(1024)
                .ok_or_else(|| AppError::config(format!("UPLOAD_CHUNK_KB is too large: {}", kb)))?;
        }

        if let Ok(partial_kb) = std::env::var("UPLOAD_MIN_PARTIAL_KB") {
            let kb: u64 = parse_env("UPLOAD_MIN_PARTIAL_KB", &partial_kb)?;
            self.plan.upload_min_partial_bytes = kb.checked_mul(1024)
                .ok_or_else(|| AppError::config(format!("UPLOAD_MIN_PARTIAL_KB is too large: {}", kb)))?;
        }

        if let Ok(streams) = std::env::var("DOWNLOAD_STREAMS") {
            self.plan.download_streams = parse_env("DOWNLOAD_STREAMS", &streams)?;
        }

        if let Ok(timeout) = std::env::var("PROBE_TIMEOUT_MS") {
            let ms: u64 = parse_env("PROBE_TIMEOUT_MS", &timeout)?;
            self.plan.probe_timeout = Duration::from_millis(ms);
        }

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = parse_env("ENABLE_COLOR", &enable_color)?;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = Some(level.trim().to_string());
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse()
        .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", name, value, e)))
}

// Default value functions for serde
fn default_server_url() -> String {
    crate::defaults::DEFAULT_SERVER_URL.to_string()
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}
