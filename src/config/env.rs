//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        if Path::new(".env").exists() {
            dotenv::from_filename(".env")
                .map_err(|e| AppError::config(format!("Failed to load .env file: {}", e)))?;

            if debug {
                eprintln!("Loaded configuration from .env file");
            }
        } else if debug {
            eprintln!("No .env file found, using defaults and CLI arguments");
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Bufferbloat Tester Configuration
#
# Values specified here are used as defaults and can be overridden by
# environment variables and command-line arguments.

# --- Server (bbt serve) ---

# Address and port to listen on
# HOST=0.0.0.0
# PORT=8080

# Runtime worker threads (defaults to one per CPU)
# WORKER_THREADS=4

# Target rate of each throttled download stream in bytes/second (~10 Mbps)
# DOWNLOAD_RATE_BPS=1280000

# Largest size accepted by GET /api/download/{n}
# MAX_FIXED_DOWNLOAD_MB=1024

# Optional bandwidth caps in Mbps: pace GET /api/download/{n} and
# throttle how fast POST /api/upload bodies are consumed (unset = unlimited)
# MAX_DOWNLOAD_MBPS=50
# MAX_UPLOAD_MBPS=20

# --- Client (bbt run) ---

# Measurement server base URL
# SERVER_URL=http://127.0.0.1:8080

# Upload phase shape
# UPLOAD_STREAMS=2
# UPLOADS_PER_STREAM=8
# UPLOAD_CHUNK_KB=64
# UPLOAD_MIN_PARTIAL_KB=512

# Concurrent download streams during the loaded phase
# DOWNLOAD_STREAMS=2

# Latency probe timeout in milliseconds
# PROBE_TIMEOUT_MS=2000

# --- Output ---

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Log level (error, warn, info, debug, trace)
# LOG_LEVEL=info
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "HOST" => {
                if value.is_empty() {
                    return Err(AppError::config("HOST cannot be empty"));
                }
            }
            "PORT" => {
                value
                    .parse::<u16>()
                    .map_err(|e| AppError::config(format!("Invalid PORT value '{}': {}", value, e)))?;
            }
            "WORKER_THREADS" => {
                let threads = parse_number(key, value)?;
                if threads == 0 || threads > 512 {
                    return Err(AppError::config(format!("WORKER_THREADS must be between 1 and 512, got: {}", threads)));
                }
            }
            "UPLOAD_STREAMS" | "DOWNLOAD_STREAMS" => {
                let streams = parse_number(key, value)?;
                let max = crate::models::config::MAX_STREAMS as u64;
                if streams == 0 || streams > max {
                    return Err(AppError::config(format!("{} must be between 1 and {}, got: {}", key, max, streams)));
                }
            }
            "DOWNLOAD_RATE_BPS" | "UPLOADS_PER_STREAM" | "PROBE_TIMEOUT_MS" => {
                if parse_number(key, value)? == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "MAX_FIXED_DOWNLOAD_MB" => {
                let megabytes = parse_number(key, value)?;
                let limit = crate::defaults::FIXED_DOWNLOAD_MB_LIMIT;
                if megabytes == 0 || megabytes > limit {
                    return Err(AppError::config(format!("{} must be between 1 and {}, got: {}", key, limit, megabytes)));
                }
            }
            "UPLOAD_CHUNK_KB" | "UPLOAD_MIN_PARTIAL_KB" => {
                let kb = parse_number(key, value)?;
                if key == "UPLOAD_CHUNK_KB" && kb == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
                if kb.checked_mul(1024).is_none() {
                    return Err(AppError::config(format!("{} is too large: {}", key, kb)));
                }
            }
            "MAX_DOWNLOAD_MBPS" | "MAX_UPLOAD_MBPS" => {
                let mbps = value
                    .parse::<f64>()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if !mbps.is_finite() || mbps <= 0.0 {
                    return Err(AppError::config(format!("{} must be a positive number of Mbps, got: {}", key, value)));
                }
            }
            "SERVER_URL" => {
                let parsed = url::Url::parse(value)
                    .map_err(|e| AppError::config(format!("Invalid SERVER_URL '{}': {}", value, e)))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(AppError::config(format!("SERVER_URL must use http or https: {}", value)));
                }
            }
            "ENABLE_COLOR" => {
                value
                    .parse::<bool>()
                    .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e)))?;
            }
            "LOG_LEVEL" => {
                value
                    .parse::<crate::logging::LogLevel>()
                    .map_err(|_| AppError::config(format!("Invalid LOG_LEVEL value '{}'", value)))?;
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("HOST", "Server listen address", "0.0.0.0"),
            ("PORT", "Server listen port (0 picks a free port)", "8080"),
            ("WORKER_THREADS", "Server runtime worker threads (1-512)", "4"),
            ("DOWNLOAD_RATE_BPS", "Throttled download rate in bytes/second", "1280000"),
            ("MAX_FIXED_DOWNLOAD_MB", "Cap for fixed-size downloads", "1024"),
            ("MAX_DOWNLOAD_MBPS", "Optional bandwidth cap for fixed-size downloads", "50"),
            ("MAX_UPLOAD_MBPS", "Optional bandwidth cap for upload consumption", "20"),
            ("SERVER_URL", "Measurement server URL for test runs", "http://127.0.0.1:8080"),
            ("UPLOAD_STREAMS", "Concurrent upload streams (1-16)", "2"),
            ("UPLOADS_PER_STREAM", "Upload chunks sent per stream", "8"),
            ("UPLOAD_CHUNK_KB", "Upload chunk size in KiB", "64"),
            ("UPLOAD_MIN_PARTIAL_KB", "Minimum KiB to report a partial upload speed", "512"),
            ("DOWNLOAD_STREAMS", "Concurrent download streams under load (1-16)", "2"),
            ("PROBE_TIMEOUT_MS", "Latency probe timeout in milliseconds", "2000"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
            ("LOG_LEVEL", "Log level (error, warn, info, debug, trace)", "info"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<22} {}\n", var, description));
            help.push_str(&format!("  {:<22} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        Self::get_supported_env_vars()
            .into_iter()
            .filter_map(|(name, _, _)| {
                let value = std::env::var(name).ok()?;
                Self::validate_env_var(name, &value).err().map(|e| format!("Warning: {}", e))
            })
            .collect()
    }

    /// Check if .env file exists and validate its contents
    pub fn check_env_file(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read .env file: {}", e)))?;

        let mut warnings = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if let Err(e) = Self::validate_env_var(key.trim(), value) {
                    warnings.push(format!("Line '{}': {}", line, e));
                }
            }
        }

        Ok(Some(warnings))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))
}
