//! Configuration validation utilities and rules

use crate::{error::Result, models::Config};
use std::time::Duration;

/// Configuration validator with advisory checks on top of `Config::validate`
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration and collect advisory warnings
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        config.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(Self::validate_server_url(config));
        warnings.extend(Self::validate_plan(config));
        warnings.extend(Self::validate_server(config));

        Ok(warnings)
    }

    fn validate_server_url(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.targets_localhost() {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Server URL '{}' is a loopback address; results may not reflect real network performance",
                    config.server_url
                ),
            ));
        }

        if let Ok(parsed) = config.server_url() {
            if parsed.scheme() == "http" && !config.targets_localhost() {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Info,
                    format!("Server URL '{}' uses plain HTTP; HTTPS is supported but not required", config.server_url),
                ));
            }

            if !parsed.path().is_empty() && parsed.path() != "/" {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Info,
                    format!("Server URL path '{}' is used as the API prefix", parsed.path()),
                ));
            }
        }

        warnings
    }

    fn validate_plan(config: &Config) -> Vec<ValidationWarning> {
        let plan = &config.plan;
        let mut warnings = Vec::new();

        if plan.baseline_probe_count() < 5 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Baseline phase takes only {} samples; latency statistics may be unreliable (recommended: >= 5)",
                    plan.baseline_probe_count()
                ),
            ));
        }

        if plan.loaded_probe_count() < 5 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Loaded phase takes only {} samples; latency statistics may be unreliable (recommended: >= 5)",
                    plan.loaded_probe_count()
                ),
            ));
        }

        if plan.load_settle_delay < Duration::from_secs(1) {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Load settle delay of {}ms may sample latency before buffers fill",
                    plan.load_settle_delay.as_millis()
                ),
            ));
        }

        if plan.planned_upload_bytes() < plan.upload_min_partial_bytes {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Planned upload of {} bytes is below the partial-result threshold of {} bytes; failed uploads will report 0 Mbps",
                    plan.planned_upload_bytes(),
                    plan.upload_min_partial_bytes
                ),
            ));
        }

        if plan.probe_timeout > Duration::from_secs(10) {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Long probe timeout of {}ms will stretch phases with lost probes", plan.probe_timeout.as_millis()),
            ));
        }

        let total = plan.upload_phase_timeout
            + plan.baseline_duration
            + plan.load_settle_delay
            + plan.loaded_duration
            + plan.teardown_timeout;
        if total > Duration::from_secs(120) {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("A test run may take up to {}s", total.as_secs()),
            ));
        }

        warnings
    }

    fn validate_server(config: &Config) -> Vec<ValidationWarning> {
        let server = &config.server;
        let mut warnings = Vec::new();

        if server.download_rate_mbps() < 1 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!("Download rate of {} bytes/s is below 1 Mbps per stream", server.download_rate_bps),
            ));
        }

        if server.download_chunk_size as u64 > server.download_rate_bps {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!(
                    "Download chunk size of {} bytes exceeds one second of data; pacing will be coarse",
                    server.download_chunk_size
                ),
            ));
        }

        warnings
    }
}

/// Validation warning levels
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Info,
    Warning,
    Error,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        use colored::Colorize;

        if !use_color {
            return format!("[{}] {}", self.level.as_str(), self.message);
        }

        let tag = match self.level {
            ValidationLevel::Info => self.level.as_str().blue(),
            ValidationLevel::Warning => self.level.as_str().yellow(),
            ValidationLevel::Error => self.level.as_str().red(),
        };
        format!("[{}] {}", tag, self.message)
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}
