//! Structured logging system for the bufferbloat tester
//!
//! This module provides:
//! - Structured logging with multiple levels and contexts
//! - Debug mode JSON output with source locations
//! - Server-side stream lifecycle logging
//! - Client-side phase timing logging
//! - Error event logging with correlation IDs

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::types::TestPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level - most detailed
    Trace = 0,
    /// Debug level - detailed information for debugging
    Debug = 1,
    /// Info level - general application information
    Info = 2,
    /// Warning level - potentially harmful situations
    Warn = 3,
    /// Error level - error events but application can continue
    Error = 4,
    /// Fatal level - severe error events that cause application termination
    Fatal = 5,
}

impl LogLevel {
    /// Get log level name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Get ANSI color code for console output
    pub fn color_code(&self) -> &'static str {
        match self {
            LogLevel::Trace => "\x1b[37m",    // White
            LogLevel::Debug => "\x1b[36m",    // Cyan
            LogLevel::Info => "\x1b[32m",     // Green
            LogLevel::Warn => "\x1b[33m",     // Yellow
            LogLevel::Error => "\x1b[31m",    // Red
            LogLevel::Fatal => "\x1b[35m",    // Magenta
        }
    }

    /// Reset ANSI color code
    pub fn reset_code() -> &'static str {
        "\x1b[0m"
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            _ => Err(AppError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// Log entry structure for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp when log entry was created
    pub timestamp: DateTime<Utc>,
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
    /// Logger name/component
    pub logger: String,
    /// Correlation ID for tracking related events
    pub correlation_id: Option<String>,
    /// Additional structured fields
    pub fields: HashMap<String, serde_json::Value>,
    /// Thread ID if available
    pub thread_id: Option<String>,
    /// File and line information
    pub location: Option<LogLocation>,
}

/// Source code location information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLocation {
    /// Source file name
    pub file: String,
    /// Line number
    pub line: u32,
    /// Module path
    pub module: Option<String>,
}

/// Logger implementation with multiple output formats
#[derive(Debug, Clone)]
pub struct Logger {
    /// Minimum log level to output
    min_level: LogLevel,
    /// Whether to use colored output
    use_color: bool,
    /// Whether to include location information
    include_location: bool,
    /// Output format
    format: LogFormat,
    /// Logger name
    name: String,
    /// Shared context storage
    context: Arc<RwLock<LogContext>>,
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// JSON format for structured logging
    Json,
}

/// Shared logging context for correlation and session tracking
#[derive(Debug, Default)]
struct LogContext {
    /// Global correlation ID for the session
    session_id: Option<String>,
    /// Current operation correlation ID
    current_correlation_id: Option<String>,
}

impl Logger {
    /// Create a new logger
    pub fn new(name: String) -> Self {
        Self {
            min_level: LogLevel::Info,
            use_color: true,
            include_location: false,
            format: LogFormat::Console,
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    /// Create a logger with specific configuration
    pub fn with_config(name: String, config: &Config) -> Self {
        let derived = if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };

        let min_level = config.log_level.as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(derived);

        Self {
            min_level,
            use_color: config.enable_color,
            include_location: config.debug,
            format: if config.debug { LogFormat::Json } else { LogFormat::Console },
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    /// Create a configured logger already tagged with a session id
    pub fn with_session(name: String, config: &Config, session_id: &str) -> Self {
        let logger = Self::with_config(name, config);
        let context = LogContext {
            session_id: Some(session_id.to_string()),
            ..LogContext::default()
        };
        Self {
            context: Arc::new(RwLock::new(context)),
            ..logger
        }
    }

    /// Logger that discards everything below Fatal
    pub fn quiet(name: &str) -> Self {
        let mut logger = Self::new(name.to_string());
        logger.set_level(LogLevel::Fatal);
        logger
    }

    /// Set minimum log level
    pub fn set_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a correlated operation
    pub async fn start_operation(&self, operation_name: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        {
            let mut context = self.context.write().await;
            context.current_correlation_id = Some(correlation_id.clone());
        }

        self.info(&format!("Started operation: {}", operation_name))
            .correlation_id(&correlation_id)
            .field("operation", operation_name)
            .field("operation_type", "start")
            .log()
            .await;

        correlation_id
    }

    /// End a correlated operation
    pub async fn end_operation(&self, correlation_id: &str, operation_name: &str, success: bool) {
        self.info(&format!("Completed operation: {} (success: {})", operation_name, success))
            .correlation_id(correlation_id)
            .field("operation", operation_name)
            .field("operation_type", "end")
            .field("success", success)
            .log()
            .await;

        // Clear current correlation ID if it matches
        let mut context = self.context.write().await;
        if context.current_correlation_id.as_deref() == Some(correlation_id) {
            context.current_correlation_id = None;
        }
    }

    /// Create a log entry builder
    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message.to_string())
    }

    /// Convenience methods for different log levels
    pub fn trace(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Trace, message)
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    /// Check if a log level would be output
    pub fn would_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Write log entry to output
    async fn write_entry(&self, mut entry: LogEntry) {
        if !self.would_log(entry.level) {
            return;
        }

        {
            let context = self.context.read().await;
            Self::apply_context(&context, &mut entry);
        }

        self.output(&entry);
    }

    /// Write log entry without awaiting; context is skipped if it is being written to
    fn write_entry_sync(&self, mut entry: LogEntry) {
        if !self.would_log(entry.level) {
            return;
        }

        if let Ok(context) = self.context.try_read() {
            Self::apply_context(&context, &mut entry);
        }

        self.output(&entry);
    }

    fn apply_context(context: &LogContext, entry: &mut LogEntry) {
        if let Some(session_id) = &context.session_id {
            entry.fields.insert("session_id".to_string(), serde_json::Value::String(session_id.clone()));
        }

        if entry.correlation_id.is_none() {
            entry.correlation_id = context.current_correlation_id.clone();
        }
    }

    fn output(&self, entry: &LogEntry) {
        let output = match self.format {
            LogFormat::Console => self.format_console(entry),
            LogFormat::Json => self.format_json(entry),
        };

        // stdout carries reports and JSON; every log level goes to stderr
        let _ = writeln!(io::stderr().lock(), "{}", output);
    }

    /// Format log entry for console output
    fn format_console(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level_str = entry.level.as_str();

        let formatted_level = if self.use_color {
            format!("{}{:>5}{}", entry.level.color_code(), level_str, LogLevel::reset_code())
        } else {
            format!("{:>5}", level_str)
        };

        let mut output = format!("{} {} [{}] {}",
            timestamp,
            formatted_level,
            entry.logger,
            entry.message
        );

        // Show the first 8 chars of the correlation id
        if let Some(correlation_id) = &entry.correlation_id {
            let short: String = correlation_id.chars().take(8).collect();
            output.push_str(&format!(" [{}]", short));
        }

        if !entry.fields.is_empty() {
            let mut fields_str: Vec<String> = entry.fields.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            fields_str.sort();
            output.push_str(&format!(" {{{}}}", fields_str.join(", ")));
        }

        if self.include_location {
            if let Some(location) = &entry.location {
                output.push_str(&format!(" @ {}:{}", location.file, location.line));
            }
        }

        output
    }

    /// Format log entry as JSON
    fn format_json(&self, entry: &LogEntry) -> String {
        match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(_) => format!("{{\"error\": \"Failed to serialize log entry\", \"message\": \"{}\"}}", entry.message),
        }
    }
}

/// Builder pattern for creating log entries
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: String) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                logger: logger.name.clone(),
                correlation_id: None,
                fields: HashMap::new(),
                thread_id: std::thread::current().name().map(String::from),
                location: None,
            },
        }
    }

    /// Add a correlation ID
    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    /// Add a structured field
    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), json_value);
        }
        self
    }

    /// Add location information
    pub fn location(mut self, file: &str, line: u32, module: Option<&str>) -> Self {
        self.entry.location = Some(LogLocation {
            file: file.to_string(),
            line,
            module: module.map(String::from),
        });
        self
    }

    /// Add error information
    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_recoverable", error.is_recoverable())
            .field("error_exit_code", error.exit_code())
    }

    /// Finalize and write the log entry
    pub async fn log(self) {
        self.logger.write_entry(self.entry).await;
    }

    /// Finalize and write the log entry from synchronous code (drop handlers, stream closures)
    pub fn emit(self) {
        self.logger.write_entry_sync(self.entry);
    }
}

/// Server-side logger for download/upload stream lifecycle events
#[derive(Debug, Clone)]
pub struct StreamLogger {
    logger: Logger,
}

impl StreamLogger {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Create a stream logger from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(Logger::with_config("STREAM".to_string(), config))
    }

    /// Stream logger that stays silent
    pub fn quiet() -> Self {
        Self::new(Logger::quiet("STREAM"))
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn download_started(&self, active_streams: u64, target_mbps: u64) {
        self.logger.info(&format!("Throttled download stream started (target {} Mbps, {} active)", target_mbps, active_streams))
            .field("event", "download_start")
            .field("active_streams", active_streams)
            .field("target_mbps", target_mbps)
            .emit();
    }

    pub fn download_progress(&self, bytes_sent: u64, elapsed: Duration, mbps: f64) {
        let mib = bytes_sent as f64 / crate::defaults::BYTES_PER_MIB as f64;
        self.logger.info(&format!("Download stream: {:.1} MiB in {:.1}s ({:.2} Mbps)", mib, elapsed.as_secs_f64(), mbps))
            .field("event", "download_progress")
            .field("bytes_sent", bytes_sent)
            .field("mbps", mbps)
            .emit();
    }

    pub fn download_stopped(&self, bytes_sent: u64, elapsed: Duration, mbps: f64, remaining_active: u64) {
        let mib = bytes_sent as f64 / crate::defaults::BYTES_PER_MIB as f64;
        self.logger.info(&format!(
            "Download stream stopped: {:.1} MiB in {:.1}s ({:.2} Mbps), {} still active",
            mib, elapsed.as_secs_f64(), mbps, remaining_active
        ))
            .field("event", "download_stop")
            .field("bytes_sent", bytes_sent)
            .field("mbps", mbps)
            .field("active_streams", remaining_active)
            .emit();
    }

    pub fn upload_received(&self, bytes: u64, elapsed: Duration, mbps: f64, stream_id: Option<&str>) {
        let mut builder = self.logger.info(&format!(
            "Upload received: {:.1} KiB in {:.3}s ({:.2} Mbps)",
            bytes as f64 / 1024.0, elapsed.as_secs_f64(), mbps
        ))
            .field("event", "upload")
            .field("bytes", bytes)
            .field("mbps", mbps);

        if let Some(id) = stream_id {
            builder = builder.field("stream_id", id);
        }

        builder.emit();
    }

    pub fn upload_interrupted(&self, bytes: u64, error: &str) {
        self.logger.warn(&format!("Upload body ended early after {} bytes: {}", bytes, error))
            .field("event", "upload_interrupted")
            .field("bytes", bytes)
            .emit();
    }

    pub fn stats_reset(&self, previous_download_bytes: u64) {
        self.logger.info(&format!("Statistics reset (previous download total: {} bytes)", previous_download_bytes))
            .field("event", "reset")
            .field("previous_download_bytes", previous_download_bytes)
            .emit();
    }

    pub fn stats_served(&self, download_mbps: f64, upload_mbps: f64, active_streams: u64) {
        self.logger.debug(&format!(
            "Stats: download {:.2} Mbps, upload {:.2} Mbps, {} active streams",
            download_mbps, upload_mbps, active_streams
        ))
            .field("event", "stats")
            .emit();
    }
}

/// Client-side logger for test phase timing
#[derive(Debug, Clone)]
pub struct PhaseLogger {
    logger: Logger,
}

impl PhaseLogger {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Create a phase logger from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(Logger::with_config("PHASE".to_string(), config))
    }

    /// Phase logger that stays silent
    pub fn quiet() -> Self {
        Self::new(Logger::quiet("PHASE"))
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn phase_started(&self, phase: TestPhase) {
        self.logger.info(&format!("Starting {} phase", phase))
            .field("phase", phase)
            .field("operation_type", "start")
            .log()
            .await;
    }

    pub async fn phase_completed(&self, phase: TestPhase, duration: Duration, summary: &str) {
        self.logger.info(&format!("Completed {} phase in {:.2}s: {}", phase, duration.as_secs_f64(), summary))
            .field("phase", phase)
            .field("operation_type", "end")
            .field("duration_ms", duration.as_secs_f64() * 1000.0)
            .log()
            .await;
    }

    pub async fn probe_failed(&self, phase: TestPhase, error: &AppError) {
        self.logger.debug(&format!("Latency probe dropped during {} phase: {}", phase, error))
            .field("phase", phase)
            .error_info(error)
            .log()
            .await;
    }

    pub async fn probe_timed_out(&self, phase: TestPhase, substituted_ms: f64) {
        self.logger.warn(&format!(
            "Latency probe timed out during {} phase, recording {:.0}ms (severe bufferbloat)",
            phase, substituted_ms
        ))
            .field("phase", phase)
            .field("substituted_ms", substituted_ms)
            .log()
            .await;
    }

    /// Periodic progress line while download streams are running
    pub fn download_progress(&self, bytes: u64, elapsed: Duration, mbps: f64) {
        self.logger.info(&format!(
            "Download: {:.2} MiB in {:.1}s ({:.2} Mbps)",
            bytes as f64 / crate::defaults::BYTES_PER_MIB as f64, elapsed.as_secs_f64(), mbps
        ))
            .field("bytes", bytes)
            .field("mbps", mbps)
            .emit();
    }

    pub fn stream_error(&self, stream_index: usize, kind: &str, error: &AppError) {
        self.logger.warn(&format!("{} stream {} ended with error: {}", kind, stream_index, error))
            .field("stream", stream_index)
            .error_info(error)
            .emit();
    }
}

/// Error event logger with enhanced context
#[derive(Debug, Clone)]
pub struct ErrorEventLogger {
    logger: Logger,
}

impl ErrorEventLogger {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Create an error event logger from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(Logger::with_config("ERR".to_string(), config))
    }

    /// Log an application error with full context
    pub async fn log_error(&self, error: &AppError, context: Option<&str>, correlation_id: Option<&str>) {
        let message = if let Some(ctx) = context {
            format!("{}: {}", ctx, error)
        } else {
            error.to_string()
        };

        let mut builder = self.logger.error(&message)
            .error_info(error);

        if let Some(id) = correlation_id {
            builder = builder.correlation_id(id);
        }

        if let Some(ctx) = context {
            builder = builder.field("context", ctx);
        }

        builder.log().await;
    }
}

/// Global logger factory and management
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    /// Create a new logger factory
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a logger with a specific name
    pub fn create_logger(&self, name: &str) -> Logger {
        Logger::with_session(name.to_string(), &self.config, &self.session_id)
    }

    /// Create a stream logger for the measurement server
    pub fn create_stream_logger(&self) -> StreamLogger {
        StreamLogger::new(self.create_logger("STREAM"))
    }

    /// Create a phase logger for the orchestrator
    pub fn create_phase_logger(&self) -> PhaseLogger {
        PhaseLogger::new(self.create_logger("PHASE"))
    }

    /// Create an error event logger
    pub fn create_error_logger(&self) -> ErrorEventLogger {
        ErrorEventLogger::new(self.create_logger("ERR"))
    }

    /// Get session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Convenience macros for logging with location information
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(&format!($($arg)*))
            .location(file!(), line!(), Some(module_path!()))
            .log()
            .await
    };
}
