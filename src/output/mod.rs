//! Output formatting and display system
//!
//! This module provides a flexible output formatting system for test reports
//! and server statistics, supporting colored, plain and JSON output.

mod colored;
mod formatter;

pub use colored::{grade_color, ColorScheme, ColoredFormatter, PerformanceLevel};
pub use formatter::{
    format_latency, format_mib, Alignment, Column, FormattingOptions, OutputFormatter, PlainFormatter, RowData,
    TableFormat,
};

use crate::{
    error::Result,
    models::{Config, TestReport},
    orchestrator::{ProgressSink, ProgressUpdate},
    server::AccountingSnapshot,
};
use std::io::Write;

/// Output formatting factory for creating appropriate formatters
pub struct OutputFormatterFactory;

impl OutputFormatterFactory {
    /// Create a formatter based on color support and preferences
    pub fn create_formatter(enable_color: bool, verbose: bool) -> Box<dyn OutputFormatter + Send + Sync> {
        let options = FormattingOptions {
            enable_color,
            verbose_mode: verbose,
            table_borders: true,
            max_width: 120,
        };

        if enable_color {
            Box::new(ColoredFormatter::new(options))
        } else {
            Box::new(PlainFormatter::new(options))
        }
    }

    /// Create a formatter from configuration
    pub fn from_config(config: &Config) -> Box<dyn OutputFormatter + Send + Sync> {
        Self::create_formatter(config.enable_color, config.verbose)
    }
}

/// Main output coordinator that handles all result display
pub struct OutputCoordinator {
    formatter: Box<dyn OutputFormatter + Send + Sync>,
    json: bool,
}

impl OutputCoordinator {
    pub fn new(formatter: Box<dyn OutputFormatter + Send + Sync>, json: bool) -> Self {
        Self { formatter, json }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(OutputFormatterFactory::from_config(config), config.json_output)
    }

    pub fn formatter(&self) -> &(dyn OutputFormatter + Send + Sync) {
        self.formatter.as_ref()
    }

    /// Render a finished test report
    pub fn display_report(&self, report: &TestReport) -> Result<String> {
        if self.json {
            report.to_json()
        } else {
            self.formatter.format_report(report)
        }
    }

    /// Render a server statistics snapshot
    pub fn display_snapshot(&self, snapshot: &AccountingSnapshot) -> Result<String> {
        if self.json {
            Ok(serde_json::to_string_pretty(snapshot)?)
        } else {
            self.formatter.format_snapshot(snapshot)
        }
    }
}

/// Writes progress lines to stderr so stdout stays clean for reports
pub struct ConsoleProgress {
    formatter: Box<dyn OutputFormatter + Send + Sync>,
}

impl ConsoleProgress {
    pub fn new(formatter: Box<dyn OutputFormatter + Send + Sync>) -> Self {
        Self { formatter }
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        let line = self.formatter.format_progress(update);
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }
}
