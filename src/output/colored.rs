//! Colored formatter implementation with terminal color support
//!
//! This module provides a rich colored output formatter that uses
//! ANSI colors and Unicode symbols for enhanced visual presentation.

use super::formatter::{
    format_latency, format_mib, latency_row, latency_table_format, FormattingOptions, OutputFormatter, PlainFormatter,
};
use crate::{
    error::{AppError, Result},
    models::TestReport,
    orchestrator::ProgressUpdate,
    server::AccountingSnapshot,
    types::Grade,
};
use colored::*;
use std::fmt::Write as _;

/// Latency classification for color coding
#[derive(Debug, Clone, PartialEq)]
pub enum PerformanceLevel {
    Excellent,  // < 50ms
    Good,       // 50-100ms
    Fair,       // 100-300ms
    Poor,       // 300-1000ms
    VeryPoor,   // > 1000ms
}

impl PerformanceLevel {
    /// Determine performance level from a latency in milliseconds
    pub fn from_latency(time_ms: f64) -> Self {
        if time_ms < 50.0 {
            Self::Excellent
        } else if time_ms < 100.0 {
            Self::Good
        } else if time_ms < 300.0 {
            Self::Fair
        } else if time_ms < 1000.0 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }

    /// Get color for this performance level
    pub fn color(&self) -> Color {
        match self {
            Self::Excellent => Color::Green,
            Self::Good => Color::Cyan,
            Self::Fair => Color::Yellow,
            Self::Poor => Color::Magenta,
            Self::VeryPoor => Color::Red,
        }
    }
}

/// Color for a bufferbloat grade
pub fn grade_color(grade: Grade) -> Color {
    match grade {
        Grade::APlus | Grade::A => Color::Green,
        Grade::B => Color::Cyan,
        Grade::C => Color::Yellow,
        Grade::D => Color::Magenta,
        Grade::F => Color::Red,
    }
}

/// Color scheme configuration
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub muted: Color,
    pub border: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Blue,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Cyan,
            muted: Color::BrightBlack,
            border: Color::BrightBlack,
        }
    }
}

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::io(format!("Failed to format output: {}", e))
}

/// Colored formatter implementation
pub struct ColoredFormatter {
    plain_formatter: PlainFormatter,
    options: FormattingOptions,
    color_scheme: ColorScheme,
}

impl ColoredFormatter {
    /// Create a new colored formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self::with_color_scheme(options, ColorScheme::default())
    }

    /// Create a colored formatter with custom color scheme
    pub fn with_color_scheme(options: FormattingOptions, color_scheme: ColorScheme) -> Self {
        Self {
            plain_formatter: PlainFormatter::new(options.clone()),
            options,
            color_scheme,
        }
    }

    /// Apply color to text if colors are enabled
    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.options.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    /// Apply bold formatting if colors are enabled
    fn bold(&self, text: &str) -> ColoredString {
        if self.options.enable_color {
            text.bold()
        } else {
            text.normal()
        }
    }

    fn latency_colored(&self, ms: f64) -> ColoredString {
        self.colorize(&format_latency(ms), PerformanceLevel::from_latency(ms).color())
    }

    fn create_section_header(&self, title: &str, icon: &str) -> String {
        format!("{} {}", icon, self.bold(title).color(self.color_scheme.header))
    }

    /// Progress bar of `width` cells for `percent`
    fn create_progress_bar(&self, percent: f64, width: usize) -> String {
        let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64) as usize;
        let empty = width - filled;
        format!(
            "[{}{}]",
            self.colorize(&"█".repeat(filled), self.color_scheme.success),
            self.colorize(&"░".repeat(empty), self.color_scheme.muted)
        )
    }
}

impl OutputFormatter for ColoredFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let decorated_title = format!("📶 {}", title);
        let border = "═".repeat(decorated_title.chars().count() + 4);

        writeln!(output, "{}", self.colorize(&border, self.color_scheme.border)).map_err(fmt_err)?;
        writeln!(output, "  {}  ", self.bold(&decorated_title).color(self.color_scheme.header)).map_err(fmt_err)?;
        write!(output, "{}", self.colorize(&border, self.color_scheme.border)).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_speed_summary(&self, report: &TestReport) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "{}", self.create_section_header("Throughput", "📊")).map_err(fmt_err)?;
        writeln!(
            output,
            "⬇️  Download:  {} {}",
            self.bold(&format!("{:.1} Mbps", report.download.speed_mbps)).color(self.color_scheme.info),
            self.colorize(
                &format!("({} in {:.1}s)", format_mib(report.download.bytes), report.download.elapsed_secs),
                self.color_scheme.muted
            )
        )
        .map_err(fmt_err)?;

        let upload_note = if report.upload.completed {
            self.colorize(
                &format!("({} in {:.1}s)", format_mib(report.upload.bytes), report.upload.elapsed_secs),
                self.color_scheme.muted,
            )
        } else {
            self.colorize(
                &format!("(partial: {} in {:.1}s)", format_mib(report.upload.bytes), report.upload.elapsed_secs),
                self.color_scheme.warning,
            )
        };
        write!(
            output,
            "⬆️  Upload:    {} {}",
            self.bold(&format!("{:.1} Mbps", report.upload.speed_mbps)).color(self.color_scheme.info),
            upload_note
        )
        .map_err(fmt_err)?;

        if self.options.verbose_mode {
            for (idx, bytes) in report.download.per_stream_bytes.iter().enumerate() {
                write!(output, "\n   Stream {}: {}", idx + 1, format_mib(*bytes)).map_err(fmt_err)?;
            }
        }

        Ok(output)
    }

    fn format_latency_table(&self, report: &TestReport) -> Result<String> {
        let mut output = String::new();
        writeln!(output, "{}", self.create_section_header("Latency", "⏱️")).map_err(fmt_err)?;

        // Colors are applied after layout so escape codes do not skew column widths
        let rows = vec![
            latency_row("Baseline", &report.baseline),
            latency_row("Loaded", &report.loaded),
        ];
        let table = self
            .plain_formatter
            .create_table(&latency_table_format(self.options.table_borders), &rows);
        let loaded_mean = format_latency(report.loaded.mean_ms);
        for line in table.lines() {
            if line.contains("Loaded") && !report.loaded.is_empty() {
                writeln!(output, "{}", line.replacen(&loaded_mean, &self.latency_colored(report.loaded.mean_ms).to_string(), 1))
                    .map_err(fmt_err)?;
            } else {
                writeln!(output, "{}", self.colorize(line, if line.starts_with('+') { self.color_scheme.border } else { Color::White }))
                    .map_err(fmt_err)?;
            }
        }

        if self.options.verbose_mode {
            let join = |samples: &[f64]| samples.iter().map(|s| format!("{:.1}", s)).collect::<Vec<_>>().join(", ");
            writeln!(output, "{}", self.colorize(&format!("Baseline samples (ms): {}", join(&report.baseline_samples)), self.color_scheme.muted))
                .map_err(fmt_err)?;
            writeln!(output, "{}", self.colorize(&format!("Loaded samples (ms):   {}", join(&report.loaded_samples)), self.color_scheme.muted))
                .map_err(fmt_err)?;
        }

        Ok(output.trim_end().to_string())
    }

    fn format_grade(&self, report: &TestReport) -> Result<String> {
        let analysis = &report.analysis;
        let color = grade_color(analysis.grade);
        let mut output = String::new();

        writeln!(output, "{}", self.create_section_header("Bufferbloat", "🎯")).map_err(fmt_err)?;
        writeln!(
            output,
            "Grade:             {} {}",
            self.bold(analysis.grade.as_str()).color(color),
            self.colorize(&format!("({})", analysis.grade.verdict()), color)
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Latency increase:  {:.1}x ({:+}%)",
            analysis.ratio, analysis.increase_percent
        )
        .map_err(fmt_err)?;
        writeln!(output, "Jitter:            {}", self.latency_colored(analysis.jitter_ms)).map_err(fmt_err)?;

        let explanation_color = if analysis.severe { self.color_scheme.error } else { self.color_scheme.info };
        write!(output, "\n{}", self.colorize(&analysis.explanation, explanation_color)).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_snapshot(&self, snapshot: &AccountingSnapshot) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "{}", self.create_section_header("Server Statistics", "📊")).map_err(fmt_err)?;
        writeln!(
            output,
            "⬇️  Download:       {} ({} over {:.1}s)",
            self.bold(&format!("{:.1} Mbps", snapshot.download_speed_mbps)).color(self.color_scheme.info),
            format_mib(snapshot.download_bytes),
            snapshot.download_elapsed
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "⬆️  Upload:         {} ({} over {:.1}s)",
            self.bold(&format!("{:.1} Mbps", snapshot.upload_speed_mbps)).color(self.color_scheme.info),
            format_mib(snapshot.upload_bytes),
            snapshot.upload_elapsed
        )
        .map_err(fmt_err)?;
        write!(
            output,
            "🔀 Active streams: {}",
            self.colorize(&snapshot.streams_active.to_string(), self.color_scheme.info)
        )
        .map_err(fmt_err)?;

        Ok(output)
    }

    fn format_progress(&self, update: &ProgressUpdate) -> String {
        if update.failed {
            format!("{} {}", self.create_progress_bar(0.0, 20), self.colorize(&update.message, self.color_scheme.error))
        } else {
            format!("{} {:>3.0}% {}", self.create_progress_bar(update.percent, 20), update.percent, update.message)
        }
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("❌ {}", self.colorize(error, self.color_scheme.error)))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("⚠️  {}", self.colorize(warning, self.color_scheme.warning)))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("✅ {}", self.colorize(message, self.color_scheme.success)))
    }
}
