//! Core formatting traits and implementations
//!
//! This module defines the output formatting interface and provides
//! a plain text implementation with table formatting capabilities.

use crate::{
    error::{AppError, Result},
    models::{LatencyStatistics, TestReport},
    orchestrator::ProgressUpdate,
    server::AccountingSnapshot,
};
use std::fmt::Write as _;

/// Main trait for output formatting
pub trait OutputFormatter {
    /// Format a header section
    fn format_header(&self, title: &str) -> Result<String>;

    /// Format upload and download speeds
    fn format_speed_summary(&self, report: &TestReport) -> Result<String>;

    /// Format baseline and loaded latency as a table
    fn format_latency_table(&self, report: &TestReport) -> Result<String>;

    /// Format grade, ratio and explanation
    fn format_grade(&self, report: &TestReport) -> Result<String>;

    /// Format a server accounting snapshot
    fn format_snapshot(&self, snapshot: &AccountingSnapshot) -> Result<String>;

    /// Format one progress line
    fn format_progress(&self, update: &ProgressUpdate) -> String;

    /// Format error messages
    fn format_error(&self, error: &str) -> Result<String>;

    /// Format warning messages
    fn format_warning(&self, warning: &str) -> Result<String>;

    /// Format success messages
    fn format_success(&self, message: &str) -> Result<String>;

    /// Format a complete report
    fn format_report(&self, report: &TestReport) -> Result<String> {
        let mut output = String::new();
        output.push_str(&self.format_header("Bufferbloat Test Results")?);
        output.push_str("\n\n");
        output.push_str(&self.format_speed_summary(report)?);
        output.push_str("\n\n");
        output.push_str(&self.format_latency_table(report)?);
        output.push_str("\n\n");
        output.push_str(&self.format_grade(report)?);
        Ok(output)
    }
}

/// Configuration options for formatting
#[derive(Debug, Clone)]
pub struct FormattingOptions {
    /// Enable colored output
    pub enable_color: bool,
    /// Show sample lists and per-stream byte counts
    pub verbose_mode: bool,
    /// Show table borders
    pub table_borders: bool,
    /// Maximum output width
    pub max_width: usize,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            enable_color: true,
            verbose_mode: false,
            table_borders: true,
            max_width: 120,
        }
    }
}

/// Table formatting configuration
#[derive(Debug, Clone)]
pub struct TableFormat {
    /// Column definitions
    pub columns: Vec<Column>,
    /// Show borders around table
    pub show_borders: bool,
    /// Show header row
    pub show_header: bool,
    /// Maximum column width for columns without a definition
    pub max_column_width: usize,
}

/// Column definition for table formatting
#[derive(Debug, Clone)]
pub struct Column {
    /// Column header
    pub header: String,
    /// Column alignment
    pub alignment: Alignment,
    /// Minimum width
    pub min_width: usize,
    /// Maximum width
    pub max_width: usize,
}

impl Column {
    pub fn new(header: &str, alignment: Alignment) -> Self {
        Self {
            header: header.to_string(),
            alignment,
            min_width: header.len(),
            max_width: 40,
        }
    }
}

/// Text alignment options
#[derive(Debug, Clone)]
pub enum Alignment {
    Left,
    Right,
    Center,
}

/// Row data for table formatting
pub type RowData = Vec<String>;

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::io(format!("Failed to format output: {}", e))
}

/// Format a latency value in human-readable form
pub fn format_latency(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}μs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Format a byte count in MiB
pub fn format_mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / crate::defaults::BYTES_PER_MIB as f64)
}

/// Cells for one latency table row
pub(crate) fn latency_row(phase: &str, stats: &LatencyStatistics) -> RowData {
    if stats.is_empty() {
        return vec![phase.to_string(), "-".into(), "-".into(), "-".into(), "-".into(), "0".into(), "0".into()];
    }
    vec![
        phase.to_string(),
        format_latency(stats.mean_ms),
        format_latency(stats.min_ms),
        format_latency(stats.max_ms),
        format_latency(stats.std_dev_ms),
        stats.sample_count.to_string(),
        stats.timeout_count.to_string(),
    ]
}

/// Column layout of the latency table
pub(crate) fn latency_table_format(show_borders: bool) -> TableFormat {
    TableFormat {
        columns: vec![
            Column::new("Phase", Alignment::Left),
            Column::new("Mean", Alignment::Right),
            Column::new("Min", Alignment::Right),
            Column::new("Max", Alignment::Right),
            Column::new("Std Dev", Alignment::Right),
            Column::new("Samples", Alignment::Right),
            Column::new("Timeouts", Alignment::Right),
        ],
        show_borders,
        show_header: true,
        max_column_width: 40,
    }
}

/// Plain text formatter implementation
pub struct PlainFormatter {
    options: FormattingOptions,
}

impl PlainFormatter {
    /// Create a new plain formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self { options }
    }

    /// Create a table with the given format and data
    pub(crate) fn create_table(&self, format: &TableFormat, rows: &[RowData]) -> String {
        if rows.is_empty() {
            return String::new();
        }

        let column_widths = self.calculate_column_widths(format, rows);
        let mut output = String::new();

        if format.show_header && !format.columns.is_empty() {
            if format.show_borders {
                output.push_str(&self.create_horizontal_border(&column_widths));
                output.push('\n');
            }

            let headers: Vec<String> = format.columns.iter().map(|c| c.header.clone()).collect();
            output.push_str(&self.create_row(&headers, &column_widths, format));
            output.push('\n');

            if format.show_borders {
                output.push_str(&self.create_horizontal_border(&column_widths));
                output.push('\n');
            }
        }

        for row in rows {
            output.push_str(&self.create_row(row, &column_widths, format));
            output.push('\n');
        }

        if format.show_borders {
            output.push_str(&self.create_horizontal_border(&column_widths));
        }

        output.trim_end().to_string()
    }

    fn calculate_column_widths(&self, format: &TableFormat, rows: &[RowData]) -> Vec<usize> {
        let num_columns = format.columns.len().max(rows.iter().map(|r| r.len()).max().unwrap_or(0));

        (0..num_columns)
            .map(|col_idx| {
                let column = format.columns.get(col_idx);
                let mut width = column.map(|c| c.min_width.max(c.header.len())).unwrap_or(0);

                for row in rows {
                    if let Some(cell) = row.get(col_idx) {
                        width = width.max(cell.chars().count());
                    }
                }

                width.min(column.map(|c| c.max_width).unwrap_or(format.max_column_width))
            })
            .collect()
    }

    fn create_row(&self, data: &[String], widths: &[usize], format: &TableFormat) -> String {
        let mut row = String::new();

        if format.show_borders {
            row.push('|');
        }

        for (idx, (cell, &width)) in data.iter().zip(widths.iter()).enumerate() {
            let alignment = format.columns.get(idx).map(|c| &c.alignment).unwrap_or(&Alignment::Left);

            if format.show_borders {
                row.push(' ');
            }
            row.push_str(&align_text(cell, width, alignment));
            if format.show_borders {
                row.push_str(" |");
            } else {
                row.push_str("  ");
            }
        }

        row.trim_end().to_string()
    }

    fn create_horizontal_border(&self, widths: &[usize]) -> String {
        let mut border = String::from("+");
        for &width in widths {
            border.push_str(&"-".repeat(width + 2));
            border.push('+');
        }
        border
    }
}

/// Align text within specified width
pub(crate) fn align_text(text: &str, width: usize, alignment: &Alignment) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }

    let padding = width - len;
    match alignment {
        Alignment::Left => format!("{}{}", text, " ".repeat(padding)),
        Alignment::Right => format!("{}{}", " ".repeat(padding), text),
        Alignment::Center => {
            let left_pad = padding / 2;
            format!("{}{}{}", " ".repeat(left_pad), text, " ".repeat(padding - left_pad))
        }
    }
}

impl OutputFormatter for PlainFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let border = "=".repeat(title.len() + 4);

        writeln!(output, "{}", border).map_err(fmt_err)?;
        writeln!(output, "  {}  ", title).map_err(fmt_err)?;
        write!(output, "{}", border).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_speed_summary(&self, report: &TestReport) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "Throughput:").map_err(fmt_err)?;
        writeln!(output, "-----------").map_err(fmt_err)?;
        writeln!(
            output,
            "Download:  {:.1} Mbps ({} in {:.1}s)",
            report.download.speed_mbps,
            format_mib(report.download.bytes),
            report.download.elapsed_secs
        )
        .map_err(fmt_err)?;
        write!(
            output,
            "Upload:    {:.1} Mbps ({} in {:.1}s{})",
            report.upload.speed_mbps,
            format_mib(report.upload.bytes),
            report.upload.elapsed_secs,
            if report.upload.completed { "" } else { ", partial" }
        )
        .map_err(fmt_err)?;

        if self.options.verbose_mode {
            for (idx, bytes) in report.download.per_stream_bytes.iter().enumerate() {
                write!(output, "\n  Stream {}: {}", idx + 1, format_mib(*bytes)).map_err(fmt_err)?;
            }
        }

        Ok(output)
    }

    fn format_latency_table(&self, report: &TestReport) -> Result<String> {
        let rows = vec![
            latency_row("Baseline", &report.baseline),
            latency_row("Loaded", &report.loaded),
        ];
        let mut output = self.create_table(&latency_table_format(self.options.table_borders), &rows);

        if self.options.verbose_mode {
            let join = |samples: &[f64]| samples.iter().map(|s| format!("{:.1}", s)).collect::<Vec<_>>().join(", ");
            write!(output, "\nBaseline samples (ms): {}", join(&report.baseline_samples)).map_err(fmt_err)?;
            write!(output, "\nLoaded samples (ms):   {}", join(&report.loaded_samples)).map_err(fmt_err)?;
        }

        Ok(output)
    }

    fn format_grade(&self, report: &TestReport) -> Result<String> {
        let analysis = &report.analysis;
        let mut output = String::new();

        writeln!(output, "Bufferbloat Grade: {} ({})", analysis.grade, analysis.grade.verdict()).map_err(fmt_err)?;
        writeln!(
            output,
            "Latency increase:  {:.1}x ({:+}%)",
            analysis.ratio, analysis.increase_percent
        )
        .map_err(fmt_err)?;
        writeln!(output, "Jitter:            {}", format_latency(analysis.jitter_ms)).map_err(fmt_err)?;
        write!(output, "\n{}", analysis.explanation).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_snapshot(&self, snapshot: &AccountingSnapshot) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "Server Statistics:").map_err(fmt_err)?;
        writeln!(output, "------------------").map_err(fmt_err)?;
        writeln!(
            output,
            "Download:       {:.1} Mbps ({} over {:.1}s)",
            snapshot.download_speed_mbps,
            format_mib(snapshot.download_bytes),
            snapshot.download_elapsed
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Upload:         {:.1} Mbps ({} over {:.1}s)",
            snapshot.upload_speed_mbps,
            format_mib(snapshot.upload_bytes),
            snapshot.upload_elapsed
        )
        .map_err(fmt_err)?;
        write!(output, "Active streams: {}", snapshot.streams_active).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_progress(&self, update: &ProgressUpdate) -> String {
        if update.failed {
            format!("[  0%] {}", update.message)
        } else {
            format!("[{:>3.0}%] {}", update.percent, update.message)
        }
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("ERROR: {}", error))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("WARNING: {}", warning))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("SUCCESS: {}", message))
    }
}
