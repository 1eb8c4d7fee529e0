//! Command-line interface module with comprehensive help system

pub mod help;

pub use help::HelpSystem;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Bufferbloat Tester - measure how much latency grows when your link is loaded
#[derive(Parser, Debug, Clone)]
#[command(name = "bbt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Force colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print reports and statistics as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Show help for specific topic (config, phases, grading, output, examples)
    #[arg(long, value_name = "TOPIC")]
    pub help_topic: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the measurement server
    Serve(ServeArgs),
    /// Run a full bufferbloat test against a measurement server
    Run(RunArgs),
    /// Fetch the server's transfer statistics
    Stats(ServerTarget),
    /// Reset the server's transfer statistics
    Reset(ServerTarget),
    /// Write an example .env file
    InitEnv {
        /// Destination path
        #[arg(long, default_value = ".env.example")]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Runtime worker threads
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=512))]
    pub workers: Option<u16>,

    /// Throttled download rate in bytes per second
    #[arg(long, value_parser = parse_positive)]
    pub rate_bps: Option<u64>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: ServerTarget,

    /// Concurrent download streams during the loaded phase
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=16))]
    pub download_streams: Option<u16>,

    /// Concurrent upload streams
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=16))]
    pub upload_streams: Option<u16>,

    /// Latency probe timeout in milliseconds
    #[arg(long, value_parser = parse_positive)]
    pub probe_timeout_ms: Option<u64>,

    /// Hide the progress line
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct ServerTarget {
    /// Measurement server URL
    #[arg(short = 's', long, value_name = "URL")]
    pub server_url: Option<String>,
}

impl Cli {
    /// Validate CLI arguments for conflicts and requirements
    pub fn validate(&self) -> Result<(), String> {
        if self.color && self.no_color {
            return Err("Cannot specify both --color and --no-color".to_string());
        }

        if self.command.is_none() && self.help_topic.is_none() {
            return Err("Must specify a command (serve, run, stats, reset, init-env) or --help-topic".to_string());
        }

        if let Some(url) = self.server_url() {
            let parsed = url::Url::parse(url).map_err(|e| format!("Invalid server URL '{}': {}", url, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("Server URL must use http or https: {}", url));
            }
        }

        if let Some(level) = &self.log_level {
            level
                .parse::<crate::logging::LogLevel>()
                .map_err(|_| format!("Invalid log level '{}'", level))?;
        }

        Ok(())
    }

    /// Server URL given to whichever client command was selected
    pub fn server_url(&self) -> Option<&str> {
        match &self.command {
            Some(Command::Run(args)) => args.target.server_url.as_deref(),
            Some(Command::Stats(target)) | Some(Command::Reset(target)) => target.server_url.as_deref(),
            _ => None,
        }
    }

    /// Check if help should be displayed for a specific topic
    pub fn should_show_topic_help(&self) -> bool {
        self.help_topic.is_some()
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        if self.color {
            true
        } else if self.no_color {
            false
        } else {
            supports_color()
        }
    }

    /// Display help for the specified topic or main help
    pub fn display_help(&self) -> String {
        let help_system = HelpSystem::new();
        let use_colors = self.use_colors();

        match &self.help_topic {
            Some(topic) => help_system.display_topic_help(topic, use_colors).unwrap_or_else(|| {
                format!(
                    "Unknown help topic: '{}'\n\nAvailable topics: {}\n\n{}",
                    topic,
                    HelpSystem::TOPICS.join(", "),
                    help_system.display_main_help(use_colors)
                )
            }),
            None => help_system.display_main_help(use_colors),
        }
    }
}

fn parse_positive(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("Value must be greater than 0".to_string()),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("Invalid number: {}", s)),
    }
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(target_os = "windows")]
    {
        if std::env::var("ANSICON").is_ok() || std::env::var("ConEmuANSI").is_ok() {
            return true;
        }
    }

    cfg!(unix)
}
