//! Topic help with examples and guidance on reading results

use crate::{config::env::EnvManager, types::Grade};
use colored::*;

/// Help system for the CLI application
pub struct HelpSystem {
    platform: String,
}

impl HelpSystem {
    pub const TOPICS: [&'static str; 5] = ["config", "phases", "grading", "output", "examples"];

    pub fn new() -> Self {
        Self {
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// Display the main help message
    pub fn display_main_help(&self, use_colors: bool) -> String {
        let mut help = String::new();
        help.push_str(&self.format_header(use_colors));
        help.push('\n');
        help.push_str(&self.format_examples_section(use_colors));
        help.push('\n');
        help.push_str(&self.format_footer(use_colors));
        help
    }

    /// Display help for a specific topic
    pub fn display_topic_help(&self, topic: &str, use_colors: bool) -> Option<String> {
        match topic.to_lowercase().as_str() {
            "config" | "configuration" | "env" | "environment" => Some(self.format_configuration_help(use_colors)),
            "phases" | "test" => Some(self.format_phases_help(use_colors)),
            "grading" | "grades" => Some(self.format_grading_help(use_colors)),
            "output" | "formatting" => Some(self.format_output_help(use_colors)),
            "examples" => Some(self.format_examples_section(use_colors)),
            _ => None,
        }
    }

    fn format_header(&self, use_colors: bool) -> String {
        let title = "Bufferbloat Tester";
        let subtitle = "Measures how much latency grows when the link is saturated";
        let version = env!("CARGO_PKG_VERSION");

        if use_colors {
            format!(
                "{}\n{}\nVersion: {} | Platform: {}\n",
                title.bright_cyan().bold(),
                subtitle.bright_blue(),
                version.green(),
                self.platform.yellow()
            )
        } else {
            format!("{}\n{}\nVersion: {} | Platform: {}\n", title, subtitle, version, self.platform)
        }
    }

    fn section_header(title: &str, use_colors: bool) -> String {
        if use_colors {
            title.bright_green().bold().to_string()
        } else {
            title.to_string()
        }
    }

    fn format_examples_section(&self, use_colors: bool) -> String {
        let examples = [
            ExampleHelp {
                title: "Start a measurement server",
                command: "bbt serve --port 8080",
                description: "Serve the measurement endpoints on all interfaces",
            },
            ExampleHelp {
                title: "Run a test",
                command: "bbt run --server-url http://speed.example.com:8080",
                description: "Upload, baseline and loaded phases followed by a grade",
            },
            ExampleHelp {
                title: "Heavier load",
                command: "bbt run -s http://speed.example.com:8080 --download-streams 6",
                description: "Saturate faster links with more concurrent download streams",
            },
            ExampleHelp {
                title: "Machine-readable report",
                command: "bbt --json run -s http://speed.example.com:8080 --quiet",
                description: "Print the full report as JSON with no progress line",
            },
            ExampleHelp {
                title: "Inspect server counters",
                command: "bbt stats -s http://speed.example.com:8080",
                description: "Show aggregate download/upload throughput and active streams",
            },
        ];

        let mut output = format!("{}\n", Self::section_header("EXAMPLES:", use_colors));
        for example in examples {
            output.push_str(&example.format(use_colors));
            output.push('\n');
        }
        output
    }

    fn format_footer(&self, use_colors: bool) -> String {
        let mut footer = format!("{}\n", Self::section_header("ADDITIONAL HELP:", use_colors));
        let topics = [
            ("--help-topic config", "Environment variables and configuration priority"),
            ("--help-topic phases", "What each test phase measures"),
            ("--help-topic grading", "How the bufferbloat grade is derived"),
            ("--help-topic output", "Output formats"),
        ];

        for (command, description) in topics {
            if use_colors {
                footer.push_str(&format!("  {}: {}\n", command.bright_yellow(), description));
            } else {
                footer.push_str(&format!("  {}: {}\n", command, description));
            }
        }
        footer
    }

    fn format_configuration_help(&self, use_colors: bool) -> String {
        let mut help = format!("{}\n\n", Self::section_header("CONFIGURATION:", use_colors));
        help.push_str(&EnvManager::display_env_help());
        help.push_str("\nGenerate a commented template with: bbt init-env --output .env\n");
        help
    }

    fn format_phases_help(&self, use_colors: bool) -> String {
        let mut help = format!("{}\n\n", Self::section_header("TEST PHASES:", use_colors));
        help.push_str("1. Upload     Two streams post 64 KiB chunks; upload speed is bytes over elapsed time.\n");
        help.push_str("2. Baseline   Latency probes on an idle link for 3s, one every 250ms.\n");
        help.push_str("3. Loaded     Concurrent throttled downloads run while probes continue for 10s, one\n");
        help.push_str("              every 500ms, after a 3s settle delay.\n");
        help.push_str("4. Teardown   Download streams are cancelled so the server sees them close.\n");
        help.push_str("5. Scoring    Loaded mean latency is divided by baseline mean latency.\n\n");
        help.push_str("Probes that time out count as the timeout plus up to 1s of jitter, so a link\n");
        help.push_str("that drops probes under load is penalized rather than ignored.\n");
        help
    }

    fn format_grading_help(&self, use_colors: bool) -> String {
        let mut help = format!("{}\n\n", Self::section_header("GRADING:", use_colors));
        help.push_str("ratio = loaded mean latency / baseline mean latency\n\n");

        let mut lower = 0.0;
        for (bound, grade) in Grade::THRESHOLDS {
            let line = format!("  {:<3} {:>4.1} - {:<4.1} {}\n", grade.as_str(), lower, bound, grade.verdict());
            help.push_str(&line);
            lower = bound;
        }
        help.push_str(&format!("  {:<3}  > {:<6.1} {}\n", Grade::F.as_str(), lower, Grade::F.verdict()));
        help.push_str(&format!(
            "\nA loaded mean above {}ms is graded F regardless of the ratio.\n",
            crate::defaults::SEVERE_LOADED_LATENCY_MS
        ));
        help
    }

    fn format_output_help(&self, use_colors: bool) -> String {
        let mut help = format!("{}\n\n", Self::section_header("OUTPUT:", use_colors));
        help.push_str("  --color / --no-color   Force or disable ANSI colors (NO_COLOR is honored)\n");
        help.push_str("  --json                 Print the report or statistics as JSON on stdout\n");
        help.push_str("  --verbose              Add per-stream byte counts and raw samples\n");
        help.push_str("  --quiet (run)          Hide the progress line on stderr\n");
        help
    }
}

impl Default for HelpSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper struct for formatting examples
struct ExampleHelp {
    title: &'static str,
    command: &'static str,
    description: &'static str,
}

impl ExampleHelp {
    fn format(&self, use_colors: bool) -> String {
        if use_colors {
            format!(
                "  {}:\n    {}\n    {}\n",
                self.title.bright_yellow().bold(),
                self.command.bright_white(),
                self.description.bright_blue().italic()
            )
        } else {
            format!("  {}:\n    {}\n    {}\n", self.title, self.command, self.description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_help_display() {
        let help_system = HelpSystem::new();
        let plain = help_system.display_main_help(false);

        assert!(plain.contains("Bufferbloat Tester"));
        assert!(plain.contains("EXAMPLES:"));
        assert!(plain.contains("bbt serve"));
        assert!(plain.contains("--help-topic grading"));
    }

    #[test]
    fn test_every_listed_topic_resolves() {
        let help_system = HelpSystem::new();
        for topic in HelpSystem::TOPICS {
            assert!(help_system.display_topic_help(topic, false).is_some(), "topic {}", topic);
        }
        assert!(help_system.display_topic_help("CONFIG", false).is_some());
        assert!(help_system.display_topic_help("weather", false).is_none());
    }

    #[test]
    fn test_grading_help_lists_thresholds() {
        let help = HelpSystem::new().display_topic_help("grading", false).unwrap();
        assert!(help.contains("A+"));
        assert!(help.contains("5.0"));
        assert!(help.contains("Very poor"));
        assert!(help.contains("2000ms"));
    }

    #[test]
    fn test_config_help_includes_env_vars() {
        let help = HelpSystem::new().display_topic_help("env", false).unwrap();
        assert!(help.contains("SERVER_URL"));
        assert!(help.contains("init-env"));
    }
}
