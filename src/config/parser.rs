//! Configuration parsing from CLI arguments and environment variables

use crate::{
    cli::{Cli, Command},
    config::env::EnvManager,
    error::Result,
    models::Config,
};
use std::time::Duration;

/// Configuration parser that combines CLI arguments with environment variables
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        EnvManager::load_env_file(self.cli.debug)?;
        config.merge_from_env()?;
        self.apply_cli_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) {
        if self.cli.color {
            config.enable_color = true;
        } else if self.cli.no_color {
            config.enable_color = false;
        }

        config.verbose = self.cli.verbose;
        config.debug = self.cli.debug;
        config.json_output = self.cli.json;

        if let Some(level) = &self.cli.log_level {
            config.log_level = Some(level.clone());
        }

        if let Some(url) = self.cli.server_url() {
            config.server_url = url.to_string();
        }

        match &self.cli.command {
            Some(Command::Serve(args)) => {
                if let Some(host) = &args.host {
                    config.server.host = host.clone();
                }
                if let Some(port) = args.port {
                    config.server.port = port;
                }
                if let Some(workers) = args.workers {
                    config.server.worker_threads = Some(workers as usize);
                }
                if let Some(rate) = args.rate_bps {
                    config.server.download_rate_bps = rate;
                }
            }
            Some(Command::Run(args)) => {
                if let Some(streams) = args.download_streams {
                    config.plan.download_streams = streams as usize;
                }
                if let Some(streams) = args.upload_streams {
                    config.plan.upload_streams = streams as usize;
                }
                if let Some(ms) = args.probe_timeout_ms {
                    config.plan.probe_timeout = Duration::from_millis(ms);
                }
            }
            _ => {}
        }

        if config.debug {
            eprintln!("Applied CLI overrides to configuration");
            eprintln!(
                "Final config: server_url={}, bind={}, enable_color={}",
                config.server_url,
                config.server.bind_address(),
                config.enable_color
            );
        }
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let plan = &config.plan;
    let server = &config.server;

    let summary = [
        format!("Server URL: {}", config.server_url),
        format!(
            "Server bind: {} ({} worker threads)",
            server.bind_address(),
            server.effective_worker_threads()
        ),
        format!("Download rate: {} bytes/s (~{} Mbps per stream)", server.download_rate_bps, server.download_rate_mbps()),
        format!(
            "Upload: {} streams x {} chunks x {} KiB",
            plan.upload_streams,
            plan.uploads_per_stream,
            plan.upload_chunk_size / 1024
        ),
        format!(
            "Baseline: {} probes every {}ms",
            plan.baseline_probe_count(),
            plan.baseline_interval.as_millis()
        ),
        format!(
            "Loaded: {} streams, {} probes every {}ms after {}ms settle",
            plan.download_streams,
            plan.loaded_probe_count(),
            plan.loaded_interval.as_millis(),
            plan.load_settle_delay.as_millis()
        ),
        format!("Probe timeout: {}ms", plan.probe_timeout.as_millis()),
        format!("Color Output: {}", config.enable_color),
        format!("JSON Output: {}", config.json_output),
        format!("Verbose: {}", config.verbose),
        format!("Debug: {}", config.debug),
    ];

    summary.join("\n")
}
