//! Main application orchestration and execution

use crate::{
    cli::{Cli, Command},
    client::{HttpMeasurementClient, MeasurementClient},
    config::{display_config_summary, validate_config, EnvManager},
    error::Result,
    logging::LoggerFactory,
    models::Config,
    orchestrator::{NoopProgress, ProgressSink, TestOrchestrator},
    output::{ConsoleProgress, OutputCoordinator, OutputFormatterFactory},
    server::BufferbloatServer,
};

/// Main application struct that dispatches the selected command
pub struct App {
    cli: Cli,
    config: Config,
    loggers: LoggerFactory,
}

impl App {
    /// Create a new application instance from parsed arguments and configuration
    pub fn new(cli: Cli, config: Config) -> Self {
        let loggers = LoggerFactory::new(config.clone());
        Self { cli, config, loggers }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the selected command
    pub async fn run(self) -> Result<()> {
        if self.config.debug {
            eprintln!("{} v{}", crate::PKG_NAME, crate::VERSION);
            eprintln!("Session: {}", self.loggers.session_id());
            eprintln!("\nConfiguration Summary:\n{}\n", display_config_summary(&self.config));
        }

        match self.cli.command.clone() {
            Some(Command::Serve(_)) => self.serve().await,
            Some(Command::Run(args)) => self.run_test(args.quiet).await,
            Some(Command::Stats(_)) => self.show_stats().await,
            Some(Command::Reset(_)) => self.reset_stats().await,
            Some(Command::InitEnv { output }) => {
                EnvManager::save_example_env_file(&output)?;
                let formatter = OutputFormatterFactory::from_config(&self.config);
                println!("{}", formatter.format_success(&format!("Wrote example configuration to {}", output.display()))?);
                Ok(())
            }
            None => {
                println!("{}", self.cli.display_help());
                Ok(())
            }
        }
    }

    async fn serve(&self) -> Result<()> {
        let server = BufferbloatServer::new(self.config.server.clone(), self.loggers.create_stream_logger());
        server.run().await?;

        let logger = self.loggers.create_logger("APP");
        crate::log_info!(logger, "Server on {} shut down", self.config.server.bind_address());
        Ok(())
    }

    async fn run_test(&self, quiet: bool) -> Result<()> {
        let formatter = OutputFormatterFactory::from_config(&self.config);
        for warning in validate_config(&self.config)? {
            eprintln!("{}", warning.format(self.config.enable_color));
        }

        let logger = self.loggers.create_logger("APP");
        crate::log_debug!(
            logger,
            "Testing {} with {} download and {} upload streams",
            self.config.server_url,
            self.config.plan.download_streams,
            self.config.plan.upload_streams
        );

        let orchestrator = TestOrchestrator::from_config(&self.config, self.loggers.create_phase_logger())?;
        let progress: Box<dyn ProgressSink> = if quiet || self.config.json_output {
            Box::new(NoopProgress)
        } else {
            Box::new(ConsoleProgress::new(formatter))
        };

        let report = match orchestrator.run(progress.as_ref()).await {
            Ok(report) => report,
            Err(e) => {
                self.loggers
                    .create_error_logger()
                    .log_error(&e, Some("Bufferbloat test failed"), Some(self.loggers.session_id()))
                    .await;
                return Err(e);
            }
        };
        println!("{}", OutputCoordinator::from_config(&self.config).display_report(&report)?);
        Ok(())
    }

    async fn show_stats(&self) -> Result<()> {
        let client = HttpMeasurementClient::new(&self.config.server_url)?;
        let snapshot = client.fetch_stats().await?;
        println!("{}", OutputCoordinator::from_config(&self.config).display_snapshot(&snapshot)?);
        Ok(())
    }

    async fn reset_stats(&self) -> Result<()> {
        let client = HttpMeasurementClient::new(&self.config.server_url)?;
        client.reset_stats().await?;

        let coordinator = OutputCoordinator::from_config(&self.config);
        if self.config.json_output {
            println!("{}", serde_json::json!({ "status": "reset" }));
        } else {
            println!("{}", coordinator.formatter().format_success("Server statistics reset")?);
        }
        Ok(())
    }
}
