//! Bufferbloat Tester - Main CLI Application
//!
//! `bbt serve` runs the measurement server; `bbt run` grades the latency
//! increase of a link under load against such a server.

use bufferbloat_tester::{
    app::App,
    cli::Cli,
    config::load_config,
    error::{AppError, ErrorReporter},
};
use clap::Parser;
use std::process;

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        process::exit(99);
    }));

    let cli = Cli::parse();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        process::exit(2);
    }

    if cli.should_show_topic_help() {
        println!("{}", cli.display_help());
        return;
    }

    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose);
    if let Err(e) = run_application(cli) {
        reporter.report_error(&e);
        process::exit(e.exit_code());
    }
}

/// Load configuration, size the runtime and run the selected command
fn run_application(cli: Cli) -> Result<(), AppError> {
    let config = load_config(cli.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.effective_worker_threads())
        .enable_all()
        .build()
        .map_err(|e| AppError::internal(format!("Failed to start async runtime: {}", e)))?;

    runtime.block_on(App::new(cli, config).run())
}
