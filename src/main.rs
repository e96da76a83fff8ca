mod cli;
mod config;
mod forecast;
mod logging;
mod pipeline;
mod reducer;
mod resolver;
mod template;
mod transport;

use std::process::ExitCode;

use clap::Parser;
use cli::{command, Cli, Commands};

/// Every attempted unit failed.
const EXIT_ALL_FAILED: u8 = 1;
/// Bad settings or a failure before any work started.
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_FATAL);
    }
    let config = command::settings_path(cli.config.as_deref());

    match &cli.command {
        Commands::Transfer(args) => match command::transfer(&config, args).await {
            Ok(summary) => {
                println!("{summary}");
                if summary.all_failed() {
                    ExitCode::from(EXIT_ALL_FAILED)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => fatal(e),
        },
        Commands::Copy(clock) => match command::copy(&config, clock).await {
            Ok(copied) => {
                println!("Copied {} files: {}", copied.len(), copied.join(", "));
                ExitCode::SUCCESS
            }
            Err(e) => fatal(e),
        },
        Commands::Check => match command::check(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fatal(e),
        },
    }
}

fn fatal(e: anyhow::Error) -> ExitCode {
    tracing::error!(error = %format!("{e:#}"), "aborted");
    eprintln!("Error: {e:#}");
    ExitCode::from(EXIT_FATAL)
}
