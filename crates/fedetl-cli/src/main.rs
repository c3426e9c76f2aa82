mod cli;
mod commands;
mod error;
mod metadata;
mod output;

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_tracing(&cli) {
        eprintln!("error: {error}");
        return ExitCode::from(error.exit_code());
    }

    match commands::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, exit_code = error.exit_code(), "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Logs go to stderr (or `--log-file`) so exported data on stdout stays clean.
///
/// `--quiet` and `--verbose` win over `RUST_LOG`, which wins over `--log-level`.
fn init_tracing(cli: &Cli) -> Result<(), CliError> {
    let filter = if cli.quiet || cli.verbose {
        EnvFilter::try_new(cli.log_filter())
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(cli.log_filter()))
    }
    .map_err(|error| CliError::Logging(error.to_string()))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|error| CliError::Logging(error.to_string()))
}
