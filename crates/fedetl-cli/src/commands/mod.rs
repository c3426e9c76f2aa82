mod check_credentials;
mod extract;
mod metadata;
mod sources;

use std::io::{self, Write};

use fedetl_core::{
    ClientConfig, Credentials, DataSource, DataSourceFactory, PipelineConfig, SourceId,
};
use serde::Serialize;
use tracing::debug;

use crate::cli::{Cli, Command, ConnectionArgs};
use crate::error::CliError;

pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Extract(args) => extract::run(cli, args),
        Command::Metadata(args) => metadata::run(cli, args),
        Command::Sources => sources::run(cli),
        Command::CheckCredentials(args) => check_credentials::run(cli, args),
    }
}

/// Loads configuration for `source` and layers the command-line overrides on top.
fn client_config(cli: &Cli, source: SourceId) -> Result<ClientConfig, CliError> {
    let pipeline = PipelineConfig::load(cli.config.as_deref())?;
    Ok(pipeline.for_source(source).clone())
}

fn open_source(
    cli: &Cli,
    connection: &ConnectionArgs,
) -> Result<(SourceId, Box<dyn DataSource>), CliError> {
    let source = SourceId::from(connection.source);
    let mut config = client_config(cli, source)?;
    if let Some(timeout) = connection.timeout {
        config.timeout_secs = Some(timeout);
    }
    if let Some(rate_limit) = connection.rate_limit {
        config.rate_limit = Some(rate_limit);
    }

    let credentials = Credentials {
        api_key: connection.api_key.clone(),
        username: connection.username.clone(),
        password: connection.password.clone(),
    };
    debug!(source = %source, credentials = ?credentials, "resolving data source");
    let client = DataSourceFactory::new().create(source, &config, &credentials)?;
    Ok((source, client))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut stdout, value)?;
    } else {
        serde_json::to_writer(&mut stdout, value)?;
    }
    writeln!(stdout)?;
    Ok(())
}
