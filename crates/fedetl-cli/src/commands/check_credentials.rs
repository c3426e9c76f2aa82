use fedetl_core::config::setup_instructions;
use fedetl_core::{Credentials, DataSourceFactory, SourceId};
use serde_json::json;
use tracing::warn;

use crate::cli::{CheckCredentialsArgs, Cli};
use crate::error::CliError;

use super::{client_config, print_json};

pub fn run(cli: &Cli, args: &CheckCredentialsArgs) -> Result<(), CliError> {
    let sources = match args.source {
        Some(source) => vec![SourceId::from(source)],
        None => SourceId::ALL.to_vec(),
    };

    let factory = DataSourceFactory::new();
    let mut statuses = Vec::with_capacity(sources.len());
    for source in sources {
        let config = client_config(cli, source)?;
        let status = factory.credential_status(source, &config, &Credentials::default());
        if !status.ready {
            warn!(source = %source, missing = ?status.missing, "credentials incomplete");
            eprintln!("{}", setup_instructions(source));
        }
        statuses.push(status);
    }

    let ready = statuses.iter().all(|status| status.ready);
    print_json(&json!({ "ready": ready, "sources": statuses }), cli.pretty)
}
