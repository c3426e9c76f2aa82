use fedetl_core::{with_connection, VariableList};
use serde_json::json;
use tracing::info;

use crate::cli::{Cli, MetadataArgs};
use crate::error::CliError;

use super::{open_source, print_json};

pub fn run(cli: &Cli, args: &MetadataArgs) -> Result<(), CliError> {
    let (source, mut client) = open_source(cli, &args.connection)?;
    let variables = VariableList::from(args.connection.variables.clone());

    let found = with_connection(client.as_mut(), |connected| connected.get_metadata(variables))?;
    info!(source = %source, found = found.len(), "retrieved metadata");

    let missing = args
        .connection
        .variables
        .iter()
        .map(|raw| raw.trim().to_ascii_uppercase())
        .filter(|code| !found.keys().any(|key| key.as_str() == code.as_str()))
        .collect::<Vec<_>>();

    print_json(
        &json!({
            "source": source,
            "metadata": found,
            "missing": missing,
        }),
        cli.pretty,
    )
}
