use fedetl_core::DataSourceFactory;
use serde_json::json;

use crate::cli::Cli;
use crate::error::CliError;

use super::print_json;

pub fn run(cli: &Cli) -> Result<(), CliError> {
    let sources = DataSourceFactory::available_sources();
    print_json(&json!({ "sources": sources }), cli.pretty)
}
