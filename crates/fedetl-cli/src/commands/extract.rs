use std::fs::File;
use std::io::{self, BufWriter};

use fedetl_core::domain::{format_date, parse_date};
use fedetl_core::{with_connection, FetchOptions, VariableList};
use serde_json::json;
use time::{Date, Duration, OffsetDateTime};
use tracing::info;

use crate::cli::{Cli, ExtractArgs};
use crate::error::CliError;
use crate::metadata::RunMetadata;
use crate::output::{write_table, Layout};

use super::{open_source, print_json};

const DEFAULT_LOOKBACK_DAYS: i64 = 365;

pub fn run(cli: &Cli, args: &ExtractArgs) -> Result<(), CliError> {
    let today = OffsetDateTime::now_utc().date();
    let (start, end) = resolve_dates(args.start_date.as_deref(), args.end_date.as_deref(), today);
    let options = FetchOptions {
        frequency: args.frequency.clone(),
        aggregation_method: args.aggregation_method.clone(),
        transformation: args.units.clone(),
        database: args.database.clone(),
    };

    let (source, mut client) = open_source(cli, &args.connection)?;
    let (table, metadata) = with_connection(client.as_mut(), |connected| {
        let variables = VariableList::from(args.connection.variables.clone());
        let table = connected.get_data(
            variables,
            start.as_str().into(),
            end.as_str().into(),
            &options,
        )?;
        let metadata = if args.include_metadata {
            Some(connected.get_metadata(VariableList::from(table.columns().to_vec()))?)
        } else {
            None
        };
        Ok((table, metadata))
    })?;

    let mut run = RunMetadata::new(source, &start, &end, &table);
    if let Some(metadata) = metadata {
        run = run.with_variable_metadata(metadata);
    }
    let layout = if args.long_format {
        Layout::Long
    } else {
        Layout::Wide
    };

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_table(&mut writer, &table, args.format, layout, &run, cli.pretty)?;
            info!(
                run_id = %run.run_id,
                path = %path.display(),
                observations = table.len(),
                "exported data"
            );
            print_json(
                &json!({
                    "run_id": run.run_id,
                    "output": path.display().to_string(),
                    "observations": table.len(),
                    "variables": run.variables,
                }),
                cli.pretty,
            )
        }
        None => {
            let mut stdout = io::stdout().lock();
            write_table(&mut stdout, &table, args.format, layout, &run, cli.pretty)
        }
    }
}

/// End defaults to `today`; start defaults to one year before the end.
///
/// Unparsable input is passed through untouched so the core validator
/// reports it.
fn resolve_dates(start: Option<&str>, end: Option<&str>, today: Date) -> (String, String) {
    let end = end.map_or_else(|| format_date(today), str::to_owned);
    let start = start.map_or_else(
        || {
            let anchor = parse_date(&end).unwrap_or(today);
            let start = anchor
                .checked_sub(Duration::days(DEFAULT_LOOKBACK_DAYS))
                .unwrap_or(anchor);
            format_date(start)
        },
        str::to_owned,
    );
    (start, end)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn defaults_to_the_trailing_year() {
        let (start, end) = resolve_dates(None, None, date!(2024 - 06 - 15));
        assert_eq!(start, "2023-06-16");
        assert_eq!(end, "2024-06-15");
    }

    #[test]
    fn start_default_follows_an_explicit_end() {
        let (start, end) = resolve_dates(None, Some("2023-12-31"), date!(2024 - 06 - 15));
        assert_eq!(start, "2022-12-31");
        assert_eq!(end, "2023-12-31");
    }

    #[test]
    fn explicit_dates_pass_through() {
        let (start, end) = resolve_dates(Some("2023/01/01"), Some("2023-02-01"), date!(2024 - 06 - 15));
        assert_eq!(start, "2023/01/01");
        assert_eq!(end, "2023-02-01");
    }
}
