//! Table export in CSV or JSON, wide or long layout.

use std::io::Write;

use fedetl_core::domain::format_date;
use fedetl_core::TimeSeriesTable;
use serde_json::{json, Map, Value};

use crate::cli::ExportFormat;
use crate::error::CliError;
use crate::metadata::RunMetadata;

/// Layout of exported rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One row per date, one column per variable.
    Wide,
    /// One row per (date, variable) pair with a value.
    Long,
}

pub fn write_table<W: Write>(
    writer: &mut W,
    table: &TimeSeriesTable,
    format: ExportFormat,
    layout: Layout,
    run: &RunMetadata,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        ExportFormat::Csv => write_csv(writer, table, layout)?,
        ExportFormat::Json => {
            let document = json!({
                "metadata": run,
                "data": json_rows(table, layout),
            });
            if pretty {
                serde_json::to_writer_pretty(&mut *writer, &document)?;
            } else {
                serde_json::to_writer(&mut *writer, &document)?;
            }
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_csv<W: Write>(
    writer: &mut W,
    table: &TimeSeriesTable,
    layout: Layout,
) -> Result<(), CliError> {
    match layout {
        Layout::Wide => {
            let header = std::iter::once("date")
                .chain(table.columns().iter().map(|code| code.as_str()))
                .map(csv_field)
                .collect::<Vec<_>>();
            writeln!(writer, "{}", header.join(","))?;

            for (date, values) in table.rows() {
                let cells = std::iter::once(format_date(date))
                    .chain(values.iter().map(|value| value.map(format_value).unwrap_or_default()))
                    .collect::<Vec<_>>();
                writeln!(writer, "{}", cells.join(","))?;
            }
        }
        Layout::Long => {
            writeln!(writer, "date,variable,value")?;
            for record in table.to_long() {
                writeln!(
                    writer,
                    "{},{},{}",
                    record.date,
                    csv_field(&record.variable),
                    format_value(record.value)
                )?;
            }
        }
    }
    Ok(())
}

fn json_rows(table: &TimeSeriesTable, layout: Layout) -> Value {
    match layout {
        Layout::Wide => table
            .rows()
            .map(|(date, values)| {
                let mut row = Map::new();
                row.insert(String::from("date"), Value::from(format_date(date)));
                for (code, value) in table.columns().iter().zip(values) {
                    row.insert(code.as_str().to_owned(), json!(value));
                }
                Value::Object(row)
            })
            .collect(),
        Layout::Long => json!(table.to_long()),
    }
}

fn format_value(value: f64) -> String {
    value.to_string()
}

/// Quotes a CSV field when it contains a delimiter, quote or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}
