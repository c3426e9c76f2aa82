use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use time::Date;

use crate::domain::dates::format_date;
use crate::domain::VariableCode;

/// Missing-data sentinel used by FRED.
pub const MISSING_SENTINEL: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: Date,
    pub value: f64,
}

/// Date-ordered observations for one variable from one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    code: VariableCode,
    observations: Vec<Observation>,
}

impl Series {
    /// Sorts by date; on duplicate dates the later observation wins.
    pub fn new(code: VariableCode, observations: impl IntoIterator<Item = Observation>) -> Self {
        let by_date = observations
            .into_iter()
            .map(|observation| (observation.date, observation.value))
            .collect::<BTreeMap<_, _>>();
        Self {
            code,
            observations: by_date
                .into_iter()
                .map(|(date, value)| Observation { date, value })
                .collect(),
        }
    }

    pub fn code(&self) -> &VariableCode {
        &self.code
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Numeric value from a payload field. Absent, null, the `.` sentinel and
/// unparsable or non-finite values all yield `None`.
pub fn parse_value(raw: Option<&Value>) -> Option<f64> {
    let value = match raw? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if text.trim() == MISSING_SENTINEL => None,
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// Wide-format result: one row per date, one column per variable.
///
/// Rows are unique and ascending by date. Series are outer-joined, so a
/// variable with no observation on a row's date holds `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeriesTable {
    columns: Vec<VariableCode>,
    rows: BTreeMap<Date, Vec<Option<f64>>>,
}

/// One `(date, variable, value)` row of the long format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRecord {
    pub date: String,
    pub variable: String,
    pub value: f64,
}

impl TimeSeriesTable {
    pub fn from_series(series: impl IntoIterator<Item = Series>) -> Self {
        let series = series.into_iter().collect::<Vec<_>>();
        let width = series.len();
        let mut rows: BTreeMap<Date, Vec<Option<f64>>> = BTreeMap::new();

        for (index, item) in series.iter().enumerate() {
            for observation in item.observations() {
                rows.entry(observation.date)
                    .or_insert_with(|| vec![None; width])[index] = Some(observation.value);
            }
        }

        Self {
            columns: series.into_iter().map(|item| item.code).collect(),
            rows,
        }
    }

    pub fn columns(&self) -> &[VariableCode] {
        &self.columns
    }

    pub fn dates(&self) -> impl Iterator<Item = Date> + '_ {
        self.rows.keys().copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = (Date, &[Option<f64>])> + '_ {
        self.rows.iter().map(|(date, values)| (*date, values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, code: &str) -> bool {
        self.column_index(code).is_some()
    }

    pub fn value(&self, date: Date, code: &str) -> Option<f64> {
        let index = self.column_index(code)?;
        self.rows.get(&date).and_then(|values| values[index])
    }

    /// Non-missing observations of one column, ascending by date.
    pub fn column(&self, code: &str) -> Option<Vec<Observation>> {
        let index = self.column_index(code)?;
        Some(
            self.rows
                .iter()
                .filter_map(|(date, values)| {
                    values[index].map(|value| Observation { date: *date, value })
                })
                .collect(),
        )
    }

    /// Long format, skipping missing cells.
    pub fn to_long(&self) -> Vec<LongRecord> {
        self.rows
            .iter()
            .flat_map(|(date, values)| {
                let date = format_date(*date);
                self.columns
                    .iter()
                    .zip(values)
                    .filter_map(move |(code, value)| {
                        value.map(|value| LongRecord {
                            date: date.clone(),
                            variable: code.to_string(),
                            value,
                        })
                    })
            })
            .collect()
    }

    fn column_index(&self, code: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.as_str().eq_ignore_ascii_case(code.trim()))
    }
}
