use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::{date, format_description};
use time::Date;
use tracing::debug;

use crate::error::EtlError;

/// Calendar format accepted for string dates.
pub const DATE_FORMAT: &str = "YYYY-MM-DD";

pub const MIN_DATE: Date = date!(1900 - 01 - 01);
pub const MAX_DATE: Date = date!(2030 - 12 - 31);

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Either a parsed date or a `YYYY-MM-DD` string still to be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    Date(Date),
    Text(String),
}

impl From<Date> for DateInput {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for DateInput {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl DateInput {
    fn resolve(self) -> Result<Date, EtlError> {
        match self {
            Self::Date(date) => Ok(date),
            Self::Text(text) => parse_date(text.trim()).map_err(|e| {
                EtlError::validation(format!("Invalid date format: {e} ('{text}')"), "date")
                    .with_code("INVALID_DATE_FORMAT")
                    .with_expected(DATE_FORMAT)
                    .with_actual(text.clone())
            }),
        }
    }
}

/// Validated, ordered pair of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    pub const fn start(&self) -> Date {
        self.start
    }

    pub const fn end(&self) -> Date {
        self.end
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", format_date(self.start), format_date(self.end))
    }
}

/// Parses both bounds, then checks ordering and the supported calendar span.
pub fn validate_and_convert_dates(
    start: impl Into<DateInput>,
    end: impl Into<DateInput>,
) -> Result<DateRange, EtlError> {
    let start = start.into().resolve()?;
    let end = end.into().resolve()?;

    if start >= end {
        return Err(
            EtlError::validation("Start date must be before end date", "date_range")
                .with_code("INVALID_DATE_RANGE")
                .with_expected("start_date < end_date")
                .with_actual(format!(
                    "start_date={}, end_date={}",
                    format_date(start),
                    format_date(end)
                )),
        );
    }

    if start < MIN_DATE || end > MAX_DATE {
        return Err(EtlError::validation(
            format!(
                "Dates must be between {} and {}",
                format_date(MIN_DATE),
                format_date(MAX_DATE)
            ),
            "date_range",
        )
        .with_code("DATE_OUT_OF_BOUNDS")
        .with_expected(format!(
            "{} to {}",
            format_date(MIN_DATE),
            format_date(MAX_DATE)
        ))
        .with_actual(format!("{} to {}", format_date(start), format_date(end))));
    }

    debug!(start = %format_date(start), end = %format_date(end), "date validation passed");
    Ok(DateRange { start, end })
}

pub fn parse_date(text: &str) -> Result<Date, time::error::Parse> {
    Date::parse(text, ISO_DATE)
}

pub fn format_date(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

/// Lenient parse for upstream payload dates: a leading `YYYY-MM-DD` (time
/// suffixes ignored) or a bare `YYYY-MM`, which maps to the first of the month.
pub fn parse_observation_date(text: &str) -> Option<Date> {
    let text = text.trim();
    if let Some(prefix) = text.get(..10) {
        if let Ok(date) = parse_date(prefix) {
            return Some(date);
        }
    }
    if text.len() == 7 {
        return parse_date(&format!("{text}-01")).ok();
    }
    None
}
