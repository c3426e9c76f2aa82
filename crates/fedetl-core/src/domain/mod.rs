//! # Domain Types
//!
//! Validated inputs and normalized outputs shared by every data source.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`VariableCode`] | Trimmed, uppercase series identifier |
//! | [`VariableList`] | One or many raw codes as passed by a caller |
//! | [`DateInput`] / [`DateRange`] | Raw and validated date bounds |
//! | [`Observation`] / [`Series`] | One variable's dated values |
//! | [`TimeSeriesTable`] | Date-indexed, outer-joined wide table |
//! | [`VariableMetadata`] | Common metadata record |
//!
//! Validation failures are reported as [`crate::EtlError`] values of kind
//! `Validation`, each carrying a machine-readable code.

mod dates;
mod metadata;
mod series;
mod variable;

pub use dates::{
    format_date, parse_date, parse_observation_date, validate_and_convert_dates, DateInput,
    DateRange, DATE_FORMAT, MAX_DATE, MIN_DATE,
};
pub use metadata::VariableMetadata;
pub(crate) use metadata::text_field;
pub use series::{parse_value, LongRecord, Observation, Series, TimeSeriesTable, MISSING_SENTINEL};
pub use variable::{
    validate_variable_codes, InvalidCode, VariableCode, VariableList, MAX_VARIABLE_LEN,
};
