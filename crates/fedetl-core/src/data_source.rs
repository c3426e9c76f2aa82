//! Data-source contract and scoped connection handling.
//!
//! [`DataSource`] is the client contract both upstream clients implement.
//! Callers obtain a boxed client from the factory, open a [`Connection`]
//! (which connects, and disconnects again when dropped), then fetch data or
//! metadata in the same normalized shapes regardless of the source.
//!
//! # Operations
//!
//! | Operation | Result | Notes |
//! |-----------|--------|-------|
//! | `connect` | `bool` | Authenticated probe, retried on connection and rate-limit failures |
//! | `get_data` | [`TimeSeriesTable`] | Partial success allowed; fails only if every variable fails |
//! | `get_metadata` | map of [`VariableMetadata`] | Failed variables are omitted |
//! | `get_variable_metadata` | [`VariableMetadata`] | Fails if the variable is absent |
//! | `validate_response` | `bool` | Fails with a validation error instead of returning `false` |
//!
//! # Example
//!
//! ```rust,ignore
//! use fedetl_core::{Connection, DataSourceFactory, FetchOptions, SourceId};
//!
//! let mut fred = DataSourceFactory::new().create(SourceId::Fred, &config, &credentials)?;
//! let mut connection = Connection::open(fred.as_mut())?;
//! let table = connection.get_data(
//!     vec!["FEDFUNDS", "DGS10"].into(),
//!     "2023-01-01".into(),
//!     "2023-12-31".into(),
//!     &FetchOptions::default(),
//! )?;
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::{
    format_date, validate_variable_codes, DateInput, DateRange, Series, TimeSeriesTable,
    VariableCode, VariableList, VariableMetadata,
};
use crate::error::EtlError;
use crate::throttling::{RateLimitStatus, RateLimiter};

/// Optional per-request parameters forwarded to the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// e.g. `d`, `w`, `m`, `q`, `a`.
    pub frequency: Option<String>,
    /// FRED only: `avg`, `sum` or `eop`.
    pub aggregation_method: Option<String>,
    /// Sent to FRED as `units`, to Haver as `transformation`.
    pub transformation: Option<String>,
    /// Haver only; overrides the configured default database.
    pub database: Option<String>,
}

impl FetchOptions {
    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = Some(frequency.into());
        self
    }

    pub fn with_aggregation_method(mut self, method: impl Into<String>) -> Self {
        self.aggregation_method = Some(method.into());
        self
    }

    pub fn with_transformation(mut self, transformation: impl Into<String>) -> Self {
        self.transformation = Some(transformation.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

pub type MetadataMap = BTreeMap<VariableCode, VariableMetadata>;

/// Client contract implemented by every upstream source.
pub trait DataSource: Send {
    /// Short source name recorded in metadata, e.g. `"FRED"`.
    fn source_name(&self) -> &'static str;

    /// Human-facing API name used in error messages.
    fn api_name(&self) -> String {
        format!("{} API", self.source_name())
    }

    fn is_connected(&self) -> bool;

    /// Authenticated probe. Succeeds with `true` and marks the client connected.
    fn connect(&mut self) -> Result<bool, EtlError>;

    /// Releases the connection handle. Idempotent and infallible.
    fn disconnect(&mut self);

    fn get_data(
        &mut self,
        variables: VariableList,
        start_date: DateInput,
        end_date: DateInput,
        options: &FetchOptions,
    ) -> Result<TimeSeriesTable, EtlError>;

    fn get_metadata(&mut self, variables: VariableList) -> Result<MetadataMap, EtlError>;

    /// Structural check of a raw payload; mismatches are validation errors.
    fn validate_response(&self, payload: &Value) -> Result<bool, EtlError>;

    fn rate_limiter(&self) -> &RateLimiter;

    fn rate_limiter_mut(&mut self) -> &mut RateLimiter;

    fn ensure_connected(&self) -> Result<(), EtlError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(EtlError::connection(format!(
                "Not connected to {}. Call connect() first.",
                self.api_name()
            )))
        }
    }

    fn enforce_rate_limit(&mut self) -> Result<(), EtlError> {
        self.rate_limiter_mut().acquire()
    }

    fn rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter().status()
    }

    /// Single-variable lookup. Unlike [`DataSource::get_metadata`], an absent
    /// variable is an error here.
    fn get_variable_metadata(&mut self, variable: &str) -> Result<VariableMetadata, EtlError> {
        let codes = validate_variable_codes(variable)?;
        let mut found = self.get_metadata(VariableList::from(codes.clone()))?;
        codes
            .first()
            .and_then(|code| found.remove(code))
            .ok_or_else(|| {
                EtlError::data_retrieval(format!(
                    "No metadata found for variable {}",
                    variable.trim().to_ascii_uppercase()
                ))
                .with_variables(&codes)
            })
    }

    /// Connects then disconnects, reporting success without raising.
    fn test_connection(&mut self) -> bool {
        let result = self.connect();
        self.disconnect();
        match result {
            Ok(connected) => connected,
            Err(failure) => {
                warn!(source = self.source_name(), error = %failure, "connection test failed");
                false
            }
        }
    }

    /// Neither upstream exposes a listing endpoint, so this is empty by default.
    fn get_available_variables(&mut self) -> Result<Vec<VariableMetadata>, EtlError> {
        warn!(
            source = self.source_name(),
            "variable listing is not supported by this source"
        );
        Ok(Vec::new())
    }
}

impl Display for dyn DataSource + '_ {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        describe(self, f)
    }
}

pub(crate) fn describe<S: DataSource + ?Sized>(
    source: &S,
    f: &mut Formatter<'_>,
) -> std::fmt::Result {
    let state = if source.is_connected() {
        "Connected"
    } else {
        "Disconnected"
    };
    write!(f, "{} ({state})", source.source_name())
}

/// Scoped connection: connects on open and always disconnects on drop.
pub struct Connection<'a, S: DataSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: DataSource + ?Sized> Connection<'a, S> {
    pub fn open(source: &'a mut S) -> Result<Self, EtlError> {
        if let Err(failure) = source.connect() {
            source.disconnect();
            return Err(failure);
        }
        Ok(Self { source })
    }
}

impl<S: DataSource + ?Sized> Deref for Connection<'_, S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        self.source
    }
}

impl<S: DataSource + ?Sized> DerefMut for Connection<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.source
    }
}

impl<S: DataSource + ?Sized> Drop for Connection<'_, S> {
    fn drop(&mut self) {
        self.source.disconnect();
    }
}

/// Runs `work` inside a scoped connection.
pub fn with_connection<S, T, F>(source: &mut S, work: F) -> Result<T, EtlError>
where
    S: DataSource + ?Sized,
    F: FnOnce(&mut S) -> Result<T, EtlError>,
{
    let mut connection = Connection::open(source)?;
    work(&mut *connection)
}

/// Fetches each variable independently and merges the successes.
///
/// A variable whose fetch fails, or that returns no observations, is logged
/// and left out. Fails only when no variable produced data.
pub(crate) fn collect_series<F>(
    source: &str,
    codes: &[VariableCode],
    range: &DateRange,
    mut fetch: F,
) -> Result<TimeSeriesTable, EtlError>
where
    F: FnMut(&VariableCode) -> Result<Series, EtlError>,
{
    info!(
        source,
        variables = codes.len(),
        start = %format_date(range.start()),
        end = %format_date(range.end()),
        "retrieving data"
    );

    let mut retrieved = Vec::with_capacity(codes.len());
    let mut failed = Vec::new();

    for code in codes {
        match fetch(code) {
            Ok(series) if series.is_empty() => {
                warn!(source, variable = %code, "no data returned for variable");
                failed.push(code.clone());
            }
            Ok(series) => retrieved.push(series),
            Err(failure) => {
                error!(source, variable = %code, error = %failure, "failed to retrieve data for variable");
                failed.push(code.clone());
            }
        }
    }

    if retrieved.is_empty() {
        return Err(
            EtlError::data_retrieval("No data retrieved for any requested variables")
                .with_variables(codes)
                .with_date_range(format_date(range.start()), format_date(range.end())),
        );
    }

    if !failed.is_empty() {
        let failed = failed.iter().map(VariableCode::as_str).collect::<Vec<_>>();
        warn!(source, count = failed.len(), variables = ?failed, "some variables failed to retrieve");
    }

    let table = TimeSeriesTable::from_series(retrieved);
    info!(
        source,
        observations = table.len(),
        variables = table.columns().len(),
        "retrieved data"
    );
    Ok(table)
}

/// Fetches metadata per variable, silently omitting failures and misses.
pub(crate) fn collect_metadata<F>(source: &str, codes: &[VariableCode], mut fetch: F) -> MetadataMap
where
    F: FnMut(&VariableCode) -> Result<Option<VariableMetadata>, EtlError>,
{
    let mut found = MetadataMap::new();
    for code in codes {
        match fetch(code) {
            Ok(Some(metadata)) => {
                found.insert(code.clone(), metadata);
            }
            Ok(None) => warn!(source, variable = %code, "no metadata found for variable"),
            Err(failure) => {
                error!(source, variable = %code, error = %failure, "failed to retrieve metadata");
            }
        }
    }
    found
}
