use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, info_span, Span};

use super::{json_type_name, probe_failure, rate_limited};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ClientSettings};
use crate::data_source::{
    collect_metadata, collect_series, describe, DataSource, FetchOptions, MetadataMap,
};
use crate::domain::{
    format_date, parse_observation_date, parse_value, text_field, validate_and_convert_dates,
    validate_variable_codes, DateInput, DateRange, Observation, Series, TimeSeriesTable,
    VariableCode, VariableList, VariableMetadata, MISSING_SENTINEL,
};
use crate::error::{mask_secret, EtlError};
use crate::http_client::{HttpClient, HttpResponse, ReqwestHttpClient, Session};
use crate::retry::{run_with_retry, OperationError};
use crate::source::SourceId;
use crate::throttling::{OnLimit, RateLimiter, RatePolicy};

const SOURCE: &str = "FRED";
const API_NAME: &str = "FRED API";
const API_KEY_LEN: usize = 32;
/// Always-present series used by the connection probe.
const PROBE_SERIES: &str = "FEDFUNDS";

/// Checks the key shape: 32 characters, alphanumeric apart from hyphens.
pub fn validate_api_key(api_key: &str) -> Result<(), EtlError> {
    if api_key.is_empty() {
        return Err(
            EtlError::validation("FRED API key must be a non-empty string", "api_key")
                .with_expected("non-empty string")
                .with_actual("empty"),
        );
    }

    let length = api_key.chars().count();
    let mut stripped = api_key.chars().filter(|c| *c != '-').peekable();
    let alphanumeric = stripped.peek().is_some() && stripped.all(|c| c.is_ascii_alphanumeric());
    if length != API_KEY_LEN || !alphanumeric {
        return Err(EtlError::validation(
            "FRED API key must be 32 character alphanumeric string",
            "api_key",
        )
        .with_expected("32 character alphanumeric")
        .with_actual(format!("length {length}")));
    }
    Ok(())
}

/// Client for the Federal Reserve Economic Data API.
///
/// Authenticates with an API key sent as a query parameter. Requests are
/// throttled by a minute window that fails, rather than waits, once the
/// configured budget is spent.
pub struct FredClient {
    api_key: String,
    settings: ClientSettings,
    transport: Option<Arc<dyn HttpClient>>,
    session: Option<Session>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl FredClient {
    pub fn new(api_key: impl Into<String>, config: &ClientConfig) -> Result<Self, EtlError> {
        let settings = ClientSettings::resolve(SourceId::Fred, config)?;
        Self::from_settings(api_key, settings)
    }

    pub fn from_settings(
        api_key: impl Into<String>,
        settings: ClientSettings,
    ) -> Result<Self, EtlError> {
        let api_key = api_key.into();
        validate_api_key(&api_key)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = RatePolicy::MinuteWindow {
            limit: settings.rate_limit,
            on_limit: OnLimit::Fail,
        };
        let span = info_span!("data_source", source = SOURCE);
        span.in_scope(|| {
            info!(
                base_url = %settings.base_url,
                rate_limit = settings.rate_limit,
                timeout_secs = settings.timeout.as_secs(),
                "initialized FRED client"
            );
        });

        Ok(Self {
            api_key,
            limiter: RateLimiter::new(SOURCE, policy, Arc::clone(&clock)),
            settings,
            transport: None,
            session: None,
            clock,
            span,
        })
    }

    /// Replaces the HTTP transport; takes effect on the next `connect`.
    pub fn with_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the clock used for retries and throttling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter.set_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn api_key_hint(&self) -> String {
        mask_secret(&self.api_key)
    }

    fn transport(&mut self) -> Arc<dyn HttpClient> {
        Arc::clone(
            self.transport
                .get_or_insert_with(|| Arc::new(ReqwestHttpClient::new())),
        )
    }

    fn session(&self) -> Result<&Session, EtlError> {
        self.session.as_ref().ok_or_else(|| {
            EtlError::connection(format!(
                "Not connected to {API_NAME}. Call connect() first."
            ))
        })
    }

    fn try_connect(&mut self) -> Result<bool, OperationError> {
        let session = Session::new(self.transport(), self.settings.timeout);
        let url = format!("{}/series", self.settings.base_url);
        let response = session
            .get(
                &url,
                &[
                    ("api_key", self.api_key.as_str()),
                    ("series_id", PROBE_SERIES),
                    ("limit", "1"),
                    ("file_type", "json"),
                ],
            )
            .map_err(|failure| {
                match probe_failure(API_NAME, &self.settings.base_url, failure.clone()) {
                    Some(mapped) => OperationError::from(mapped),
                    None => OperationError::from(failure),
                }
            })?;

        if let Some(limited) = rate_limited(API_NAME, &response, self.settings.rate_limit) {
            return Err(limited.into());
        }
        if response.status == 400 {
            if let Some(message) = api_key_complaint(&response) {
                return Err(EtlError::authentication(
                    format!("Invalid FRED API key: {message}"),
                    SOURCE,
                    self.api_key_hint(),
                )
                .into());
            }
        }
        if response.status == 401 {
            return Err(EtlError::authentication(
                "FRED API authentication failed - check API key",
                SOURCE,
                self.api_key_hint(),
            )
            .into());
        }
        if !response.is_success() {
            return Err(EtlError::connection(format!(
                "HTTP error connecting to FRED API: status {}",
                response.status
            ))
            .with_endpoint(self.settings.base_url.as_str())
            .with_status_code(response.status)
            .into());
        }

        self.session = Some(session);
        self.limiter.mark_request();
        Ok(true)
    }

    fn fetch_series(
        &self,
        code: &VariableCode,
        range: &DateRange,
        options: &FetchOptions,
    ) -> Result<Series, EtlError> {
        let session = self.session()?;
        let start = format_date(range.start());
        let end = format_date(range.end());
        let mut query = vec![
            ("api_key", self.api_key.as_str()),
            ("series_id", code.as_str()),
            ("observation_start", start.as_str()),
            ("observation_end", end.as_str()),
            ("file_type", "json"),
            ("sort_order", "asc"),
        ];
        if let Some(frequency) = &options.frequency {
            query.push(("frequency", frequency.as_str()));
        }
        if let Some(method) = &options.aggregation_method {
            query.push(("aggregation_method", method.as_str()));
        }
        if let Some(units) = &options.transformation {
            query.push(("units", units.as_str()));
        }

        let url = format!("{}/series/observations", self.settings.base_url);
        let response = self.checked_get(session, &url, &query, code)?;
        let payload = parse_payload(&response, code)?;
        self.validate_response(&payload)?;

        let Some(entries) = payload.get("observations").and_then(Value::as_array) else {
            return Err(invalid_format(code, response.status));
        };

        let mut skipped = 0_usize;
        let observations = entries
            .iter()
            .filter_map(|entry| {
                let date = entry
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(parse_observation_date);
                let raw = entry.get("value");
                match (date, parse_value(raw)) {
                    (Some(date), Some(value)) => Some(Observation { date, value }),
                    _ => {
                        if raw.and_then(Value::as_str) != Some(MISSING_SENTINEL) {
                            skipped += 1;
                        }
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        if skipped > 0 {
            debug!(variable = %code, skipped, "skipped unparsable observations");
        }
        debug!(variable = %code, observations = observations.len(), "retrieved series");
        Ok(Series::new(code.clone(), observations))
    }

    fn fetch_metadata(&self, code: &VariableCode) -> Result<Option<VariableMetadata>, EtlError> {
        let session = self.session()?;
        let url = format!("{}/series", self.settings.base_url);
        let query = [
            ("api_key", self.api_key.as_str()),
            ("series_id", code.as_str()),
            ("file_type", "json"),
        ];
        let response = self.checked_get(session, &url, &query, code)?;
        let payload = parse_payload(&response, code)?;

        let Some(record) = payload
            .get("seriess")
            .and_then(Value::as_array)
            .and_then(|series| series.first())
            .and_then(Value::as_object)
        else {
            return Ok(None);
        };

        Ok(Some(VariableMetadata {
            code: code.clone(),
            name: text_field(record, "title"),
            description: text_field(record, "notes"),
            units: text_field(record, "units"),
            frequency: text_field(record, "frequency"),
            source: String::from(SOURCE),
            category: text_field(record, "group"),
            start_date: text_field(record, "observation_start"),
            end_date: text_field(record, "observation_end"),
        }))
    }

    fn checked_get(
        &self,
        session: &Session,
        url: &str,
        query: &[(&str, &str)],
        code: &VariableCode,
    ) -> Result<HttpResponse, EtlError> {
        let response = session.get(url, query).map_err(|failure| {
            EtlError::data_retrieval(format!("Failed to fetch FRED series {code}: {failure}"))
                .with_variables(&[code])
                .with_source(failure)
        })?;
        if let Some(limited) = rate_limited(API_NAME, &response, self.settings.rate_limit) {
            return Err(limited.with_variables(&[code]));
        }
        if !response.is_success() {
            return Err(EtlError::data_retrieval(format!(
                "Failed to fetch FRED series {code}: HTTP {}",
                response.status
            ))
            .with_variables(&[code])
            .with_response_status(response.status));
        }
        Ok(response)
    }
}

/// Error text of a 400 response when it is about the API key.
fn api_key_complaint(response: &HttpResponse) -> Option<String> {
    let payload = response.json().ok()?;
    let message = payload.get("error_message")?.as_str()?;
    message
        .to_ascii_lowercase()
        .contains("api_key")
        .then(|| message.to_owned())
}

fn parse_payload(response: &HttpResponse, code: &VariableCode) -> Result<Value, EtlError> {
    response
        .json()
        .map_err(|failure| invalid_format(code, response.status).with_source(failure))
}

fn invalid_format(code: &VariableCode, status: u16) -> EtlError {
    EtlError::data_retrieval(format!("Invalid FRED API response format for series {code}"))
        .with_variables(&[code])
        .with_response_status(status)
}

impl DataSource for FredClient {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn connect(&mut self) -> Result<bool, EtlError> {
        let span = self.span.clone();
        let _entered = span.enter();
        info!("connecting to FRED API");

        let policy = self.settings.retry.clone();
        let clock = Arc::clone(&self.clock);
        let arguments = format!(
            "base_url={}, api_key={}",
            self.settings.base_url,
            self.api_key_hint()
        );
        run_with_retry(&policy, clock.as_ref(), "FredClient::connect", &arguments, || {
            self.try_connect()
        })?;

        info!("connected to FRED API");
        Ok(true)
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            let _entered = self.span.enter();
            info!("disconnected from FRED API");
        }
    }

    fn get_data(
        &mut self,
        variables: VariableList,
        start_date: DateInput,
        end_date: DateInput,
        options: &FetchOptions,
    ) -> Result<TimeSeriesTable, EtlError> {
        let span = self.span.clone();
        let _entered = span.enter();
        self.ensure_connected()?;
        let codes = validate_variable_codes(variables)?;
        let range = validate_and_convert_dates(start_date, end_date)?;

        collect_series(SOURCE, &codes, &range, |code| {
            self.enforce_rate_limit()?;
            self.fetch_series(code, &range, options)
        })
    }

    fn get_metadata(&mut self, variables: VariableList) -> Result<MetadataMap, EtlError> {
        let span = self.span.clone();
        let _entered = span.enter();
        self.ensure_connected()?;
        let codes = validate_variable_codes(variables)?;

        Ok(collect_metadata(SOURCE, &codes, |code| {
            self.enforce_rate_limit()?;
            self.fetch_metadata(code)
        }))
    }

    fn validate_response(&self, payload: &Value) -> Result<bool, EtlError> {
        let Some(object) = payload.as_object() else {
            return Err(EtlError::validation(
                "FRED API response must be a JSON object",
                "response_data",
            )
            .with_expected("object")
            .with_actual(json_type_name(payload)));
        };

        if let Some(message) = object.get("error_message") {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            return Err(EtlError::validation(
                format!("FRED API error: {message}"),
                "api_response",
            )
            .with_actual(message));
        }

        if let Some(observations) = object.get("observations") {
            let Some(entries) = observations.as_array() else {
                return Err(EtlError::validation(
                    "FRED observations must be a list",
                    "observations",
                )
                .with_expected("list")
                .with_actual(json_type_name(observations)));
            };
            if let Some(first) = entries.first() {
                for field in ["date", "value"] {
                    if first.get(field).is_none() {
                        let keys = first
                            .as_object()
                            .map(|entry| entry.keys().cloned().collect::<Vec<_>>())
                            .unwrap_or_default();
                        return Err(EtlError::validation(
                            format!("FRED observation missing required field: {field}"),
                            "observation_structure",
                        )
                        .with_expected(vec!["date", "value"])
                        .with_actual(keys));
                    }
                }
            }
        }

        Ok(true)
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn rate_limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }
}

impl Display for FredClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        describe(self, f)
    }
}

impl Debug for FredClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FredClient")
            .field("api_key", &self.api_key_hint())
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
