use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, info_span, warn, Span};

use super::{json_type_name, probe_failure, rate_limited};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ClientSettings};
use crate::data_source::{
    collect_metadata, collect_series, describe, DataSource, FetchOptions, MetadataMap,
};
use crate::domain::{
    format_date, parse_observation_date, parse_value, text_field, validate_and_convert_dates,
    validate_variable_codes, DateInput, DateRange, Observation, Series, TimeSeriesTable,
    VariableCode, VariableList, VariableMetadata,
};
use crate::error::EtlError;
use crate::http_client::{HttpAuth, HttpClient, HttpResponse, ReqwestHttpClient, Session};
use crate::retry::{run_with_retry, OperationError};
use crate::source::SourceId;
use crate::throttling::{RateLimiter, RatePolicy};

const SOURCE: &str = "Haver";
const API_NAME: &str = "Haver Analytics API";
const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
/// Keys accepted as the observation date of a data entry, in lookup order.
const DATE_KEYS: [&str; 2] = ["date", "period"];

/// Returns the trimmed username when it is long enough.
pub fn validate_username(username: &str) -> Result<String, EtlError> {
    if username.is_empty() {
        return Err(
            EtlError::validation("Haver username must be a non-empty string", "username")
                .with_expected("non-empty string")
                .with_actual("empty"),
        );
    }
    let trimmed = username.trim();
    let length = trimmed.chars().count();
    if length < MIN_USERNAME_LEN {
        return Err(EtlError::validation(
            "Haver username must be at least 3 characters long",
            "username",
        )
        .with_expected("minimum 3 characters")
        .with_actual(format!("length {length}")));
    }
    Ok(trimmed.to_owned())
}

pub fn validate_password(password: &str) -> Result<(), EtlError> {
    if password.is_empty() {
        return Err(
            EtlError::validation("Haver password must be a non-empty string", "password")
                .with_expected("non-empty string")
                .with_actual("empty"),
        );
    }
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(EtlError::validation(
            "Haver password must be at least 6 characters long",
            "password",
        )
        .with_expected("minimum 6 characters")
        .with_actual(format!("length {length}")));
    }
    Ok(())
}

/// Client for the Haver Analytics API (HTTP basic auth).
pub struct HaverClient {
    username: String,
    password: String,
    settings: ClientSettings,
    transport: Option<Arc<dyn HttpClient>>,
    session: Option<Session>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl HaverClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Self, EtlError> {
        let settings = ClientSettings::resolve(SourceId::Haver, config)?;
        Self::from_settings(username, password, settings)
    }

    pub fn from_settings(
        username: impl Into<String>,
        password: impl Into<String>,
        settings: ClientSettings,
    ) -> Result<Self, EtlError> {
        let username = validate_username(&username.into())?;
        let password = password.into();
        validate_password(&password)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = RatePolicy::FixedInterval {
            per_second: settings.rate_limit,
        };
        let span = info_span!("data_source", source = SOURCE);
        span.in_scope(|| {
            info!(
                base_url = %settings.base_url,
                rate_limit = settings.rate_limit,
                database = %settings.default_database,
                "initialized Haver client"
            );
        });

        Ok(Self {
            username,
            password,
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

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter.set_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn credential_hint(&self) -> String {
        format!("{}:***", self.username)
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
        let session = Session::new(self.transport(), self.settings.timeout).with_auth(
            HttpAuth::Basic {
                username: self.username.clone(),
                password: self.password.clone(),
            },
        );
        let url = format!("{}/databases", self.settings.base_url);
        let response = session.get(&url, &[]).map_err(|failure| {
            match probe_failure(API_NAME, &self.settings.base_url, failure.clone()) {
                Some(mapped) => OperationError::from(mapped),
                None => OperationError::from(failure),
            }
        })?;

        if let Some(limited) = rate_limited(API_NAME, &response, self.settings.rate_limit) {
            return Err(limited.into());
        }
        match response.status {
            401 => {
                return Err(EtlError::authentication(
                    "Invalid Haver Analytics credentials",
                    SOURCE,
                    self.credential_hint(),
                )
                .into())
            }
            403 => {
                return Err(EtlError::authentication(
                    "Haver Analytics access denied - check subscription status",
                    SOURCE,
                    self.credential_hint(),
                )
                .into())
            }
            status if !response.is_success() => {
                return Err(EtlError::connection(format!(
                    "HTTP error connecting to Haver Analytics API: status {status}"
                ))
                .with_endpoint(self.settings.base_url.as_str())
                .with_status_code(status)
                .into())
            }
            _ => {}
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
        let database = options
            .database
            .as_deref()
            .map(str::trim)
            .filter(|database| !database.is_empty())
            .unwrap_or(self.settings.default_database.as_str());
        let start = format_date(range.start());
        let end = format_date(range.end());
        let mut query = vec![
            ("start_date", start.as_str()),
            ("end_date", end.as_str()),
            ("format", "json"),
        ];
        if let Some(frequency) = &options.frequency {
            query.push(("frequency", frequency.as_str()));
        }
        if let Some(transformation) = &options.transformation {
            query.push(("transformation", transformation.as_str()));
        }

        let url = format!(
            "{}/data/{}/{}",
            self.settings.base_url,
            urlencoding::encode(database),
            urlencoding::encode(code.as_str())
        );
        let response = self.checked_get(session, &url, &query, code)?;
        let payload = parse_payload(&response, code)?;

        let Some(entries) = payload.get("data") else {
            return Err(invalid_format(code, response.status));
        };
        self.validate_response(&payload)?;
        let entries = entries.as_array().map(Vec::as_slice).unwrap_or_default();

        let observations = entries
            .iter()
            .filter_map(|entry| {
                let raw_date = DATE_KEYS
                    .iter()
                    .find_map(|key| entry.get(*key).and_then(Value::as_str))?;
                let raw_value = entry.get("value").filter(|value| !value.is_null())?;
                let parsed = parse_observation_date(raw_date)
                    .zip(parse_value(Some(raw_value)))
                    .map(|(date, value)| Observation { date, value });
                if parsed.is_none() {
                    warn!(variable = %code, entry = %entry, "skipping invalid entry");
                }
                parsed
            })
            .collect::<Vec<_>>();

        debug!(variable = %code, database, observations = observations.len(), "retrieved series");
        Ok(Series::new(code.clone(), observations))
    }

    fn fetch_metadata(&self, code: &VariableCode) -> Result<Option<VariableMetadata>, EtlError> {
        let session = self.session()?;
        let url = format!(
            "{}/metadata/{}",
            self.settings.base_url,
            urlencoding::encode(code.as_str())
        );
        let response = self.checked_get(session, &url, &[], code)?;
        let payload = parse_payload(&response, code)?;
        self.validate_response(&payload)?;

        let Some(record) = payload.get("metadata").and_then(Value::as_object) else {
            return Ok(None);
        };

        Ok(Some(VariableMetadata {
            code: code.clone(),
            name: text_field(record, "name"),
            description: text_field(record, "description"),
            units: text_field(record, "units"),
            frequency: text_field(record, "frequency"),
            source: String::from(SOURCE),
            category: text_field(record, "category"),
            start_date: text_field(record, "start_date"),
            end_date: text_field(record, "end_date"),
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
            EtlError::data_retrieval(format!("Failed to fetch Haver series {code}: {failure}"))
                .with_variables(&[code])
                .with_source(failure)
        })?;
        if let Some(limited) = rate_limited(API_NAME, &response, self.settings.rate_limit) {
            return Err(limited.with_variables(&[code]));
        }
        if !response.is_success() {
            return Err(EtlError::data_retrieval(format!(
                "Failed to fetch Haver series {code}: HTTP {}",
                response.status
            ))
            .with_variables(&[code])
            .with_response_status(response.status));
        }
        Ok(response)
    }
}

fn parse_payload(response: &HttpResponse, code: &VariableCode) -> Result<Value, EtlError> {
    response
        .json()
        .map_err(|failure| invalid_format(code, response.status).with_source(failure))
}

fn invalid_format(code: &VariableCode, status: u16) -> EtlError {
    EtlError::data_retrieval(format!("Invalid Haver API response format for series {code}"))
        .with_variables(&[code])
        .with_response_status(status)
}

impl DataSource for HaverClient {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    fn api_name(&self) -> String {
        String::from(API_NAME)
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn connect(&mut self) -> Result<bool, EtlError> {
        let span = self.span.clone();
        let _entered = span.enter();
        info!("connecting to Haver Analytics API");

        let policy = self.settings.retry.clone();
        let clock = Arc::clone(&self.clock);
        let arguments = format!(
            "base_url={}, username={}",
            self.settings.base_url, self.username
        );
        run_with_retry(&policy, clock.as_ref(), "HaverClient::connect", &arguments, || {
            self.try_connect()
        })?;

        info!("connected to Haver Analytics API");
        Ok(true)
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            let _entered = self.span.enter();
            info!("disconnected from Haver Analytics API");
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
                "Haver API response must be a JSON object",
                "response_data",
            )
            .with_expected("object")
            .with_actual(json_type_name(payload)));
        };

        if let Some(message) = object.get("error") {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            return Err(EtlError::validation(
                format!("Haver API error: {message}"),
                "api_response",
            )
            .with_actual(message));
        }

        let Some(data) = object.get("data") else {
            return Ok(true);
        };
        let Some(entries) = data.as_array() else {
            return Err(EtlError::validation("Haver data must be a list", "data")
                .with_expected("list")
                .with_actual(json_type_name(data)));
        };
        let Some(first) = entries.first() else {
            return Ok(true);
        };
        let Some(entry) = first.as_object() else {
            return Err(EtlError::validation(
                "Haver data entries must be JSON objects",
                "data_entry",
            )
            .with_expected("object")
            .with_actual(json_type_name(first)));
        };

        let has_date = ["date", "period", "time"]
            .iter()
            .any(|key| entry.contains_key(*key));
        if !has_date || !entry.contains_key("value") {
            return Err(EtlError::validation(
                "Haver data entry missing date/value fields",
                "data_structure",
            )
            .with_expected("date and value fields")
            .with_actual(entry.keys().cloned().collect::<Vec<_>>()));
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

impl Display for HaverClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        describe(self, f)
    }
}

impl Debug for HaverClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaverClient")
            .field("username", &self.username)
            .field("password", &"***")
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
