//! Error taxonomy shared by every data-source operation.
//!
//! All failures are represented by [`EtlError`], classified by [`ErrorKind`].
//! Each kind attaches its own structured context keys so a caller can diagnose
//! the cause (bad credential, bad date, exhausted retries) without reading logs.
//!
//! | Kind | Context keys |
//! |------|--------------|
//! | [`ErrorKind::Connection`] | `endpoint`, `status_code` |
//! | [`ErrorKind::Authentication`] | `api_key_hint`, `source` |
//! | [`ErrorKind::DataRetrieval`] | `variables`, `date_range`, `response_status` |
//! | [`ErrorKind::Validation`] | `field`, `expected`, `actual` |
//! | [`ErrorKind::Configuration`] | `config_key` |
//! | [`ErrorKind::RateLimit`] | `limit`, `retry_after` (plus data-retrieval keys) |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure classification used for catch-specific handling and retry routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Base failure; also used to wrap unexpected non-domain errors.
    Etl,
    Connection,
    Authentication,
    DataRetrieval,
    Validation,
    Configuration,
    /// Specialization of [`ErrorKind::DataRetrieval`].
    RateLimit,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Etl => "etl",
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::DataRetrieval => "data_retrieval",
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
        }
    }

    /// Rate-limit failures are data-retrieval failures.
    pub const fn is_data_retrieval(self) -> bool {
        matches!(self, Self::DataRetrieval | Self::RateLimit)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Structured failure carrying a message, optional code and diagnostic context.
#[derive(Debug, Clone)]
pub struct EtlError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    context: BTreeMap<String, Value>,
    source: Option<Cause>,
}

impl EtlError {
    /// Base failure with no specialization.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Etl, message)
    }

    fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            context: BTreeMap::new(),
            source: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Connection, message)
    }

    pub fn authentication(
        message: impl Into<String>,
        source: &str,
        api_key_hint: impl Into<String>,
    ) -> Self {
        Self::with_kind(ErrorKind::Authentication, message)
            .with_context("source", source)
            .with_context("api_key_hint", api_key_hint.into())
    }

    pub fn data_retrieval(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::DataRetrieval, message)
    }

    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        Self::with_kind(ErrorKind::Validation, message).with_context("field", field)
    }

    pub fn configuration(message: impl Into<String>, config_key: &str) -> Self {
        Self::with_kind(ErrorKind::Configuration, message).with_context("config_key", config_key)
    }

    /// `retry_after` is rounded up to whole seconds in the context.
    pub fn rate_limit(message: impl Into<String>, limit: u32, retry_after: Duration) -> Self {
        Self::with_kind(ErrorKind::RateLimit, message)
            .with_context("limit", limit)
            .with_context("retry_after", retry_after.as_secs_f64().ceil() as u64)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Keeps an already type-erased cause without re-wrapping it.
    pub fn with_boxed_source(mut self, source: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        self.source = Some(Arc::from(source));
        self
    }

    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.with_context("endpoint", endpoint.into())
    }

    pub fn with_status_code(self, status: u16) -> Self {
        self.with_context("status_code", status)
    }

    pub fn with_variables<S: AsRef<str>>(self, variables: &[S]) -> Self {
        let values = variables
            .iter()
            .map(|variable| Value::from(variable.as_ref()))
            .collect::<Vec<_>>();
        self.with_context("variables", values)
    }

    pub fn with_date_range(self, start: impl Display, end: impl Display) -> Self {
        self.with_context(
            "date_range",
            vec![Value::from(start.to_string()), Value::from(end.to_string())],
        )
    }

    pub fn with_response_status(self, status: u16) -> Self {
        self.with_context("response_status", status)
    }

    pub fn with_expected(self, expected: impl Into<Value>) -> Self {
        self.with_context("expected", expected)
    }

    pub fn with_actual(self, actual: impl Into<Value>) -> Self {
        self.with_context("actual", actual)
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Server- or limiter-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.context
            .get("retry_after")
            .and_then(Value::as_f64)
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Serializable snapshot for structured logging.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind,
            message: self.message.clone(),
            code: self.code.clone(),
            context: self.context.clone(),
        }
    }
}

impl Display for EtlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EtlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Lossless, serializable form of an [`EtlError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    pub context: BTreeMap<String, Value>,
}

/// Masks all but the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().collect::<Vec<_>>();
    if chars.len() <= 8 {
        return String::from("***");
    }
    let head = chars[..4].iter().collect::<String>();
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{head}...{tail}")
}
