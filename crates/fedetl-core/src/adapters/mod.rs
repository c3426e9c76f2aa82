//! Upstream clients implementing [`crate::DataSource`].
//!
//! | Client | Auth | Throttling |
//! |--------|------|------------|
//! | [`FredClient`] | 32-character API key in the query string | minute window, fails when exhausted |
//! | [`HaverClient`] | HTTP basic auth | fixed interval between requests |

mod fred;
mod haver;

pub use fred::{validate_api_key, FredClient};
pub use haver::{validate_password, validate_username, HaverClient};

use std::time::Duration;

use serde_json::Value;

use crate::error::EtlError;
use crate::http_client::{HttpError, HttpErrorKind, HttpResponse};

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Maps an HTTP 429 into a rate-limit failure honoring `Retry-After` seconds.
pub(crate) fn rate_limited(api_name: &str, response: &HttpResponse, limit: u32) -> Option<EtlError> {
    if response.status != 429 {
        return None;
    }
    let retry_after = response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
    Some(
        EtlError::rate_limit(
            format!("{api_name} rate limit exceeded (HTTP 429)"),
            limit,
            retry_after,
        )
        .with_response_status(429),
    )
}

/// Transport failure while probing; connect and timeout failures are retriable.
pub(crate) fn probe_failure(api_name: &str, endpoint: &str, failure: HttpError) -> Option<EtlError> {
    let message = match failure.kind() {
        HttpErrorKind::Connect => format!("Failed to connect to {api_name}: {failure}"),
        HttpErrorKind::Timeout => format!("Connection timeout to {api_name}: {failure}"),
        HttpErrorKind::Other => return None,
    };
    Some(EtlError::connection(message).with_endpoint(endpoint))
}
