//! Bounded retry with exponential backoff, routed by error kind.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::{ErrorKind, EtlError};
use crate::http_client::HttpError;

const MAX_ARGUMENT_CHARS: usize = 200;

/// Backoff strategy for retrying failed operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Adds up to 25% on top of the computed delay. Never shortens it.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(300),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let mut delay = Duration::from_secs_f64(seconds.max(0.0));

                if jitter {
                    let extra_ms = (delay.as_millis() as f64 * 0.25) as u64;
                    delay += Duration::from_millis(fastrand::u64(0..=extra_ms));
                }

                delay
            }
        }
    }
}

/// Retry policy applied around a fallible operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retriable: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            retriable: vec![ErrorKind::Connection, ErrorKind::RateLimit],
        }
    }
}

impl RetryConfig {
    /// `delay * factor^attempt` between attempts, no jitter.
    pub fn exponential(max_retries: u32, delay: Duration, factor: f64) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential {
                base: delay,
                factor,
                max: Duration::from_secs(300),
                jitter: false,
            },
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_retriable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retriable = kinds.into_iter().collect();
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = enabled;
        }
        self
    }

    pub fn is_retriable(&self, kind: ErrorKind) -> bool {
        self.retriable.contains(&kind)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Failure raised inside a retried operation.
///
/// Domain failures route through the retry policy. Anything else is treated as
/// unexpected and wrapped into a base [`EtlError`] when it leaves the wrapper.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Domain(#[from] EtlError),
    #[error("{kind}: {source}")]
    Unexpected {
        kind: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl OperationError {
    pub fn unexpected<E>(kind: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unexpected {
            kind,
            source: Box::new(source),
        }
    }
}

impl From<HttpError> for OperationError {
    fn from(value: HttpError) -> Self {
        Self::unexpected("HttpError", value)
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(value: serde_json::Error) -> Self {
        Self::unexpected("JsonError", value)
    }
}

/// Runs `operation` under `policy`, sleeping through `clock` between attempts.
///
/// `arguments` is a short description of the call inputs; it is truncated and
/// attached to wrapped unexpected failures.
pub fn run_with_retry<T, F>(
    policy: &RetryConfig,
    clock: &dyn Clock,
    operation: &str,
    arguments: &str,
    mut call: F,
) -> Result<T, EtlError>
where
    F: FnMut() -> Result<T, OperationError>,
{
    let mut attempt = 0_u32;
    loop {
        match call() {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, retries = attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(OperationError::Domain(failure)) => {
                if !policy.is_retriable(failure.kind()) {
                    debug!(operation, kind = %failure.kind(), "non-retriable failure");
                    return Err(failure);
                }
                if attempt >= policy.max_retries {
                    error!(
                        operation,
                        attempts = attempt + 1,
                        error = %failure,
                        "all retry attempts exhausted"
                    );
                    return Err(failure);
                }

                let mut delay = policy.delay_for_attempt(attempt);
                if failure.kind() == ErrorKind::RateLimit {
                    if let Some(hint) = failure.retry_after() {
                        delay = delay.max(hint);
                    }
                }

                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_secs = delay.as_secs_f64(),
                    error = %failure,
                    "retriable failure, backing off"
                );
                clock.sleep(delay);
                attempt += 1;
            }
            Err(OperationError::Unexpected { kind, source }) => {
                error!(operation, kind, error = %source, "unexpected failure");
                return Err(EtlError::new(format!("Unexpected error in {operation}: {source}"))
                    .with_code("UNEXPECTED_ERROR")
                    .with_context("original_exception", kind)
                    .with_context("function_name", operation)
                    .with_context("args", truncate(arguments, MAX_ARGUMENT_CHARS))
                    .with_boxed_source(source));
            }
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn exponential_backoff_grows_by_factor() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
    }

    #[test]
    fn jitter_never_shortens_the_delay() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        };

        for attempt in 0..5 {
            let expected = 100 * 2_u128.pow(attempt);
            let delay = backoff.delay(attempt).as_millis();
            assert!(delay >= expected, "attempt={attempt}, delay={delay}");
            assert!(delay <= expected + expected / 4 + 1, "attempt={attempt}, delay={delay}");
        }
    }

    #[test]
    fn default_policy_retries_connection_and_rate_limit_only() {
        let config = RetryConfig::default();

        assert_eq!(config.max_retries, 3);
        assert!(config.is_retriable(ErrorKind::Connection));
        assert!(config.is_retriable(ErrorKind::RateLimit));
        assert!(!config.is_retriable(ErrorKind::Validation));
        assert!(!config.is_retriable(ErrorKind::Authentication));
        assert!(!config.is_retriable(ErrorKind::Configuration));
    }

    #[test]
    fn succeeds_after_two_retriable_failures() {
        let clock = ManualClock::new();
        let policy = RetryConfig::exponential(3, Duration::from_secs(1), 2.0);
        let calls = Cell::new(0);

        let value = run_with_retry(&policy, &clock, "connect", "", || {
            calls.set(calls.get() + 1);
            if calls.get() <= 2 {
                Err(EtlError::connection("refused").into())
            } else {
                Ok(42)
            }
        })
        .expect("third attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert!(clock.total_slept() >= Duration::from_secs(3));
    }

    #[test]
    fn rate_limit_hint_extends_the_delay() {
        let clock = ManualClock::new();
        let policy = RetryConfig::exponential(1, Duration::from_secs(1), 2.0);
        let calls = Cell::new(0);

        let result = run_with_retry(&policy, &clock, "fetch", "", || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(EtlError::rate_limit("slow down", 120, Duration::from_secs(7)).into())
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(7)]);
    }

    #[test]
    fn exhausted_retries_return_the_last_failure() {
        let clock = ManualClock::new();
        let policy = RetryConfig::exponential(2, Duration::from_millis(10), 2.0);
        let calls = Cell::new(0);

        let error = run_with_retry::<(), _>(&policy, &clock, "connect", "", || {
            calls.set(calls.get() + 1);
            Err(EtlError::connection(format!("attempt {}", calls.get())).into())
        })
        .expect_err("always fails");

        assert_eq!(calls.get(), 3);
        assert_eq!(error.kind(), ErrorKind::Connection);
        assert_eq!(error.message(), "attempt 3");
    }

    #[test]
    fn non_retriable_failure_propagates_immediately() {
        let clock = ManualClock::new();
        let calls = Cell::new(0);

        let error = run_with_retry::<(), _>(&RetryConfig::default(), &clock, "connect", "", || {
            calls.set(calls.get() + 1);
            Err(EtlError::authentication("bad key", "FRED", "abcd...wxyz").into())
        })
        .expect_err("auth is not retried");

        assert_eq!(calls.get(), 1);
        assert_eq!(error.kind(), ErrorKind::Authentication);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn unexpected_failure_is_wrapped_with_diagnostics() {
        let clock = ManualClock::new();
        let long_arguments = "x".repeat(500);

        let error = run_with_retry::<(), _>(
            &RetryConfig::default(),
            &clock,
            "connect",
            &long_arguments,
            || Err(OperationError::from(HttpError::other("tls handshake exploded"))),
        )
        .expect_err("wrapped");

        assert_eq!(error.kind(), ErrorKind::Etl);
        assert_eq!(error.code(), Some("UNEXPECTED_ERROR"));
        assert_eq!(
            error.context_value("original_exception").and_then(|v| v.as_str()),
            Some("HttpError")
        );
        assert_eq!(
            error.context_value("function_name").and_then(|v| v.as_str()),
            Some("connect")
        );
        assert_eq!(
            error
                .context_value("args")
                .and_then(|v| v.as_str())
                .map(str::len),
            Some(200)
        );
        assert!(clock.sleeps().is_empty());

        let cause = std::error::Error::source(&error)
            .and_then(|cause| cause.downcast_ref::<HttpError>())
            .expect("original transport error is kept");
        assert_eq!(cause.message(), "tls handshake exploded");
    }
}
