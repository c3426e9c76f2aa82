//! Client configuration: typed settings, file discovery and environment overrides.
//!
//! Settings resolve in layers. Built-in per-source defaults are overridden by
//! a [`ClientConfig`] (usually read from a JSON file), and a few environment
//! variables override the file. Credentials are not merged here; the factory
//! resolves them with its own precedence.

use std::env;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{mask_secret, EtlError};
use crate::retry::{Backoff, RetryConfig};
use crate::source::SourceId;

pub const CONFIG_FILE_NAME: &str = "federal_reserve_etl_config.json";

pub const FRED_API_KEY_ENV: &str = "FRED_API_KEY";
pub const HAVER_USERNAME_ENV: &str = "HAVER_USERNAME";
pub const HAVER_PASSWORD_ENV: &str = "HAVER_PASSWORD";

/// Retry section of a client config, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub retry_count: Option<u32>,
    pub retry_delay: Option<f64>,
    pub backoff_factor: Option<f64>,
}

/// Optional per-source overrides; unset fields fall back to source defaults.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    /// Requests per minute for FRED, per second for Haver.
    pub rate_limit: Option<u32>,
    #[serde(alias = "timeout")]
    pub timeout_secs: Option<u64>,
    pub retry_config: Option<RetrySettings>,
    pub default_database: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry_config = Some(retry);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl Debug for ClientConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_config", &self.retry_config)
            .field("default_database", &self.default_database)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Fully resolved settings a client is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub rate_limit: u32,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub default_database: String,
}

impl ClientSettings {
    pub fn fred_defaults() -> Self {
        Self {
            base_url: String::from("https://api.stlouisfed.org/fred"),
            rate_limit: 120,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::exponential(3, Duration::from_secs(1), 2.0),
            default_database: String::new(),
        }
    }

    pub fn haver_defaults() -> Self {
        Self {
            base_url: String::from("https://api.haver.com/v1"),
            rate_limit: 10,
            timeout: Duration::from_secs(45),
            retry: RetryConfig::exponential(3, Duration::from_secs(2), 2.0),
            default_database: String::from("USECON"),
        }
    }

    pub fn defaults_for(source: SourceId) -> Self {
        match source {
            SourceId::Fred => Self::fred_defaults(),
            SourceId::Haver => Self::haver_defaults(),
        }
    }

    /// Applies `config` on top of the source defaults, rejecting unusable values.
    pub fn resolve(source: SourceId, config: &ClientConfig) -> Result<Self, EtlError> {
        let mut settings = Self::defaults_for(source);

        if let Some(base_url) = &config.base_url {
            let trimmed = base_url.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                return Err(EtlError::configuration("base_url must not be empty", "base_url"));
            }
            settings.base_url = trimmed.to_owned();
        }

        if let Some(rate_limit) = config.rate_limit {
            if rate_limit == 0 {
                return Err(EtlError::configuration(
                    "rate_limit must be at least 1",
                    "rate_limit",
                ));
            }
            settings.rate_limit = rate_limit;
        }

        if let Some(timeout_secs) = config.timeout_secs {
            if timeout_secs == 0 {
                return Err(EtlError::configuration(
                    "timeout must be at least 1 second",
                    "timeout",
                ));
            }
            settings.timeout = Duration::from_secs(timeout_secs);
        }

        if let Some(retry) = &config.retry_config {
            settings.retry = resolve_retry(&settings.retry, retry)?;
        }

        if let Some(database) = &config.default_database {
            let trimmed = database.trim();
            if !trimmed.is_empty() {
                settings.default_database = trimmed.to_ascii_uppercase();
            }
        }

        Ok(settings)
    }
}

fn resolve_retry(defaults: &RetryConfig, retry: &RetrySettings) -> Result<RetryConfig, EtlError> {
    let (default_delay, default_factor) = match defaults.backoff {
        Backoff::Exponential { base, factor, .. } => (base.as_secs_f64(), factor),
        Backoff::Fixed { delay } => (delay.as_secs_f64(), 1.0),
    };
    let delay = retry.retry_delay.unwrap_or(default_delay);
    let factor = retry.backoff_factor.unwrap_or(default_factor);

    if !delay.is_finite() || delay < 0.0 {
        return Err(EtlError::configuration(
            format!("retry_delay must be a non-negative number of seconds, got {delay}"),
            "retry_config",
        ));
    }
    if !factor.is_finite() || factor < 1.0 {
        return Err(EtlError::configuration(
            format!("backoff_factor must be at least 1.0, got {factor}"),
            "retry_config",
        ));
    }

    Ok(RetryConfig {
        retriable: defaults.retriable.clone(),
        ..RetryConfig::exponential(
            retry.retry_count.unwrap_or(defaults.max_retries),
            Duration::from_secs_f64(delay),
            factor,
        )
    })
}

/// Per-source configuration for the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fred: ClientConfig,
    pub haver: ClientConfig,
}

impl PipelineConfig {
    pub fn for_source(&self, source: SourceId) -> &ClientConfig {
        match source {
            SourceId::Fred => &self.fred,
            SourceId::Haver => &self.haver,
        }
    }

    pub fn for_source_mut(&mut self, source: SourceId) -> &mut ClientConfig {
        match source {
            SourceId::Fred => &mut self.fred,
            SourceId::Haver => &mut self.haver,
        }
    }

    /// Explicit path first, then the working directory, the user's home and `/etc`.
    pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(4);
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(home) = env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".federal_reserve_etl")
                    .join("config.json"),
            );
        }
        paths.push(PathBuf::from("/etc/federal_reserve_etl/config.json"));
        paths
    }

    /// Loads the first readable file on the search path, then applies
    /// environment overrides from the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, EtlError> {
        Self::load_from(&Self::search_paths(explicit), explicit, &process_env)
    }

    /// A missing or malformed `explicit` file is an error; any other
    /// candidate that fails to load is skipped with a warning.
    pub fn load_from(
        paths: &[PathBuf],
        explicit: Option<&Path>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, EtlError> {
        let mut config = None;

        for path in paths {
            let is_explicit = explicit.is_some_and(|explicit| explicit == path.as_path());
            if !path.exists() {
                if is_explicit {
                    return Err(EtlError::configuration(
                        format!("Configuration file not found: {}", path.display()),
                        "config_file",
                    ));
                }
                continue;
            }
            match Self::from_file(path) {
                Ok(loaded) => {
                    info!(path = %path.display(), "loaded configuration");
                    config = Some(loaded);
                    break;
                }
                Err(failure) if is_explicit => return Err(failure),
                Err(failure) => {
                    warn!(path = %path.display(), error = %failure, "skipping unreadable configuration file");
                }
            }
        }

        let mut config = config.unwrap_or_default();
        config.apply_env(env);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, EtlError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            EtlError::configuration(
                format!("Failed to read configuration {}: {e}", path.display()),
                "config_file",
            )
            .with_source(e)
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EtlError::configuration(
                format!("Failed to parse configuration {}: {e}", path.display()),
                "config_file",
            )
            .with_source(e)
        })
    }

    /// `FRED_BASE_URL`, `FRED_RATE_LIMIT`, `HAVER_BASE_URL`, `HAVER_RATE_LIMIT`.
    pub fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        for source in SourceId::ALL {
            let prefix = source.as_str().to_ascii_uppercase();
            let config = self.for_source_mut(source);

            if let Some(base_url) = env(&format!("{prefix}_BASE_URL")) {
                debug!(source = %source, "base_url overridden from environment");
                config.base_url = Some(base_url);
            }

            let key = format!("{prefix}_RATE_LIMIT");
            if let Some(raw) = env(&key) {
                match raw.trim().parse::<u32>() {
                    Ok(rate_limit) => config.rate_limit = Some(rate_limit),
                    Err(_) => warn!(variable = %key, value = %raw, "invalid rate limit in environment, using default"),
                }
            }
        }
    }
}

/// Non-empty value of a process environment variable.
pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub fn setup_instructions(source: SourceId) -> &'static str {
    match source {
        SourceId::Fred => {
            "FRED API setup:\n\
             1. Visit https://fred.stlouisfed.org/docs/api/api_key.html\n\
             2. Create a free account with FRED\n\
             3. Generate your API key\n\
             4. export FRED_API_KEY=\"your-32-character-api-key\"\n"
        }
        SourceId::Haver => {
            "Haver Analytics setup:\n\
             1. Contact Haver Analytics to obtain subscription credentials\n\
             2. export HAVER_USERNAME=\"your-username\"\n\
             3. export HAVER_PASSWORD=\"your-password\"\n"
        }
    }
}
