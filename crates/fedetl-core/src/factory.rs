//! Construction of data-source clients from an identifier.
//!
//! Credentials are resolved once, in order: explicit [`Credentials`], then the
//! source's [`ClientConfig`], then the environment.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::adapters::{
    validate_api_key, validate_password, validate_username, FredClient, HaverClient,
};
use crate::clock::Clock;
use crate::config::{
    process_env, ClientConfig, ClientSettings, FRED_API_KEY_ENV, HAVER_PASSWORD_ENV,
    HAVER_USERNAME_ENV,
};
use crate::data_source::DataSource;
use crate::error::{mask_secret, EtlError};
use crate::http_client::HttpClient;
use crate::source::SourceId;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Call-time credential overrides. Blank values count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Credential readiness for one source, as reported by `check-credentials`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub source: SourceId,
    pub ready: bool,
    /// Environment variable names, suffixed with `(invalid format)` when present but unusable.
    pub missing: Vec<String>,
}

/// Builds boxed [`DataSource`] clients.
///
/// ```rust,ignore
/// let factory = DataSourceFactory::new();
/// let fred = factory.create_data_source("FRED", &ClientConfig::default(), &Credentials::default())?;
/// ```
pub struct DataSourceFactory {
    transport: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    env: EnvLookup,
}

impl Default for DataSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceFactory {
    /// Factory reading fallback credentials from the process environment.
    pub fn new() -> Self {
        Self {
            transport: None,
            clock: None,
            env: Arc::new(process_env),
        }
    }

    /// Transport handed to every client created afterwards.
    pub fn with_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the environment lookup used as the last credential fallback.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Identifier to client type name for every supported source.
    pub fn available_sources() -> BTreeMap<&'static str, &'static str> {
        SourceId::ALL
            .iter()
            .map(|source| (source.as_str(), source.client_name()))
            .collect()
    }

    /// Parses `source_type` case-insensitively, then delegates to [`Self::create`].
    pub fn create_data_source(
        &self,
        source_type: &str,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<Box<dyn DataSource>, EtlError> {
        let source = source_type.parse::<SourceId>()?;
        self.create(source, config, credentials)
    }

    pub fn create(
        &self,
        source: SourceId,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<Box<dyn DataSource>, EtlError> {
        debug!(source = %source, "creating data source");
        let created = match source {
            SourceId::Fred => {
                let api_key = self.require_api_key(config, credentials)?;
                self.build_fred(api_key, config)
                    .map(|client| Box::new(client) as Box<dyn DataSource>)
            }
            SourceId::Haver => {
                let (username, password) = self.require_basic(config, credentials)?;
                self.build_haver(username, password, config)
                    .map(|client| Box::new(client) as Box<dyn DataSource>)
            }
        };

        let instance = created.map_err(|cause| {
            EtlError::configuration(
                format!("Failed to create data source '{source}': {}", cause.message()),
                "source_instantiation",
            )
            .with_source(cause)
        })?;
        info!(source = %source, client = source.client_name(), "created data source");
        Ok(instance)
    }

    /// Checks that `config` and the resolvable credentials would construct a client.
    pub fn validate_source_config(
        &self,
        source: SourceId,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<(), EtlError> {
        ClientSettings::resolve(source, config)?;
        match source {
            SourceId::Fred => validate_api_key(&self.require_api_key(config, credentials)?),
            SourceId::Haver => {
                let (username, password) = self.require_basic(config, credentials)?;
                validate_username(&username)?;
                validate_password(&password)
            }
        }
    }

    /// Reports which credentials are missing or malformed without constructing a client.
    pub fn credential_status(
        &self,
        source: SourceId,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> CredentialStatus {
        let mut missing = Vec::new();
        let mut check = |value: Option<String>, env_key: &str, valid: &dyn Fn(&str) -> bool| {
            match value {
                None => missing.push(env_key.to_owned()),
                Some(value) if !valid(&value) => {
                    missing.push(format!("{env_key} (invalid format)"));
                }
                Some(_) => {}
            }
        };

        match source {
            SourceId::Fred => check(
                self.resolve(&credentials.api_key, &config.api_key, FRED_API_KEY_ENV),
                FRED_API_KEY_ENV,
                &|key: &str| validate_api_key(key).is_ok(),
            ),
            SourceId::Haver => {
                check(
                    self.resolve(&credentials.username, &config.username, HAVER_USERNAME_ENV),
                    HAVER_USERNAME_ENV,
                    &|username: &str| validate_username(username).is_ok(),
                );
                check(
                    self.resolve(&credentials.password, &config.password, HAVER_PASSWORD_ENV),
                    HAVER_PASSWORD_ENV,
                    &|password: &str| validate_password(password).is_ok(),
                );
            }
        }

        CredentialStatus {
            source,
            ready: missing.is_empty(),
            missing,
        }
    }

    fn resolve(
        &self,
        explicit: &Option<String>,
        configured: &Option<String>,
        env_key: &str,
    ) -> Option<String> {
        let present = |value: &Option<String>| {
            value
                .as_ref()
                .filter(|value| !value.trim().is_empty())
                .cloned()
        };
        present(explicit)
            .or_else(|| present(configured))
            .or_else(|| (self.env)(env_key))
    }

    fn require_api_key(
        &self,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<String, EtlError> {
        self.resolve(&credentials.api_key, &config.api_key, FRED_API_KEY_ENV)
            .ok_or_else(|| {
                EtlError::configuration(
                    "FRED API key is required. Provide via api_key parameter or FRED_API_KEY environment variable",
                    "api_key",
                )
            })
    }

    fn require_basic(
        &self,
        config: &ClientConfig,
        credentials: &Credentials,
    ) -> Result<(String, String), EtlError> {
        let username = self
            .resolve(&credentials.username, &config.username, HAVER_USERNAME_ENV)
            .ok_or_else(|| {
                EtlError::configuration(
                    "Haver username is required. Provide via username parameter or HAVER_USERNAME environment variable",
                    "username",
                )
            })?;
        let password = self
            .resolve(&credentials.password, &config.password, HAVER_PASSWORD_ENV)
            .ok_or_else(|| {
                EtlError::configuration(
                    "Haver password is required. Provide via password parameter or HAVER_PASSWORD environment variable",
                    "password",
                )
            })?;
        Ok((username, password))
    }

    fn build_fred(&self, api_key: String, config: &ClientConfig) -> Result<FredClient, EtlError> {
        let mut client = FredClient::new(api_key, config)?;
        if let Some(transport) = &self.transport {
            client = client.with_transport(Arc::clone(transport));
        }
        if let Some(clock) = &self.clock {
            client = client.with_clock(Arc::clone(clock));
        }
        Ok(client)
    }

    fn build_haver(
        &self,
        username: String,
        password: String,
        config: &ClientConfig,
    ) -> Result<HaverClient, EtlError> {
        let mut client = HaverClient::new(username, password, config)?;
        if let Some(transport) = &self.transport {
            client = client.with_transport(Arc::clone(transport));
        }
        if let Some(clock) = &self.clock {
            client = client.with_clock(Arc::clone(clock));
        }
        Ok(client)
    }
}

impl Debug for DataSourceFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceFactory")
            .field("custom_transport", &self.transport.is_some())
            .field("custom_clock", &self.clock.is_some())
            .finish_non_exhaustive()
    }
}
