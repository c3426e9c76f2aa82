//! # Fedetl Core
//!
//! Client layer for pulling economic time series from the Federal Reserve
//! Economic Data (FRED) API and the Haver Analytics API into one normalized
//! shape.
//!
//! ## Overview
//!
//! - **One client contract** ([`DataSource`]) implemented by both upstreams
//! - **Normalized output**: a date-indexed, outer-joined [`TimeSeriesTable`]
//!   and a common [`VariableMetadata`] record
//! - **Shared validators** for variable codes and date ranges
//! - **Retry with backoff** around connection probes
//! - **Per-client throttling** (minute window for FRED, fixed interval for Haver)
//! - **Factory** resolving credentials from arguments, config, then environment
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | FRED and Haver clients |
//! | [`clock`] | Injectable time source |
//! | [`config`] | Per-source configuration and file/env loading |
//! | [`data_source`] | Client contract and scoped connection guard |
//! | [`domain`] | Variable codes, dates, series, table and metadata |
//! | [`error`] | Error taxonomy |
//! | [`factory`] | Client construction from a source identifier |
//! | [`http_client`] | Blocking HTTP transport seam |
//! | [`retry`] | Retry policy and wrapper |
//! | [`source`] | Source identifiers |
//! | [`throttling`] | Rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fedetl_core::{ClientConfig, Connection, Credentials, DataSourceFactory, FetchOptions};
//!
//! fn main() -> Result<(), fedetl_core::EtlError> {
//!     let factory = DataSourceFactory::new();
//!     let mut fred = factory.create_data_source(
//!         "fred",
//!         &ClientConfig::default(),
//!         &Credentials::default(),
//!     )?;
//!
//!     let mut connection = Connection::open(fred.as_mut())?;
//!     let table = connection.get_data(
//!         vec!["FEDFUNDS", "DGS10"].into(),
//!         "2023-01-01".into(),
//!         "2023-12-31".into(),
//!         &FetchOptions::default(),
//!     )?;
//!     println!("{} rows", table.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`EtlError`]; branch on its kind:
//!
//! ```rust
//! use fedetl_core::{ErrorKind, EtlError};
//!
//! fn describe(error: &EtlError) -> &'static str {
//!     match error.kind() {
//!         ErrorKind::Authentication => "check credentials",
//!         ErrorKind::RateLimit => "slow down",
//!         ErrorKind::Validation => "fix the request",
//!         _ => "see message",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are never logged; `Debug` output masks them
//! - All HTTP requests use TLS via rustls

pub mod adapters;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod factory;
pub mod http_client;
pub mod retry;
pub mod source;
pub mod throttling;

// Clients
pub use adapters::{FredClient, HaverClient};

pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{ClientConfig, ClientSettings, PipelineConfig, RetrySettings};

// Client contract
pub use data_source::{with_connection, Connection, DataSource, FetchOptions, MetadataMap};

// Domain types
pub use domain::{
    validate_and_convert_dates, validate_variable_codes, DateInput, DateRange, LongRecord,
    Observation, Series, TimeSeriesTable, VariableCode, VariableList, VariableMetadata,
};

pub use error::{ErrorKind, ErrorRecord, EtlError};

pub use factory::{CredentialStatus, Credentials, DataSourceFactory};

// HTTP transport
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

pub use retry::{run_with_retry, Backoff, OperationError, RetryConfig};

pub use source::SourceId;

pub use throttling::{OnLimit, RateLimitStatus, RateLimiter, RatePolicy};
