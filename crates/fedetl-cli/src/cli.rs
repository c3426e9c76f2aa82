//! CLI argument definitions for fedetl.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `extract` | Fetch time series for one or more variables and export them |
//! | `metadata` | Fetch variable metadata |
//! | `sources` | List supported data sources |
//! | `check-credentials` | Report missing or malformed credentials |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--log-level` | `info` | Log filter; `RUST_LOG` takes precedence |
//! | `--quiet` | `false` | Only log errors |
//! | `--verbose` | `false` | Log at debug level |
//! | `--log-file` | none | Append logs to a file instead of stderr |
//! | `--config` | search path | JSON configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! fedetl extract --source fred --variables FEDFUNDS,DGS10 \
//!     --start-date 2023-01-01 --end-date 2023-12-31 --output rates.csv
//!
//! fedetl metadata --source haver --variables GDP --pretty
//!
//! fedetl check-credentials
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Federal Reserve economic data extraction
///
/// Pulls economic time series from FRED and Haver Analytics into one
/// normalized table and exports it as CSV or JSON.
#[derive(Debug, Parser)]
#[command(
    name = "fedetl",
    author,
    version,
    about = "Extract economic time series from FRED and Haver Analytics",
    long_about = "fedetl retrieves economic time series from the FRED and Haver Analytics \
APIs and writes them in one source-agnostic layout.\n\
\n\
Credentials are read from command-line flags, the configuration file, or the \
FRED_API_KEY / HAVER_USERNAME / HAVER_PASSWORD environment variables, in that order.\n\
\n\
Use 'fedetl <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Log filter directive (e.g. `info`, `debug`, `fedetl_core=trace`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Only log errors.
    #[arg(long, short, global = true, default_value_t = false, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Append log output to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Configuration file; defaults to the standard search path.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON written to stdout.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Effective log filter after `--quiet` / `--verbose`.
    pub fn log_filter(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Fred,
    Haver,
}

impl From<SourceArg> for fedetl_core::SourceId {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Fred => Self::Fred,
            SourceArg::Haver => Self::Haver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch time series and export them.
    ///
    /// # Examples
    ///
    ///   fedetl extract --source fred --variables FEDFUNDS
    ///   fedetl extract --source haver --variables GDP,CPI --database USECON --format json
    Extract(ExtractArgs),

    /// Fetch variable metadata as JSON.
    Metadata(MetadataArgs),

    /// List supported data sources.
    Sources,

    /// Report which credentials are missing, with setup instructions.
    CheckCredentials(CheckCredentialsArgs),
}

/// Connection options shared by commands that talk to an upstream.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Data source to query.
    #[arg(long, value_enum)]
    pub source: SourceArg,

    /// Comma-separated variable codes, e.g. `FEDFUNDS,DGS10`.
    #[arg(long, required = true, value_delimiter = ',')]
    pub variables: Vec<String>,

    /// FRED API key (overrides config and FRED_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Haver username (overrides config and HAVER_USERNAME).
    #[arg(long)]
    pub username: Option<String>,

    /// Haver password (overrides config and HAVER_PASSWORD).
    #[arg(long)]
    pub password: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Requests per minute (FRED) or per second (Haver).
    #[arg(long)]
    pub rate_limit: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// First date, `YYYY-MM-DD`. Defaults to one year before the end date.
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last date, `YYYY-MM-DD`. Defaults to today.
    #[arg(long)]
    pub end_date: Option<String>,

    /// Frequency override, e.g. `d`, `w`, `m`, `q`, `a`.
    #[arg(long)]
    pub frequency: Option<String>,

    /// FRED aggregation method: `avg`, `sum` or `eop`.
    #[arg(long)]
    pub aggregation_method: Option<String>,

    /// FRED units / Haver transformation code.
    #[arg(long)]
    pub units: Option<String>,

    /// Haver database; defaults to the configured database.
    #[arg(long)]
    pub database: Option<String>,

    /// Output file; data goes to stdout when omitted.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    pub format: ExportFormat,

    /// One row per (date, variable) instead of one column per variable.
    #[arg(long, default_value_t = false)]
    pub long_format: bool,

    /// Embed variable metadata in JSON output.
    #[arg(long, default_value_t = false)]
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Args)]
pub struct MetadataArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CheckCredentialsArgs {
    /// Only check this source.
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,
}
