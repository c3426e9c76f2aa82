use fedetl_core::{ErrorKind, EtlError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Etl(#[from] EtlError),

    #[error("invalid argument: {0}")]
    Usage(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Etl(error) => match error.kind() {
                ErrorKind::Etl => 1,
                ErrorKind::Validation => 2,
                ErrorKind::Configuration => 3,
                ErrorKind::Authentication => 4,
                ErrorKind::Connection => 5,
                ErrorKind::DataRetrieval => 6,
                ErrorKind::RateLimit => 7,
            },
            Self::Usage(_) => 2,
            Self::Logging(_) => 9,
            Self::Serialization(_) => 8,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let validation = CliError::from(EtlError::validation("bad date", "date"));
        assert_eq!(validation.exit_code(), 2);

        let auth = CliError::from(EtlError::authentication("rejected", "FRED", "abcd...wxyz"));
        assert_eq!(auth.exit_code(), 4);

        let limited = CliError::from(EtlError::rate_limit(
            "slow down",
            120,
            std::time::Duration::from_secs(3),
        ));
        assert_eq!(limited.exit_code(), 7);
        assert_eq!(CliError::Usage(String::from("x")).exit_code(), 2);
    }
}
