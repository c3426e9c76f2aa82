use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Upstream data sources known to the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Fred,
    Haver,
}

impl SourceId {
    pub const ALL: [Self; 2] = [Self::Fred, Self::Haver];

    /// Lowercase identifier accepted on the command line and in config.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fred => "fred",
            Self::Haver => "haver",
        }
    }

    /// Name recorded as `source` in metadata.
    pub const fn source_name(self) -> &'static str {
        match self {
            Self::Fred => "FRED",
            Self::Haver => "Haver",
        }
    }

    pub const fn client_name(self) -> &'static str {
        match self {
            Self::Fred => "FredClient",
            Self::Haver => "HaverClient",
        }
    }

    fn available() -> String {
        let names = Self::ALL
            .iter()
            .map(|source| format!("'{}'", source.as_str()))
            .collect::<Vec<_>>();
        format!("[{}]", names.join(", "))
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EtlError::configuration(
                "source_type must be a non-empty string",
                "source_type",
            ));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "fred" => Ok(Self::Fred),
            "haver" => Ok(Self::Haver),
            _ => Err(EtlError::configuration(
                format!(
                    "Unsupported data source: '{value}'. Available sources: {}",
                    Self::available()
                ),
                "source_type",
            )),
        }
    }
}
