use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::EtlError;

pub const MAX_VARIABLE_LEN: usize = 50;

/// Normalized (trimmed, uppercase) time-series identifier such as `FEDFUNDS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariableCode(String);

/// Why a raw code was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidCode {
    Empty,
    TooLong,
    InvalidCharacters,
}

impl InvalidCode {
    const fn reason(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooLong => "too long",
            Self::InvalidCharacters => "invalid characters",
        }
    }
}

impl VariableCode {
    pub fn parse(input: &str) -> Result<Self, InvalidCode> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(InvalidCode::Empty);
        }
        if normalized.chars().count() > MAX_VARIABLE_LEN {
            return Err(InvalidCode::TooLong);
        }
        let valid = normalized
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(InvalidCode::InvalidCharacters);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VariableCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for VariableCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<String> for VariableCode {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_variable_codes(value)?
            .into_iter()
            .next()
            .ok_or_else(|| EtlError::validation("Invalid variable codes: '' (empty)", "variables"))
    }
}

impl From<VariableCode> for String {
    fn from(value: VariableCode) -> Self {
        value.0
    }
}

/// One or many raw variable codes as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableList(Vec<String>);

impl VariableList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for VariableList {
    fn from(value: &str) -> Self {
        Self(vec![value.to_owned()])
    }
}

impl From<String> for VariableList {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<&String> for VariableList {
    fn from(value: &String) -> Self {
        Self(vec![value.clone()])
    }
}

impl From<&VariableCode> for VariableList {
    fn from(value: &VariableCode) -> Self {
        Self(vec![value.as_str().to_owned()])
    }
}

impl From<Vec<String>> for VariableList {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl From<Vec<&str>> for VariableList {
    fn from(value: Vec<&str>) -> Self {
        Self(value.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for VariableList {
    fn from(value: &[&str]) -> Self {
        Self(value.iter().map(|code| (*code).to_owned()).collect())
    }
}

impl From<&[String]> for VariableList {
    fn from(value: &[String]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for VariableList {
    fn from(value: [&str; N]) -> Self {
        Self(value.iter().map(|code| (*code).to_owned()).collect())
    }
}

impl From<Vec<VariableCode>> for VariableList {
    fn from(value: Vec<VariableCode>) -> Self {
        Self(value.into_iter().map(String::from).collect())
    }
}

/// Normalizes every code, rejecting the whole list if any entry is invalid.
///
/// The error enumerates every invalid entry, not just the first, and carries
/// both the valid and invalid subsets in its context.
///
/// Repeated codes collapse onto their first occurrence.
pub fn validate_variable_codes(
    variables: impl Into<VariableList>,
) -> Result<Vec<VariableCode>, EtlError> {
    let variables = variables.into();
    let mut valid = Vec::with_capacity(variables.len());
    let mut invalid = Vec::new();

    for raw in variables.as_slice() {
        match VariableCode::parse(raw) {
            Ok(code) if valid.contains(&code) => {
                debug!(variable = %code, "skipping repeated variable code");
            }
            Ok(code) => valid.push(code),
            Err(reason) => invalid.push(format!("'{raw}' ({})", reason.reason())),
        }
    }

    if variables.is_empty() {
        invalid.push(String::from("'' (empty)"));
    }

    if !invalid.is_empty() {
        return Err(EtlError::validation(
            format!("Invalid variable codes: {}", invalid.join(", ")),
            "variables",
        )
        .with_code("INVALID_VARIABLES")
        .with_context(
            "valid_variables",
            valid
                .iter()
                .map(|code| Value::from(code.as_str()))
                .collect::<Vec<_>>(),
        )
        .with_context(
            "invalid_variables",
            invalid.iter().cloned().map(Value::from).collect::<Vec<_>>(),
        ));
    }

    debug!(count = valid.len(), "variable validation passed");
    Ok(valid)
}
