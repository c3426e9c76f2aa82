use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::VariableCode;

/// Source-agnostic description of one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetadata {
    pub code: VariableCode,
    pub name: String,
    pub description: String,
    pub units: String,
    pub frequency: String,
    pub source: String,
    pub category: String,
    pub start_date: String,
    pub end_date: String,
}

/// String field from an upstream record; non-strings are rendered, absent is empty.
pub(crate) fn text_field(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
