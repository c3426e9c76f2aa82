use std::fmt::{Display, Formatter};

use fedetl_core::{MetadataMap, SourceId, TimeSeriesTable, VariableMetadata};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Extraction run identifier (UUID v4), recorded in exports and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Provenance block written alongside exported data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub source: SourceId,
    pub extracted_at: String,
    pub start_date: String,
    pub end_date: String,
    pub variables: Vec<String>,
    pub observations: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variable_metadata: Vec<VariableMetadata>,
}

impl RunMetadata {
    pub fn new(source: SourceId, start_date: &str, end_date: &str, table: &TimeSeriesTable) -> Self {
        let extracted_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            run_id: RunId::new_v4(),
            source,
            extracted_at,
            start_date: start_date.to_owned(),
            end_date: end_date.to_owned(),
            variables: table
                .columns()
                .iter()
                .map(|code| code.as_str().to_owned())
                .collect(),
            observations: table.len(),
            variable_metadata: Vec::new(),
        }
    }

    pub fn with_variable_metadata(mut self, metadata: MetadataMap) -> Self {
        self.variable_metadata = metadata.into_values().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use fedetl_core::{Observation, Series, VariableCode};
    use time::macros::date;

    use super::*;

    #[test]
    fn run_id_is_uuid_v4() {
        assert_eq!(RunId::new_v4().0.get_version_num(), 4);
    }

    #[test]
    fn records_columns_and_row_count() {
        let code = VariableCode::parse("FEDFUNDS").expect("valid");
        let table = TimeSeriesTable::from_series([Series::new(
            code,
            [Observation {
                date: date!(2023 - 01 - 01),
                value: 4.33,
            }],
        )]);

        let metadata = RunMetadata::new(SourceId::Fred, "2023-01-01", "2023-01-31", &table);
        assert_eq!(metadata.variables, vec!["FEDFUNDS"]);
        assert_eq!(metadata.observations, 1);

        let json = serde_json::to_value(&metadata).expect("serializes");
        assert_eq!(json["source"], "fred");
        assert!(json.get("variable_metadata").is_none());
        assert!(OffsetDateTime::parse(&metadata.extracted_at, &Rfc3339).is_ok());
    }
}
