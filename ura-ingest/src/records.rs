//! Normalized ingest record types and the format-adapter contract
//!
//! Format adapters (CSV/Excel/JSON column mapping) are external
//! collaborators; they hand the orchestrator already-normalized records.
//! Only the contract and a JSON-lines adapter used by tests live here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use ura_common::Result;

/// Object fields of one normalized record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectFields {
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub district: Option<String>,
}

/// Group fields of one normalized record
///
/// `declared` comes from the supplier; `detected` from an upstream
/// detection algorithm together with its provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFields {
    pub declared: Option<String>,
    pub detected: Option<DetectedGroupFields>,
}

/// Detection provenance for an algorithmically-assigned group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedGroupFields {
    pub group_type: String,
    pub method: String,
    pub confidence: f64,
}

/// Review fields of one normalized record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFields {
    pub source: String,
    pub external_id: String,
    pub text: String,
    pub rating: Option<i64>,
    pub review_date: Option<String>,
}

/// One normalized record handed to the orchestrator by a format adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub object: ObjectFields,
    #[serde(default)]
    pub groups: GroupFields,
    pub review: Option<ReviewFields>,
}

/// Outcome of parsing one file: parsed records plus rows the adapter had
/// to skip. Row-level failures never fail the whole file.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<RawRecord>,
    pub skipped_rows: Vec<SkippedRow>,
}

/// One row the adapter could not map
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: String,
}

/// Format adapter contract
///
/// Implementations own column/key mapping for their format and must be
/// tolerant of missing optional fields.
pub trait FormatAdapter {
    /// Parse a file into normalized records, reporting skipped rows
    fn parse(&self, path: &Path) -> Result<ParseOutcome>;
}

/// JSON-lines adapter: one `RawRecord` JSON object per line
///
/// The simplest concrete adapter; used by tests and for pre-normalized
/// exports. Blank lines are ignored, malformed lines are skipped.
#[derive(Debug, Default)]
pub struct JsonLinesAdapter;

impl FormatAdapter for JsonLinesAdapter {
    fn parse(&self, path: &Path) -> Result<ParseOutcome> {
        let content = std::fs::read_to_string(path)?;
        let mut outcome = ParseOutcome::default();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(line) {
                Ok(record) => outcome.records.push(record),
                Err(e) => outcome.skipped_rows.push(SkippedRow {
                    line: idx + 1,
                    reason: e.to_string(),
                }),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn json_lines_adapter_skips_bad_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"object":{{"name":"Школа №7","address":"пр. Мира, 3"}},"groups":{{"declared":"schools"}},"review":null}}"#
        )
        .unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(
            file,
            r#"{{"object":{{"name":"Аптека","address":"ул. Садовая, 1"}},"review":{{"source":"2gis","external_id":"r1","text":"Нормально","rating":3,"review_date":null}}}}"#
        )
        .unwrap();

        let outcome = JsonLinesAdapter.parse(file.path()).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped_rows.len(), 1);
        assert_eq!(outcome.skipped_rows[0].line, 2);

        assert_eq!(outcome.records[0].groups.declared.as_deref(), Some("schools"));
        let review = outcome.records[1].review.as_ref().unwrap();
        assert_eq!(review.source, "2gis");
        assert_eq!(review.rating, Some(3));
    }
}
