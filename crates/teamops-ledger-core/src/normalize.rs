use std::collections::BTreeSet;

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::files::LedgerFile;
use crate::integrity::{IntegrityIssue, IntegrityReport, IssueCode};
use crate::row::{EventRow, LedgerRow};

/// Columns whose cells carry an embedded JSON array.
pub const DEFAULT_JSON_LIST_FIELDS: [&str; 6] = [
    "input_refs",
    "change_request_ids",
    "blocking_flags",
    "acceptance_criteria_refs",
    "constraint_refs",
    "evidence_refs",
];

/// An export-ready row: original cells, parsed JSON-list cells, and the
/// synthetic `_row_number` / `_event_uid` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    row_number: usize,
    values: Map<String, Value>,
}

impl NormalizedRow {
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Parsed JSON list for `name`, `None` when the cell was absent or
    /// failed to parse.
    #[must_use]
    pub fn list(&self, name: &str) -> Option<&Vec<Value>> {
        self.values.get(name).and_then(Value::as_array)
    }
}

impl LedgerRow for NormalizedRow {
    fn row_number(&self) -> usize {
        self.row_number
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }
}

impl Serialize for NormalizedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// Parses a cell that must be empty or a JSON array literal.
///
/// # Errors
/// Returns a human-readable reason when the cell is neither.
pub fn parse_json_list(raw: &str) -> Result<Vec<Value>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if !trimmed.starts_with('[') {
        let preview: String = trimmed.chars().take(80).collect();
        return Err(format!("expected JSON array string, got: {preview}"));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err("value is valid JSON but not an array".to_string()),
        Err(err) => Err(format!("invalid JSON array syntax: {err}")),
    }
}

/// Synthetic identifier for a row, derived from its file type and key fields.
#[must_use]
pub fn event_uid<R: LedgerRow>(file_key: &str, row: &R) -> String {
    let n = row.row_number();
    match LedgerFile::from_file_key(file_key) {
        Some(LedgerFile::RunRegistry) => format!(
            "run|{}|{}|{}|row:{n}",
            row.value("run_id"),
            row.value("created_utc"),
            row.value("status")
        ),
        Some(LedgerFile::ChangeRequestQueue) => format!(
            "cr|{}|{}|row:{n}",
            row.value("run_id"),
            row.value("request_id")
        ),
        Some(LedgerFile::HandoffLog) => format!(
            "handoff|{}|{}|{}->{}|entry:{}|row:{n}",
            row.value("run_id"),
            row.value("timestamp_utc"),
            row.value("from_team"),
            row.value("to_team"),
            row.value("entry_id")
        ),
        Some(LedgerFile::DecisionLog) => format!(
            "decision|{}|{}|{}|row:{n}",
            row.value("run_id"),
            row.value("timestamp_utc"),
            row.value("decision_id")
        ),
        None => format!("event|{file_key}|row:{n}"),
    }
}

/// Normalizes raw rows for export. Malformed JSON-list cells keep their raw
/// string, gain a `<field>_raw` copy, and add a `JSON_FIELD_INVALID` issue.
pub fn normalize_rows(
    file_key: &str,
    rows: &[EventRow],
    json_list_fields: &BTreeSet<String>,
    report: &mut IntegrityReport,
) -> Vec<NormalizedRow> {
    rows.iter()
        .map(|row| {
            let mut values = Map::new();
            let mut raw_copies = Vec::new();

            for (name, cell) in row.fields() {
                if json_list_fields.contains(name) {
                    match parse_json_list(cell) {
                        Ok(items) => {
                            values.insert(name.to_string(), Value::Array(items));
                        }
                        Err(reason) => {
                            values.insert(name.to_string(), Value::String(cell.to_string()));
                            raw_copies.push((format!("{name}_raw"), cell.to_string()));
                            report.push(IntegrityIssue::error(
                                IssueCode::JsonFieldInvalid,
                                file_key,
                                name,
                                row.row_number(),
                                reason,
                            ));
                        }
                    }
                } else {
                    values.insert(name.to_string(), Value::String(cell.to_string()));
                }
            }

            for (name, raw) in raw_copies {
                values.insert(name, Value::String(raw));
            }
            values.insert("_row_number".to_string(), Value::from(row.row_number()));

            let mut normalized = NormalizedRow {
                row_number: row.row_number(),
                values,
            };
            let uid = event_uid(file_key, &normalized);
            normalized
                .values
                .insert("_event_uid".to_string(), Value::String(uid));
            normalized
        })
        .collect()
}
