use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::row::LedgerRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
}

impl IssueSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    DuplicateId,
    SupersedesSelf,
    SupersedesTargetNotPrior,
    JsonFieldInvalid,
}

impl IssueCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateId => "DUPLICATE_ID",
            Self::SupersedesSelf => "SUPERSEDES_SELF",
            Self::SupersedesTargetNotPrior => "SUPERSEDES_TARGET_NOT_PRIOR",
            Self::JsonFieldInvalid => "JSON_FIELD_INVALID",
        }
    }
}

/// A data-quality finding. Issues never stop an export.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IntegrityIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub file: String,
    pub field: String,
    pub row_number: usize,
    pub message: String,
}

impl IntegrityIssue {
    #[must_use]
    pub fn error(
        code: IssueCode,
        file: &str,
        field: &str,
        row_number: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code,
            file: file.to_string(),
            field: field.to_string(),
            row_number,
            message: message.into(),
        }
    }
}

/// Accumulates issues across every check of one export.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct IntegrityReport {
    issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: IntegrityIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = IntegrityIssue>) {
        self.issues.extend(issues);
    }

    #[must_use]
    pub fn issues(&self) -> &[IntegrityIssue] {
        &self.issues
    }

    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn severity_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.severity.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Reports every row whose `id_field` value already appeared earlier in the
/// same file. Only meaningful for fields that must be unique.
pub fn check_duplicate_ids<R: LedgerRow>(
    file: &str,
    rows: &[R],
    id_field: &str,
) -> Vec<IntegrityIssue> {
    let mut first_seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut issues = Vec::new();

    for row in rows {
        let value = row.value(id_field);
        if value.is_empty() {
            continue;
        }
        match first_seen.get(value) {
            Some(first_row) => issues.push(IntegrityIssue::error(
                IssueCode::DuplicateId,
                file,
                id_field,
                row.row_number(),
                format!("duplicate {id_field}='{value}' (first seen row {first_row})"),
            )),
            None => {
                first_seen.insert(value, row.row_number());
            }
        }
    }

    issues
}

/// Validates that every `supersedes_field` value points at an ID that
/// appeared in a strictly earlier row and never at the row itself.
pub fn check_supersedes_chain<R: LedgerRow>(
    file: &str,
    rows: &[R],
    current_field: &str,
    supersedes_field: &str,
) -> Vec<IntegrityIssue> {
    let mut seen_prior: BTreeSet<&str> = BTreeSet::new();
    let mut issues = Vec::new();

    for row in rows {
        let current = row.value(current_field);
        let target = row.value(supersedes_field);

        if !target.is_empty() {
            if target == current {
                issues.push(IntegrityIssue::error(
                    IssueCode::SupersedesSelf,
                    file,
                    supersedes_field,
                    row.row_number(),
                    format!("{supersedes_field} cannot equal {current_field} ('{target}')"),
                ));
            } else if !seen_prior.contains(target) {
                issues.push(IntegrityIssue::error(
                    IssueCode::SupersedesTargetNotPrior,
                    file,
                    supersedes_field,
                    row.row_number(),
                    format!("{supersedes_field}='{target}' does not reference a prior {current_field}"),
                ));
            }
        }

        if !current.is_empty() {
            seen_prior.insert(current);
        }
    }

    issues
}
