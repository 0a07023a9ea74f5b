//! Parser for the hand-edited QA fix log.
//!
//! The log is a sequence of blocks separated by a `---` line. Each block holds
//! labelled fields written as top-level bullets (`- files_changed:`), with list
//! items as indented bullets underneath. The parser splits blocks first, then
//! walks each block with an explicit field mode so that a label always resets
//! where the following lines accumulate.

use serde::{Deserialize, Serialize};

const BLOCK_SEPARATOR: &str = "---";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixLogEntry {
    pub run_id: String,
    pub timestamp_utc: String,
    pub request_ids_implemented: Vec<String>,
    pub decision_and_change_refs: Vec<String>,
    pub files_changed: Vec<String>,
    pub rationale: String,
    pub verification_evidence: Vec<String>,
    pub residual_risks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListField {
    RequestIds,
    DecisionRefs,
    FilesChanged,
    VerificationEvidence,
    ResidualRisks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarField {
    RunId,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Scalar(ScalarField),
    List(ListField),
    Rationale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    List(ListField),
    Rationale,
}

impl Label {
    fn parse(line: &str) -> Option<(Self, &str)> {
        let body = line.strip_prefix("- ")?;
        let (name, rest) = body.split_once(':')?;
        let label = match name {
            "run_id" => Self::Scalar(ScalarField::RunId),
            "timestamp_utc" => Self::Scalar(ScalarField::Timestamp),
            "request_ids_implemented" => Self::List(ListField::RequestIds),
            "decision_and_change_refs" => Self::List(ListField::DecisionRefs),
            "files_changed" => Self::List(ListField::FilesChanged),
            "verification_evidence" => Self::List(ListField::VerificationEvidence),
            "residual_risks" => Self::List(ListField::ResidualRisks),
            "rationale" => Self::Rationale,
            _ => return None,
        };
        Some((label, rest.trim()))
    }
}

impl FixLogEntry {
    fn list_mut(&mut self, field: ListField) -> &mut Vec<String> {
        match field {
            ListField::RequestIds => &mut self.request_ids_implemented,
            ListField::DecisionRefs => &mut self.decision_and_change_refs,
            ListField::FilesChanged => &mut self.files_changed,
            ListField::VerificationEvidence => &mut self.verification_evidence,
            ListField::ResidualRisks => &mut self.residual_risks,
        }
    }

    fn push_rationale(&mut self, text: &str) {
        if !self.rationale.is_empty() {
            self.rationale.push(' ');
        }
        self.rationale.push_str(text);
    }
}

/// Parses every block that carries a `- run_id:` label. Blocks without one
/// are skipped; unknown lines are ignored rather than rejected.
#[must_use]
pub fn parse_fix_log(text: &str) -> Vec<FixLogEntry> {
    split_blocks(text)
        .into_iter()
        .filter(|block| block.iter().any(|line| line.starts_with("- run_id:")))
        .map(|block| parse_block(&block))
        .collect()
}

fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line == BLOCK_SEPARATOR {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_block(lines: &[&str]) -> FixLogEntry {
    let mut entry = FixLogEntry::default();
    let mut mode = Mode::Idle;

    for line in lines {
        if let Some((label, inline)) = Label::parse(line) {
            mode = match label {
                Label::Scalar(ScalarField::RunId) => {
                    entry.run_id = inline.to_string();
                    Mode::Idle
                }
                Label::Scalar(ScalarField::Timestamp) => {
                    entry.timestamp_utc = inline.to_string();
                    Mode::Idle
                }
                Label::List(field) => Mode::List(field),
                Label::Rationale => {
                    if !inline.is_empty() {
                        entry.push_rationale(inline);
                    }
                    Mode::Rationale
                }
            };
            continue;
        }

        let trimmed = line.trim();
        match mode {
            Mode::Idle => {}
            Mode::Rationale => {
                if trimmed.starts_with('|') {
                    continue;
                }
                if trimmed.starts_with("- ") {
                    mode = Mode::Idle;
                } else if !trimmed.is_empty() {
                    entry.push_rationale(trimmed);
                }
            }
            Mode::List(field) => {
                if let Some(item) = trimmed.strip_prefix("- ") {
                    entry.list_mut(field).push(item.trim().to_string());
                }
            }
        }
    }

    entry
}
