use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::row::{EventRow, EventTable, LedgerRow};
use crate::LedgerError;

/// Columns a queue must carry before migration rows can be planned.
pub const MIGRATION_REQUIRED_FIELDS: [&str; 3] =
    ["request_id", "supersedes_request_id", "statement"];

const LEGACY_TEAMS: [&str; 6] = ["BLUE", "RED", "GREEN", "BLACK", "WHITE", "GREY"];

const CANONICALIZED_STATEMENT: &str =
    "Append-only migration row: canonicalized legacy request_id format to CR-<TEAM>-NNNN.";
const BACKFILLED_STATEMENT: &str =
    "Append-only migration row: backfilled supersedes_request_id for duplicate request_id lineage.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    CanonicalizedLegacyId,
    BackfilledDuplicateLineage,
}

impl MigrationReason {
    #[must_use]
    pub fn statement(self) -> &'static str {
        match self {
            Self::CanonicalizedLegacyId => CANONICALIZED_STATEMENT,
            Self::BackfilledDuplicateLineage => BACKFILLED_STATEMENT,
        }
    }
}

/// Rows to append to the change-request queue. Existing rows are never part
/// of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    appended: Vec<(MigrationReason, EventRow)>,
}

impl MigrationPlan {
    #[must_use]
    pub fn entries(&self) -> &[(MigrationReason, EventRow)] {
        &self.appended
    }

    pub fn rows(&self) -> impl Iterator<Item = &EventRow> {
        self.appended.iter().map(|(_, row)| row)
    }

    #[must_use]
    pub fn count(&self, reason: MigrationReason) -> usize {
        self.appended
            .iter()
            .filter(|(entry_reason, _)| *entry_reason == reason)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.appended.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty()
    }
}

/// Rewrites `CR-NNNN-TEAM` to `CR-TEAM-NNNN`. Anything else is returned
/// unchanged.
#[must_use]
pub fn normalize_request_id(request_id: &str) -> String {
    let trimmed = request_id.trim();
    let mut parts = trimmed.split('-');
    let (Some("CR"), Some(number), Some(team), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return request_id.to_string();
    };

    let numeric = number.len() == 4 && number.bytes().all(|byte| byte.is_ascii_digit());
    if numeric && LEGACY_TEAMS.contains(&team) {
        format!("CR-{team}-{number}")
    } else {
        request_id.to_string()
    }
}

/// Plans superseding rows for the change-request queue.
///
/// Legacy IDs get a copy of their latest row under the canonical ID unless
/// such a row already exists. With `backfill_duplicate_lineage`, IDs that
/// appear more than once also get a copy pointing `supersedes_request_id` at
/// themselves when their latest row does not already.
///
/// # Errors
///
/// Returns [`LedgerError::Structure`] when the queue header lacks any of
/// [`MIGRATION_REQUIRED_FIELDS`].
pub fn plan_id_migration(
    queue: &EventTable,
    backfill_duplicate_lineage: bool,
) -> Result<MigrationPlan, LedgerError> {
    let missing: Vec<&str> = MIGRATION_REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !queue.header.iter().any(|column| column == field))
        .collect();
    if !missing.is_empty() {
        return Err(LedgerError::Structure(format!(
            "change request queue is missing required columns [{}]",
            missing.join(",")
        )));
    }

    let mut by_id: BTreeMap<&str, Vec<&EventRow>> = BTreeMap::new();
    for row in &queue.rows {
        let request_id = row.value("request_id");
        if !request_id.is_empty() {
            by_id.entry(request_id).or_default().push(row);
        }
    }

    let mut next_row_number = queue.rows.last().map_or(0, LedgerRow::row_number) + 1;
    let mut plan = MigrationPlan::default();
    let mut append = |reason: MigrationReason, row: EventRow| {
        plan.appended.push((reason, row.renumbered(next_row_number)));
        next_row_number += 1;
    };

    for (request_id, group) in &by_id {
        let canonical = normalize_request_id(request_id);
        if canonical == *request_id {
            continue;
        }
        let already_migrated = queue.rows.iter().any(|row| {
            row.value("request_id") == canonical && row.value("supersedes_request_id") == *request_id
        });
        if already_migrated {
            continue;
        }
        let Some(latest) = group.last() else {
            continue;
        };
        append(
            MigrationReason::CanonicalizedLegacyId,
            latest
                .with_field("request_id", canonical)
                .with_field("statement", CANONICALIZED_STATEMENT)
                .with_field("supersedes_request_id", *request_id),
        );
    }

    if backfill_duplicate_lineage {
        for (request_id, group) in &by_id {
            if group.len() <= 1 {
                continue;
            }
            let Some(latest) = group.last() else {
                continue;
            };
            if latest.value("supersedes_request_id") == *request_id {
                continue;
            }
            append(
                MigrationReason::BackfilledDuplicateLineage,
                latest
                    .with_field("statement", BACKFILLED_STATEMENT)
                    .with_field("supersedes_request_id", *request_id),
            );
        }
    }

    Ok(plan)
}
