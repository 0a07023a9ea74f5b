use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::files::LedgerFile;
use crate::materialize::materialize_latest;
use crate::row::{EventRow, EventTable, LedgerRow};
use crate::LedgerError;

pub const DEFAULT_ACTIVE_RUN_STATUSES: [&str; 7] = [
    "initialized",
    "active",
    "in_progress",
    "blocked",
    "blocked_missing_stages",
    "awaiting_input",
    "ready",
];

pub const DEFAULT_ACTIVE_REQUEST_STATUSES: [&str; 6] =
    ["open", "in_progress", "blocked", "ready", "todo", "pending"];

#[must_use]
pub fn normalize_status(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Which statuses count as "active" when deciding what stays live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveStatusPolicy {
    pub active_run_statuses: BTreeSet<String>,
    pub active_request_statuses: BTreeSet<String>,
    pub keep_run_history: bool,
}

impl ActiveStatusPolicy {
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            active_run_statuses: DEFAULT_ACTIVE_RUN_STATUSES
                .iter()
                .map(|status| (*status).to_string())
                .collect(),
            active_request_statuses: DEFAULT_ACTIVE_REQUEST_STATUSES
                .iter()
                .map(|status| (*status).to_string())
                .collect(),
            keep_run_history: false,
        }
    }

    /// Builds a policy from comma-separated status lists. A missing or blank
    /// list falls back to the default set.
    ///
    /// # Errors
    /// Returns [`LedgerError::Configuration`] when the resulting policy fails
    /// validation.
    pub fn from_lists(
        run_statuses: Option<&str>,
        request_statuses: Option<&str>,
        keep_run_history: bool,
    ) -> Result<Self, LedgerError> {
        let policy = Self {
            active_run_statuses: parse_status_set(run_statuses, &DEFAULT_ACTIVE_RUN_STATUSES),
            active_request_statuses: parse_status_set(
                request_statuses,
                &DEFAULT_ACTIVE_REQUEST_STATUSES,
            ),
            keep_run_history,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// # Errors
    /// Returns [`LedgerError::Configuration`] when a status set is empty or
    /// holds values that are not normalized.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (name, set) in [
            ("active_run_statuses", &self.active_run_statuses),
            ("active_request_statuses", &self.active_request_statuses),
        ] {
            if set.is_empty() {
                return Err(LedgerError::Configuration(format!(
                    "{name} MUST contain at least one status"
                )));
            }
            if let Some(bad) = set.iter().find(|status| normalize_status(status) != **status) {
                return Err(LedgerError::Configuration(format!(
                    "{name} contains non-normalized status '{bad}'"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_active_run_status(&self, status: &str) -> bool {
        self.active_run_statuses.contains(&normalize_status(status))
    }

    #[must_use]
    pub fn is_active_request_status(&self, status: &str) -> bool {
        self.active_request_statuses
            .contains(&normalize_status(status))
    }
}

fn parse_status_set(raw: Option<&str>, default: &[&str]) -> BTreeSet<String> {
    match raw {
        Some(value) if !value.trim().is_empty() => value
            .split(',')
            .map(normalize_status)
            .filter(|status| !status.is_empty())
            .collect(),
        _ => default.iter().map(|status| (*status).to_string()).collect(),
    }
}

/// Rows that stay in the live file and rows that move to the archive, each
/// in original file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub keep: Vec<EventRow>,
    pub archive: Vec<EventRow>,
}

impl Split {
    fn partition<'a>(rows: &'a [EventRow], mut keep_row: impl FnMut(&'a EventRow) -> bool) -> Self {
        let mut split = Self::default();
        for row in rows {
            if keep_row(row) {
                split.keep.push(row.clone());
            } else {
                split.archive.push(row.clone());
            }
        }
        split
    }
}

/// Run IDs whose latest registry row carries an active status.
#[must_use]
pub fn active_run_ids(rows: &[EventRow], policy: &ActiveStatusPolicy) -> BTreeSet<String> {
    materialize_latest(rows, "run_id")
        .into_iter()
        .filter(|(_, row)| policy.is_active_run_status(row.value("status")))
        .map(|(run_id, _)| run_id)
        .collect()
}

/// Splits the run registry. By default only the latest row of each active
/// run stays; with `keep_run_history` every row of an active run stays.
#[must_use]
pub fn split_run_registry(
    rows: &[EventRow],
    policy: &ActiveStatusPolicy,
) -> (Split, BTreeSet<String>) {
    let active = active_run_ids(rows, policy);
    let latest = materialize_latest(rows, "run_id");

    let split = Split::partition(rows, |row| {
        let run_id = row.value("run_id");
        if !active.contains(run_id) {
            return false;
        }
        policy.keep_run_history
            || latest
                .get(run_id)
                .is_some_and(|current| current.row_number() == row.row_number())
    });

    (split, active)
}

/// A change request stays live only while its status is active, its run is
/// active, and no row supersedes it.
#[must_use]
pub fn split_change_requests(
    rows: &[EventRow],
    active_runs: &BTreeSet<String>,
    policy: &ActiveStatusPolicy,
) -> Split {
    let superseded: BTreeSet<&str> = rows
        .iter()
        .map(|row| row.value("supersedes_request_id"))
        .filter(|target| !target.is_empty())
        .collect();

    Split::partition(rows, |row| {
        let request_id = row.value("request_id");
        let run_id = row.value("run_id");
        let is_superseded = !request_id.is_empty() && superseded.contains(request_id);

        policy.is_active_request_status(row.value("status"))
            && !run_id.is_empty()
            && active_runs.contains(run_id)
            && !is_superseded
    })
}

/// Handoff and decision rows stay live while their run is active.
#[must_use]
pub fn split_by_active_runs(rows: &[EventRow], active_runs: &BTreeSet<String>) -> Split {
    Split::partition(rows, |row| {
        let run_id = row.value("run_id");
        !run_id.is_empty() && active_runs.contains(run_id)
    })
}

/// The four live ledgers as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerTables {
    pub run_registry: EventTable,
    pub change_requests: EventTable,
    pub handoffs: EventTable,
    pub decisions: EventTable,
}

impl LedgerTables {
    #[must_use]
    pub fn get(&self, file: LedgerFile) -> &EventTable {
        match file {
            LedgerFile::RunRegistry => &self.run_registry,
            LedgerFile::ChangeRequestQueue => &self.change_requests,
            LedgerFile::HandoffLog => &self.handoffs,
            LedgerFile::DecisionLog => &self.decisions,
        }
    }

    pub fn get_mut(&mut self, file: LedgerFile) -> &mut EventTable {
        match file {
            LedgerFile::RunRegistry => &mut self.run_registry,
            LedgerFile::ChangeRequestQueue => &mut self.change_requests,
            LedgerFile::HandoffLog => &mut self.handoffs,
            LedgerFile::DecisionLog => &mut self.decisions,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCounts {
    pub before: usize,
    pub keep: usize,
    pub archive: usize,
}

/// Keep/archive partition for every live ledger. Computing a plan never
/// writes anything; dry runs stop here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub active_run_ids: BTreeSet<String>,
    run_registry: Split,
    change_requests: Split,
    handoffs: Split,
    decisions: Split,
}

impl CleanupPlan {
    #[must_use]
    pub fn split(&self, file: LedgerFile) -> &Split {
        match file {
            LedgerFile::RunRegistry => &self.run_registry,
            LedgerFile::ChangeRequestQueue => &self.change_requests,
            LedgerFile::HandoffLog => &self.handoffs,
            LedgerFile::DecisionLog => &self.decisions,
        }
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, FileCounts> {
        LedgerFile::ALL
            .into_iter()
            .map(|file| {
                let split = self.split(file);
                (
                    file.file_name().to_string(),
                    FileCounts {
                        before: split.keep.len() + split.archive.len(),
                        keep: split.keep.len(),
                        archive: split.archive.len(),
                    },
                )
            })
            .collect()
    }

    #[must_use]
    pub fn archived_total(&self) -> usize {
        LedgerFile::ALL
            .into_iter()
            .map(|file| self.split(file).archive.len())
            .sum()
    }

    #[must_use]
    pub fn summary(
        &self,
        policy: &ActiveStatusPolicy,
        operation_id: Ulid,
        timestamp_utc: String,
        dry_run: bool,
    ) -> CleanupSummary {
        CleanupSummary {
            operation_id,
            timestamp_utc,
            dry_run,
            active_run_ids: self.active_run_ids.iter().cloned().collect(),
            active_run_statuses: policy.active_run_statuses.iter().cloned().collect(),
            active_request_statuses: policy.active_request_statuses.iter().cloned().collect(),
            keep_run_history: policy.keep_run_history,
            counts: self.counts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupSummary {
    pub operation_id: Ulid,
    pub timestamp_utc: String,
    pub dry_run: bool,
    pub active_run_ids: Vec<String>,
    pub active_run_statuses: Vec<String>,
    pub active_request_statuses: Vec<String>,
    pub keep_run_history: bool,
    pub counts: BTreeMap<String, FileCounts>,
}

/// Computes the keep/archive partition for all four ledgers.
#[must_use]
pub fn plan_cleanup(tables: &LedgerTables, policy: &ActiveStatusPolicy) -> CleanupPlan {
    let (run_registry, active_runs) = split_run_registry(&tables.run_registry.rows, policy);
    let change_requests =
        split_change_requests(&tables.change_requests.rows, &active_runs, policy);
    let handoffs = split_by_active_runs(&tables.handoffs.rows, &active_runs);
    let decisions = split_by_active_runs(&tables.decisions.rows, &active_runs);

    CleanupPlan {
        active_run_ids: active_runs,
        run_registry,
        change_requests,
        handoffs,
        decisions,
    }
}
