//! Reconciliation core for the append-only team-ops CSV ledgers.
//!
//! Every ledger is an ordered stream of [`EventRow`]s. Nothing in this crate
//! touches the filesystem: the store crate reads tables, hands them to the
//! functions here, and persists whatever plan comes back.

use std::path::PathBuf;

use time::{OffsetDateTime, UtcOffset};

mod evidence;
mod files;
mod fix_log;
mod integrity;
mod materialize;
mod migrate;
mod normalize;
mod partition;
mod row;
mod summary;
mod tickets;

pub use evidence::{
    parse_git_log, parse_porcelain_status, GitCommit, GitEvidence, GitFileChange, WorktreeStatus,
    COMMIT_MARKER,
};
pub use files::{LedgerFile, ARCHIVE_INDEX_FIELDS, ARCHIVE_INDEX_FILE};
pub use fix_log::{parse_fix_log, FixLogEntry};
pub use integrity::{
    check_duplicate_ids, check_supersedes_chain, IntegrityIssue, IntegrityReport, IssueCode,
    IssueSeverity,
};
pub use materialize::{materialize_latest, LatestState};
pub use migrate::{
    normalize_request_id, plan_id_migration, MigrationPlan, MigrationReason,
    MIGRATION_REQUIRED_FIELDS,
};
pub use normalize::{
    event_uid, normalize_rows, parse_json_list, NormalizedRow, DEFAULT_JSON_LIST_FIELDS,
};
pub use partition::{
    active_run_ids, normalize_status, plan_cleanup, split_by_active_runs, split_change_requests,
    split_run_registry, ActiveStatusPolicy, CleanupPlan, CleanupSummary, FileCounts, LedgerTables,
    Split, DEFAULT_ACTIVE_REQUEST_STATUSES, DEFAULT_ACTIVE_RUN_STATUSES,
};
pub use row::{EventRow, EventTable, LedgerRow};
pub use summary::{
    build_summary, render_markdown_summary, BlockingFlagEntry, CurrentViews, ExecutionChanges,
    ExecutionDerived, IntegrityOverview, RecordSummary, RunSummary, DEFAULT_STAGE_TEAMS,
};
pub use tickets::{
    latest_status_by_ticket, list_tickets, next_response_id, next_row_id, normalize_bool,
    ticket_seeds_from_review, ResponseType, TicketIdAllocator, TicketListing, TicketPriority,
    TicketResponse, TicketSeed, TicketStatus, TICKET_QUEUE_FIELDS, TICKET_RESPONSE_FIELDS,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("Missing required file: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("structure error: {0}")]
    Structure(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

const RFC3339_SECONDS: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
const COMPACT_STAMP: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year][month][day]T[hour][minute][second]Z");
const DAY_STAMP: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year][month][day]");

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Formats a timestamp as second-precision RFC3339 with a `Z` suffix.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, LedgerError> {
    format_with(value, RFC3339_SECONDS)
}

/// Formats a timestamp as `YYYYMMDDTHHMMSSZ`, used for archive and export
/// directory names.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when formatting fails.
pub fn format_compact_stamp(value: OffsetDateTime) -> Result<String, LedgerError> {
    format_with(value, COMPACT_STAMP)
}

/// Formats the UTC calendar day as `YYYYMMDD`.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when formatting fails.
pub fn format_day_stamp(value: OffsetDateTime) -> Result<String, LedgerError> {
    format_with(value, DAY_STAMP)
}

fn format_with(
    value: OffsetDateTime,
    format: &[time::format_description::BorrowedFormatItem<'static>],
) -> Result<String, LedgerError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format)
        .map_err(|err| LedgerError::Validation(format!("failed to format timestamp: {err}")))
}
