//! Review-cell ticket lifecycle over two append-only logs: the ticket queue
//! and the engineering responses. Status transitions are advisory; the
//! current status of a ticket is whatever the last applicable row says.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::materialize::materialize_latest;
use crate::row::{EventRow, EventTable, LedgerRow};
use crate::LedgerError;

pub const TICKET_QUEUE_FIELDS: [&str; 15] = [
    "row_id",
    "ts_utc",
    "ticket_id",
    "review_run_id",
    "artifact_id",
    "artifact_version",
    "claim_id",
    "priority",
    "status",
    "title",
    "requested_change",
    "acceptance_criteria",
    "owner_team",
    "opened_by",
    "supersedes_row_id",
];

pub const TICKET_RESPONSE_FIELDS: [&str; 12] = [
    "row_id",
    "ts_utc",
    "ticket_id",
    "response_id",
    "responder_id",
    "response_type",
    "status_after",
    "change_ref",
    "verification_ref",
    "non_breaking_change",
    "notes",
    "supersedes_row_id",
];

const TICKET_PREFIX: &str = "RRC";
const APPROVED_OUTCOME: &str = "approved_as_is";
const SEEDED_SUPPORT_STATUSES: [&str; 3] = ["unsupported", "caveated", "aspirational"];
const FALLBACK_REQUESTED_CHANGE: &str =
    "Bind claim to concrete evidence or narrow the claim boundary.";
const SEED_ACCEPTANCE_CRITERIA: &str =
    "Add supporting code/doc/test/artifact reference OR revise claim text to remove unsupported scope.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TicketPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    AwaitingReview,
    Resolved,
    Closed,
}

impl TicketStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::AwaitingReview => "awaiting_review",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Analysis,
    ProposedFix,
    Implemented,
    Verification,
    Blocked,
}

impl ResponseType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::ProposedFix => "proposed_fix",
            Self::Implemented => "implemented",
            Self::Verification => "verification",
            Self::Blocked => "blocked",
        }
    }
}

/// Content of a new ticket, before it is assigned an ID and a queue row.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TicketSeed {
    pub review_run_id: String,
    pub artifact_id: String,
    pub artifact_version: String,
    pub claim_id: String,
    pub title: String,
    pub priority: TicketPriority,
    pub requested_change: String,
    pub acceptance_criteria: String,
}

impl TicketSeed {
    /// Queue row opening this ticket with status `open`.
    #[must_use]
    pub fn queue_row(
        &self,
        row_id: u64,
        ts_utc: &str,
        ticket_id: &str,
        owner_team: &str,
        opened_by: &str,
    ) -> Vec<(String, String)> {
        let cells = [
            ("row_id", row_id.to_string()),
            ("ts_utc", ts_utc.to_string()),
            ("ticket_id", ticket_id.to_string()),
            ("review_run_id", self.review_run_id.clone()),
            ("artifact_id", self.artifact_id.clone()),
            ("artifact_version", self.artifact_version.clone()),
            ("claim_id", self.claim_id.clone()),
            ("priority", self.priority.as_str().to_string()),
            ("status", TicketStatus::Open.as_str().to_string()),
            ("title", self.title.clone()),
            ("requested_change", self.requested_change.clone()),
            ("acceptance_criteria", self.acceptance_criteria.clone()),
            ("owner_team", owner_team.to_string()),
            ("opened_by", opened_by.to_string()),
            ("supersedes_row_id", String::new()),
        ];
        cells
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

/// An engineering response to append against an existing ticket.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub responder_id: String,
    pub response_type: ResponseType,
    pub status_after: TicketStatus,
    pub change_ref: String,
    pub verification_ref: String,
    pub non_breaking_change: bool,
    pub notes: String,
}

impl TicketResponse {
    #[must_use]
    pub fn response_row(&self, row_id: u64, ts_utc: &str, response_id: &str) -> Vec<(String, String)> {
        let cells = [
            ("row_id", row_id.to_string()),
            ("ts_utc", ts_utc.to_string()),
            ("ticket_id", self.ticket_id.clone()),
            ("response_id", response_id.to_string()),
            ("responder_id", self.responder_id.clone()),
            ("response_type", self.response_type.as_str().to_string()),
            ("status_after", self.status_after.as_str().to_string()),
            ("change_ref", self.change_ref.clone()),
            ("verification_ref", self.verification_ref.clone()),
            ("non_breaking_change", self.non_breaking_change.to_string()),
            ("notes", self.notes.clone()),
            ("supersedes_row_id", String::new()),
        ];
        cells
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

/// Hands out `RRC-<YYYYMMDD>-<NNN>` IDs for one day, continuing after the
/// highest suffix already present in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketIdAllocator {
    prefix: String,
    next_index: Option<u32>,
}

fn ticket_ids_exhausted(prefix: &str) -> LedgerError {
    LedgerError::Validation(format!("ticket_id suffix space exhausted for {prefix}NNN"))
}

impl TicketIdAllocator {
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] when the highest suffix for the
    /// day is already `u32::MAX`.
    pub fn new(day_stamp: &str, queue: &EventTable) -> Result<Self, LedgerError> {
        let prefix = format!("{TICKET_PREFIX}-{day_stamp}-");
        let max_index = queue
            .rows
            .iter()
            .filter_map(|row| row.value("ticket_id").strip_prefix(prefix.as_str()))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let next_index = max_index
            .checked_add(1)
            .ok_or_else(|| ticket_ids_exhausted(&prefix))?;

        Ok(Self {
            prefix,
            next_index: Some(next_index),
        })
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] once every suffix has been handed
    /// out.
    pub fn allocate(&mut self) -> Result<String, LedgerError> {
        let index = self
            .next_index
            .ok_or_else(|| ticket_ids_exhausted(&self.prefix))?;
        self.next_index = index.checked_add(1);
        Ok(format!("{}{index:03}", self.prefix))
    }
}

/// One more than the largest numeric `row_id`, or 1 for a log without any.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] when the largest `row_id` is
/// `u64::MAX`.
pub fn next_row_id(table: &EventTable) -> Result<u64, LedgerError> {
    let Some(max) = table
        .rows
        .iter()
        .filter_map(|row| row.value("row_id").parse::<u64>().ok())
        .max()
    else {
        return Ok(1);
    };
    max.checked_add(1)
        .ok_or_else(|| LedgerError::Validation(format!("row_id {max} cannot be incremented")))
}

/// `<ticket>-R<NN>`, numbered after the responses already logged for it.
#[must_use]
pub fn next_response_id(responses: &EventTable, ticket_id: &str) -> String {
    let existing = responses
        .rows
        .iter()
        .filter(|row| row.value("ticket_id") == ticket_id)
        .count();
    format!("{ticket_id}-R{:02}", existing + 1)
}

/// # Errors
/// Returns [`LedgerError::Validation`] when `value` is not boolean-like.
pub fn normalize_bool(value: &str) -> Result<bool, LedgerError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(LedgerError::Validation(format!(
            "Expected boolean-like value for non_breaking_change; got: {value}"
        ))),
    }
}

/// Current status per ticket: queue rows first, then every response that
/// sets `status_after`, each in file order.
#[must_use]
pub fn latest_status_by_ticket(
    queue: &EventTable,
    responses: &EventTable,
) -> BTreeMap<String, String> {
    let mut status = BTreeMap::new();
    for row in &queue.rows {
        let ticket_id = row.value("ticket_id");
        if ticket_id.is_empty() {
            continue;
        }
        let value = match row.value("status") {
            "" => TicketStatus::Open.as_str(),
            value => value,
        };
        status.insert(ticket_id.to_string(), value.to_string());
    }
    for row in &responses.rows {
        let ticket_id = row.value("ticket_id");
        let after = row.value("status_after");
        if !ticket_id.is_empty() && !after.is_empty() {
            status.insert(ticket_id.to_string(), after.to_string());
        }
    }
    status
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TicketListing {
    pub ticket_id: String,
    pub status: String,
    pub priority: String,
    pub owner_team: String,
    pub claim_id: String,
    pub title: String,
}

impl TicketListing {
    #[must_use]
    pub fn to_tsv(&self) -> String {
        [
            self.ticket_id.as_str(),
            self.status.as_str(),
            self.priority.as_str(),
            self.owner_team.as_str(),
            self.claim_id.as_str(),
            self.title.as_str(),
        ]
        .join("\t")
    }
}

/// Latest queue row per ticket with its current status, sorted by ticket ID.
#[must_use]
pub fn list_tickets(
    queue: &EventTable,
    responses: &EventTable,
    status_filter: Option<TicketStatus>,
) -> Vec<TicketListing> {
    let status_by_ticket = latest_status_by_ticket(queue, responses);
    materialize_latest(&queue.rows, "ticket_id")
        .into_iter()
        .map(|(ticket_id, row)| {
            let status = status_by_ticket
                .get(&ticket_id)
                .cloned()
                .unwrap_or_else(|| TicketStatus::Open.as_str().to_string());
            TicketListing {
                status,
                priority: row.value("priority").to_string(),
                owner_team: row.value("owner_team").to_string(),
                claim_id: row.value("claim_id").to_string(),
                title: row.value("title").to_string(),
                ticket_id,
            }
        })
        .filter(|listing| status_filter.map_or(true, |wanted| listing.status == wanted.as_str()))
        .collect()
}

fn rows_for_run<'a>(table: &'a EventTable, review_run_id: &'a str) -> impl Iterator<Item = &'a EventRow> {
    table
        .rows
        .iter()
        .filter(move |row| row.value("review_run_id") == review_run_id)
}

/// Derives tickets from a review run's evidence findings.
///
/// The latest disposition for the run decides whether any ticket is needed;
/// `approved_as_is` needs none. Otherwise each evidence row marked
/// unsupported, caveated or aspirational yields one seed.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when the run has no disposition rows.
pub fn ticket_seeds_from_review(
    review_run_id: &str,
    claims: &EventTable,
    evidence: &EventTable,
    decisions: &EventTable,
) -> Result<Vec<TicketSeed>, LedgerError> {
    let Some(latest_decision) = rows_for_run(decisions, review_run_id).last() else {
        return Err(LedgerError::Validation(format!(
            "No decision rows found for review_run_id={review_run_id}"
        )));
    };
    if latest_decision.value("outcome") == APPROVED_OUTCOME {
        return Ok(Vec::new());
    }

    let run_claims: Vec<EventRow> = rows_for_run(claims, review_run_id).cloned().collect();
    let claims_by_id = materialize_latest(&run_claims, "claim_id");

    let seeds = rows_for_run(evidence, review_run_id)
        .filter_map(|row| {
            let support_status = row.value("support_status");
            if !SEEDED_SUPPORT_STATUSES.contains(&support_status) {
                return None;
            }
            let claim_id = row.value("claim_id");
            let normalized_claim = claims_by_id
                .get(claim_id)
                .map(|claim| claim.value("normalized_claim"))
                .filter(|text| !text.is_empty())
                .map_or_else(|| format!("Claim {claim_id} requires correction"), str::to_string);
            let requested_change = match row.value("caveat_text") {
                "" => FALLBACK_REQUESTED_CHANGE,
                text => text,
            };
            let priority = if support_status == "unsupported" {
                TicketPriority::High
            } else {
                TicketPriority::Medium
            };

            Some(TicketSeed {
                review_run_id: review_run_id.to_string(),
                artifact_id: row.value("artifact_id").to_string(),
                artifact_version: row.value("artifact_version").to_string(),
                claim_id: claim_id.to_string(),
                title: format!("{}: {normalized_claim}", support_status.to_uppercase()),
                priority,
                requested_change: requested_change.to_string(),
                acceptance_criteria: SEED_ACCEPTANCE_CRITERIA.to_string(),
            })
        })
        .collect();

    Ok(seeds)
}
