use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use teamops_ledger_core::{
    format_day_stamp, format_rfc3339, list_tickets, next_response_id, next_row_id, now_utc,
    ticket_seeds_from_review, EventTable, LedgerError, LedgerRow, TicketIdAllocator, TicketListing,
    TicketResponse, TicketSeed, TicketStatus, TICKET_QUEUE_FIELDS, TICKET_RESPONSE_FIELDS,
};

use crate::csv_io::{append_rows, ensure_table, read_optional_table, read_required_table};
use crate::LedgerStore;

pub const DEFAULT_OPENED_BY: &str = "review_cell";

/// A ticket to open by hand. Without `ticket_id` the next free
/// `RRC-<today>-<NNN>` is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub ticket_id: Option<String>,
    pub seed: TicketSeed,
    pub owner_team: String,
    pub opened_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedTicket {
    pub ticket_id: String,
    pub row_id: u64,
    pub claim_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FromReviewReport {
    pub review_run_id: String,
    pub created: Vec<CreatedTicket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedResponse {
    pub ticket_id: String,
    pub response_id: String,
    pub row_id: u64,
    pub status_after: TicketStatus,
}

fn open_log(path: &Path, fields: &[&str]) -> Result<EventTable> {
    ensure_table(path, fields)?;
    let table = read_required_table(path)?;
    if table.header.is_empty() {
        return Ok(EventTable::new(
            fields.iter().map(|name| (*name).to_string()).collect(),
        ));
    }
    Ok(table)
}

impl LedgerStore {
    fn open_queue(&self) -> Result<EventTable> {
        open_log(&self.layout().ticket_queue_path(), &TICKET_QUEUE_FIELDS)
    }

    fn append_seeds(
        &self,
        queue: &mut EventTable,
        seeds: Vec<(Option<String>, TicketSeed)>,
        owner_team: &str,
        opened_by: &str,
    ) -> Result<Vec<CreatedTicket>> {
        let now = now_utc();
        let ts_utc = format_rfc3339(now)?;
        let mut allocator = TicketIdAllocator::new(&format_day_stamp(now)?, queue)?;

        let mut created = Vec::with_capacity(seeds.len());
        let mut rows = Vec::with_capacity(seeds.len());
        for (explicit_id, seed) in seeds {
            let ticket_id = match explicit_id.filter(|id| !id.trim().is_empty()) {
                Some(id) => id,
                None => allocator.allocate()?,
            };
            let row_id = next_row_id(queue)?;
            let row = queue
                .push(seed.queue_row(row_id, &ts_utc, &ticket_id, owner_team, opened_by))
                .clone();
            rows.push(row);
            created.push(CreatedTicket {
                ticket_id,
                row_id,
                claim_id: seed.claim_id,
            });
        }

        append_rows(&self.layout().ticket_queue_path(), queue, &rows)?;
        for ticket in &created {
            tracing::info!(ticket_id = %ticket.ticket_id, row_id = ticket.row_id, "opened ticket");
        }
        Ok(created)
    }

    pub fn create_ticket(&self, ticket: NewTicket) -> Result<CreatedTicket> {
        let mut queue = self.open_queue()?;
        let mut created = self.append_seeds(
            &mut queue,
            vec![(ticket.ticket_id, ticket.seed)],
            &ticket.owner_team,
            &ticket.opened_by,
        )?;
        created
            .pop()
            .ok_or_else(|| anyhow::anyhow!("ticket queue append produced no row"))
    }

    /// Opens one ticket per unsupported, caveated or aspirational finding of
    /// `review_run_id`. An `approved_as_is` disposition opens none.
    pub fn tickets_from_review(
        &self,
        review_run_id: &str,
        owner_team: &str,
        opened_by: &str,
    ) -> Result<FromReviewReport> {
        let layout = self.layout();
        let claims = read_optional_table(&layout.claim_register_path())?;
        let evidence = read_optional_table(&layout.evidence_support_path())?;
        let decisions = read_optional_table(&layout.decision_disposition_path())?;
        let seeds = ticket_seeds_from_review(review_run_id, &claims, &evidence, &decisions)?;

        let created = if seeds.is_empty() {
            tracing::info!(review_run_id, "review needs no tickets");
            Vec::new()
        } else {
            let mut queue = self.open_queue()?;
            let seeds = seeds.into_iter().map(|seed| (None, seed)).collect();
            self.append_seeds(&mut queue, seeds, owner_team, opened_by)?
        };

        Ok(FromReviewReport {
            review_run_id: review_run_id.to_string(),
            created,
        })
    }

    /// Appends an engineering response to an existing ticket.
    pub fn respond(&self, response: &TicketResponse) -> Result<RecordedResponse> {
        let queue = read_optional_table(&self.layout().ticket_queue_path())?;
        let known = queue
            .rows
            .iter()
            .any(|row| row.value("ticket_id") == response.ticket_id);
        if !known {
            return Err(LedgerError::Validation(format!(
                "Unknown ticket_id={}",
                response.ticket_id
            ))
            .into());
        }

        let path = self.layout().ticket_responses_path();
        let mut responses = open_log(&path, &TICKET_RESPONSE_FIELDS)?;
        let response_id = next_response_id(&responses, &response.ticket_id);
        let row_id = next_row_id(&responses)?;
        let ts_utc = format_rfc3339(now_utc())?;
        let row = responses
            .push(response.response_row(row_id, &ts_utc, &response_id))
            .clone();
        append_rows(&path, &responses, &[row])?;

        tracing::info!(
            ticket_id = %response.ticket_id,
            response_id = %response_id,
            status_after = response.status_after.as_str(),
            "recorded ticket response"
        );
        Ok(RecordedResponse {
            ticket_id: response.ticket_id.clone(),
            response_id,
            row_id,
            status_after: response.status_after,
        })
    }

    /// Current view of every ticket, optionally filtered by status. Missing
    /// logs read as empty.
    pub fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<TicketListing>> {
        let queue = read_optional_table(&self.layout().ticket_queue_path())?;
        let responses = read_optional_table(&self.layout().ticket_responses_path())?;
        Ok(list_tickets(&queue, &responses, status))
    }
}
