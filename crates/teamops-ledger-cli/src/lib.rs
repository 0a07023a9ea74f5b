//! Command surface of the `teamops` binary.
//!
//! Every command prints a JSON document on stdout (ticket listing defaults to
//! tab-separated lines). Logs go to stderr. Exit codes: `0` success, `1`
//! failure or a strict export with integrity issues, `2` a required input
//! file is missing.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use teamops_ledger_core::{
    normalize_bool, ActiveStatusPolicy, LedgerError, ResponseType, TicketPriority,
    TicketResponse, TicketSeed, TicketStatus,
};
use teamops_ledger_store::{ExportOptions, ExportScope, LedgerStore, NewTicket, DEFAULT_OPENED_BY};

#[derive(Debug, Parser)]
#[command(name = "teamops")]
#[command(about = "Append-only team-ops ledger maintenance")]
pub struct Cli {
    /// Repository root holding `data/team_ops/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build an oracle record of the repository's team history.
    Export(ExportArgs),
    /// Archive rows of inactive runs and superseded change requests.
    Cleanup(CleanupArgs),
    /// Open, answer, and list review-cell tickets.
    Tickets {
        #[command(subcommand)]
        command: TicketsCommand,
    },
    /// Append canonical request IDs to the change-request queue.
    MigrateIds(MigrateIdsArgs),
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Comma-separated run statuses treated as active.
    #[arg(long)]
    active_run_statuses: Option<String>,
    /// Comma-separated change-request statuses treated as active.
    #[arg(long)]
    active_request_statuses: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Exit 1 when any integrity issue is found.
    #[arg(long)]
    strict: bool,
    /// Skip git history and worktree evidence.
    #[arg(long)]
    no_git: bool,
    /// JSON file overriding the export scope.
    #[arg(long)]
    scope: Option<PathBuf>,
    #[command(flatten)]
    statuses: StatusArgs,
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Report what would be archived without writing anything.
    #[arg(long)]
    dry_run: bool,
    /// Keep every row of an active run, not just its latest.
    #[arg(long)]
    keep_run_history: bool,
    #[command(flatten)]
    statuses: StatusArgs,
}

#[derive(Debug, Args)]
pub struct MigrateIdsArgs {
    /// Print the planned rows without appending them.
    #[arg(long)]
    dry_run: bool,
    /// Also append self-superseding rows for request IDs logged more than once.
    #[arg(long)]
    backfill_duplicate_lineage: bool,
}

#[derive(Debug, Subcommand)]
pub enum TicketsCommand {
    /// Append one ticket to the queue.
    Create(CreateTicketArgs),
    /// Open a ticket for every unsupported, caveated, or aspirational claim of a review run.
    FromReview(FromReviewArgs),
    /// Log an engineering response and the ticket's new status.
    Respond(RespondArgs),
    /// Print the current state of every ticket.
    List(ListTicketsArgs),
}

#[derive(Debug, Args)]
pub struct CreateTicketArgs {
    /// Defaults to the next `RRC-<today>-<NNN>`.
    #[arg(long)]
    ticket_id: Option<String>,
    #[arg(long)]
    review_run_id: String,
    #[arg(long)]
    artifact_id: String,
    #[arg(long)]
    artifact_version: String,
    #[arg(long)]
    claim_id: String,
    #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
    priority: PriorityArg,
    #[arg(long)]
    title: String,
    #[arg(long)]
    requested_change: String,
    #[arg(long)]
    acceptance_criteria: String,
    #[arg(long)]
    owner_team: String,
    #[arg(long, default_value = DEFAULT_OPENED_BY)]
    opened_by: String,
}

#[derive(Debug, Args)]
pub struct FromReviewArgs {
    #[arg(long)]
    review_run_id: String,
    #[arg(long)]
    owner_team: String,
    #[arg(long, default_value = DEFAULT_OPENED_BY)]
    opened_by: String,
}

#[derive(Debug, Args)]
pub struct RespondArgs {
    #[arg(long)]
    ticket_id: String,
    #[arg(long)]
    responder_id: String,
    #[arg(long, value_enum)]
    response_type: ResponseTypeArg,
    #[arg(long, value_enum)]
    status_after: StatusArg,
    /// Path, PR ref, or commit hash proving the change.
    #[arg(long)]
    change_ref: String,
    #[arg(long, default_value = "")]
    verification_ref: String,
    /// Boolean-like: true/false, yes/no, 1/0.
    #[arg(long, default_value = "true")]
    non_breaking_change: String,
    #[arg(long)]
    notes: String,
}

#[derive(Debug, Args)]
pub struct ListTicketsArgs {
    /// Only tickets currently in this status.
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    /// Print a JSON array instead of tab-separated lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum StatusArg {
    Open,
    InProgress,
    AwaitingReview,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ResponseTypeArg {
    Analysis,
    ProposedFix,
    Implemented,
    Verification,
    Blocked,
}

fn map_priority(value: PriorityArg) -> TicketPriority {
    match value {
        PriorityArg::Low => TicketPriority::Low,
        PriorityArg::Medium => TicketPriority::Medium,
        PriorityArg::High => TicketPriority::High,
    }
}

fn map_status(value: StatusArg) -> TicketStatus {
    match value {
        StatusArg::Open => TicketStatus::Open,
        StatusArg::InProgress => TicketStatus::InProgress,
        StatusArg::AwaitingReview => TicketStatus::AwaitingReview,
        StatusArg::Resolved => TicketStatus::Resolved,
        StatusArg::Closed => TicketStatus::Closed,
    }
}

fn map_response_type(value: ResponseTypeArg) -> ResponseType {
    match value {
        ResponseTypeArg::Analysis => ResponseType::Analysis,
        ResponseTypeArg::ProposedFix => ResponseType::ProposedFix,
        ResponseTypeArg::Implemented => ResponseType::Implemented,
        ResponseTypeArg::Verification => ResponseType::Verification,
        ResponseTypeArg::Blocked => ResponseType::Blocked,
    }
}

fn status_policy(statuses: &StatusArgs, keep_run_history: bool) -> Result<ActiveStatusPolicy> {
    Ok(ActiveStatusPolicy::from_lists(
        statuses.active_run_statuses.as_deref(),
        statuses.active_request_statuses.as_deref(),
        keep_run_history,
    )?)
}

fn load_scope(path: Option<&PathBuf>) -> Result<ExportScope> {
    let Some(path) = path else {
        return Ok(ExportScope::defaults());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read export scope {}", path.display()))?;
    Ok(ExportScope::from_json(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Maps a failed command to its process exit code.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<LedgerError>() {
        Some(LedgerError::MissingInput(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

/// Executes the parsed command against the repository at `--root`.
///
/// # Errors
/// Returns an error when the root cannot be opened, an input is missing or
/// malformed, or a write fails.
pub fn run_cli(cli: Cli) -> Result<ExitCode> {
    let store = LedgerStore::open(&cli.root)?;
    tracing::debug!(root = %store.root().display(), command = ?cli.command, "running command");
    match cli.command {
        Command::Export(args) => run_export(&store, &args),
        Command::Cleanup(args) => {
            let policy = status_policy(&args.statuses, args.keep_run_history)?;
            print_json(&store.cleanup(&policy, args.dry_run)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tickets { command } => {
            run_tickets(&store, command)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::MigrateIds(args) => {
            print_json(&store.migrate_ids(args.dry_run, args.backfill_duplicate_lineage)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_export(store: &LedgerStore, args: &ExportArgs) -> Result<ExitCode> {
    let scope = load_scope(args.scope.as_ref())?;
    let options = ExportOptions {
        strict: args.strict,
        collect_git: !args.no_git,
        policy: status_policy(&args.statuses, false)?,
    };
    let report = store.export(&scope, &options)?;
    print_json(&report)?;
    if report.strict_failed {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_tickets(store: &LedgerStore, command: TicketsCommand) -> Result<()> {
    match command {
        TicketsCommand::Create(args) => {
            let ticket = NewTicket {
                ticket_id: args.ticket_id,
                seed: TicketSeed {
                    review_run_id: args.review_run_id,
                    artifact_id: args.artifact_id,
                    artifact_version: args.artifact_version,
                    claim_id: args.claim_id,
                    title: args.title,
                    priority: map_priority(args.priority),
                    requested_change: args.requested_change,
                    acceptance_criteria: args.acceptance_criteria,
                },
                owner_team: args.owner_team,
                opened_by: args.opened_by,
            };
            print_json(&store.create_ticket(ticket)?)
        }
        TicketsCommand::FromReview(args) => print_json(&store.tickets_from_review(
            &args.review_run_id,
            &args.owner_team,
            &args.opened_by,
        )?),
        TicketsCommand::Respond(args) => {
            let response = TicketResponse {
                non_breaking_change: normalize_bool(&args.non_breaking_change)?,
                ticket_id: args.ticket_id,
                responder_id: args.responder_id,
                response_type: map_response_type(args.response_type),
                status_after: map_status(args.status_after),
                change_ref: args.change_ref,
                verification_ref: args.verification_ref,
                notes: args.notes,
            };
            print_json(&store.respond(&response)?)
        }
        TicketsCommand::List(args) => {
            let listings = store.list_tickets(args.status.map(map_status))?;
            if args.json {
                return print_json(&listings);
            }
            for listing in &listings {
                println!("{}", listing.to_tsv());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => panic!("failed to parse {args:?}: {err}"),
        }
    }

    #[test]
    fn status_values_use_snake_case() {
        let cli = parse(&["teamops", "tickets", "list", "--status", "awaiting_review"]);
        match cli.command {
            Command::Tickets {
                command: TicketsCommand::List(args),
            } => assert!(matches!(args.status, Some(StatusArg::AwaitingReview))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn create_defaults_priority_and_opened_by() {
        let cli = parse(&[
            "teamops",
            "tickets",
            "create",
            "--review-run-id",
            "RR-1",
            "--artifact-id",
            "A-1",
            "--artifact-version",
            "v1",
            "--claim-id",
            "C-1",
            "--title",
            "t",
            "--requested-change",
            "r",
            "--acceptance-criteria",
            "a",
            "--owner-team",
            "blue",
        ]);
        match cli.command {
            Command::Tickets {
                command: TicketsCommand::Create(args),
            } => {
                assert!(matches!(args.priority, PriorityArg::Medium));
                assert_eq!(args.opened_by, "review_cell");
                assert_eq!(args.ticket_id, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn blank_status_lists_fall_back_to_defaults() {
        let statuses = StatusArgs {
            active_run_statuses: Some(String::new()),
            active_request_statuses: None,
        };
        match status_policy(&statuses, false) {
            Ok(policy) => assert_eq!(policy, ActiveStatusPolicy::defaults()),
            Err(err) => panic!("default policy should validate: {err}"),
        }
    }

    #[test]
    fn missing_input_maps_to_exit_code_two() {
        let missing = anyhow::Error::from(LedgerError::MissingInput(PathBuf::from("x.csv")))
            .context("cleanup failed");
        assert_eq!(exit_code_for(&missing), ExitCode::from(2));
        let other = anyhow::Error::from(LedgerError::Validation("bad".to_string()));
        assert_eq!(exit_code_for(&other), ExitCode::FAILURE);
    }
}
