use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use crate::evidence::GitEvidence;
use crate::files::LedgerFile;
use crate::fix_log::FixLogEntry;
use crate::integrity::IntegrityReport;
use crate::materialize::{materialize_latest, LatestState};
use crate::normalize::NormalizedRow;
use crate::partition::ActiveStatusPolicy;
use crate::row::LedgerRow;

/// Teams whose outgoing handoffs mark a pipeline stage as done.
pub const DEFAULT_STAGE_TEAMS: [&str; 7] =
    ["blue", "red", "green", "black", "white", "grey", "qa_fixer"];

/// Latest-state projections of the four team-ops ledgers.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentViews<'a> {
    pub runs: LatestState<'a, NormalizedRow>,
    pub change_requests: LatestState<'a, NormalizedRow>,
    pub handoffs: LatestState<'a, NormalizedRow>,
    pub decisions: LatestState<'a, NormalizedRow>,
}

impl<'a> CurrentViews<'a> {
    #[must_use]
    pub fn materialize(
        runs: &'a [NormalizedRow],
        change_requests: &'a [NormalizedRow],
        handoffs: &'a [NormalizedRow],
        decisions: &'a [NormalizedRow],
    ) -> Self {
        Self {
            runs: materialize_latest(runs, LedgerFile::RunRegistry.id_field()),
            change_requests: materialize_latest(
                change_requests,
                LedgerFile::ChangeRequestQueue.id_field(),
            ),
            handoffs: materialize_latest(handoffs, LedgerFile::HandoffLog.id_field()),
            decisions: materialize_latest(decisions, LedgerFile::DecisionLog.id_field()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total_runs: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub active_runs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockingFlagEntry {
    pub run_id: String,
    pub entry_id: String,
    pub from_team: String,
    pub to_team: String,
    pub flags: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IntegrityOverview {
    pub issue_count: usize,
    pub severity_counts: BTreeMap<String, usize>,
    pub integrity_ok: bool,
}

impl IntegrityOverview {
    #[must_use]
    pub fn from_report(report: &IntegrityReport) -> Self {
        Self {
            issue_count: report.issue_count(),
            severity_counts: report.severity_counts(),
            integrity_ok: report.is_ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordSummary {
    pub run_summary: RunSummary,
    pub stage_completion_map: BTreeMap<String, BTreeMap<String, bool>>,
    pub open_p1_by_assignee: BTreeMap<String, Vec<String>>,
    pub active_blocking_flags: Vec<BlockingFlagEntry>,
    pub integrity_overview: IntegrityOverview,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecutionDerived {
    pub qa_fixer_files_changed_unique: Vec<String>,
    pub qa_fixer_request_ids: Vec<String>,
}

/// Evidence of what was actually changed: the QA fix log plus git history.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecutionChanges {
    pub qa_fixer_log_entries: Vec<FixLogEntry>,
    pub git: GitEvidence,
    pub derived: ExecutionDerived,
}

impl ExecutionChanges {
    #[must_use]
    pub fn new(qa_fixer_log_entries: Vec<FixLogEntry>, git: GitEvidence) -> Self {
        let derived = ExecutionDerived {
            qa_fixer_files_changed_unique: unique_sorted(
                qa_fixer_log_entries
                    .iter()
                    .flat_map(|entry| entry.files_changed.iter()),
            ),
            qa_fixer_request_ids: unique_sorted(
                qa_fixer_log_entries
                    .iter()
                    .flat_map(|entry| entry.request_ids_implemented.iter()),
            ),
        };

        Self {
            qa_fixer_log_entries,
            git,
            derived,
        }
    }
}

fn unique_sorted<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    items
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Derives the record summary from current views and the full handoff
/// stream. Stage completion looks at every handoff event, not only the
/// latest row per entry.
#[must_use]
pub fn build_summary(
    current: &CurrentViews<'_>,
    handoff_events: &[NormalizedRow],
    report: &IntegrityReport,
    policy: &ActiveStatusPolicy,
    stage_teams: &[String],
) -> RecordSummary {
    let mut status_counts = BTreeMap::new();
    let mut active_runs = Vec::new();
    for (run_id, row) in &current.runs {
        let status = row.value("status");
        let label = if status.is_empty() { "unknown" } else { status };
        *status_counts.entry(label.to_string()).or_insert(0) += 1;
        if policy.is_active_run_status(status) {
            active_runs.push(run_id.clone());
        }
    }

    let stage_completion_map = current
        .runs
        .keys()
        .map(|run_id| {
            let mut completion: BTreeMap<String, bool> =
                stage_teams.iter().map(|team| (team.clone(), false)).collect();
            let run_handoffs = handoff_events
                .iter()
                .filter(|row| row.value("run_id") == run_id.as_str());
            for handoff in run_handoffs {
                if let Some(done) = completion.get_mut(handoff.value("from_team")) {
                    *done = true;
                }
            }
            (run_id.clone(), completion)
        })
        .collect();

    let mut open_p1_by_assignee: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (request_id, row) in &current.change_requests {
        let is_p1 = row.value("priority").eq_ignore_ascii_case("p1");
        if is_p1 && policy.is_active_request_status(row.value("status")) {
            let assignee = match row.value("assignee") {
                "" => "unassigned",
                name => name,
            };
            open_p1_by_assignee
                .entry(assignee.to_string())
                .or_default()
                .push(request_id.clone());
        }
    }

    let active_blocking_flags = current
        .handoffs
        .values()
        .filter_map(|row| {
            let flags = row.list("blocking_flags")?;
            if flags.is_empty() {
                return None;
            }
            Some(BlockingFlagEntry {
                run_id: row.value("run_id").to_string(),
                entry_id: row.value("entry_id").to_string(),
                from_team: row.value("from_team").to_string(),
                to_team: row.value("to_team").to_string(),
                flags: flags.clone(),
            })
        })
        .collect();

    RecordSummary {
        run_summary: RunSummary {
            total_runs: current.runs.len(),
            status_counts,
            active_runs,
        },
        stage_completion_map,
        open_p1_by_assignee,
        active_blocking_flags,
        integrity_overview: IntegrityOverview::from_report(report),
    }
}

fn inline_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Human-readable companion to the JSON record.
#[must_use]
pub fn render_markdown_summary(
    summary: &RecordSummary,
    generated_utc: &str,
    execution: &ExecutionChanges,
) -> String {
    let mut out = String::new();
    let runs = &summary.run_summary;
    let active = if runs.active_runs.is_empty() {
        "none".to_string()
    } else {
        runs.active_runs.join(", ")
    };

    let _ = writeln!(out, "# Oracle Record Summary\n");
    let _ = writeln!(out, "Generated UTC: {generated_utc}\n");
    let _ = writeln!(out, "## Run Summary");
    let _ = writeln!(out, "- Total runs: {}", runs.total_runs);
    let _ = writeln!(out, "- Status counts: {}", inline_json(&runs.status_counts));
    let _ = writeln!(out, "- Active runs: {active}\n");

    let _ = writeln!(out, "## Stage Completion");
    for (run_id, stages) in &summary.stage_completion_map {
        let _ = writeln!(out, "- {run_id}: {}", inline_json(stages));
    }

    let _ = writeln!(out, "\n## Open P1 By Assignee");
    if summary.open_p1_by_assignee.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for (assignee, ids) in &summary.open_p1_by_assignee {
        let mut ids = ids.clone();
        ids.sort();
        let _ = writeln!(out, "- {assignee}: {}", ids.join(", "));
    }

    let _ = writeln!(out, "\n## Active Blocking Flags");
    if summary.active_blocking_flags.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for item in &summary.active_blocking_flags {
        let _ = writeln!(
            out,
            "- run={} entry={} {}->{} flags={}",
            item.run_id,
            item.entry_id,
            item.from_team,
            item.to_team,
            inline_json(&item.flags)
        );
    }

    let integrity = &summary.integrity_overview;
    let _ = writeln!(out, "\n## Integrity Overview");
    let _ = writeln!(out, "- issue_count: {}", integrity.issue_count);
    let _ = writeln!(out, "- severity_counts: {}", inline_json(&integrity.severity_counts));

    let git = &execution.git;
    let _ = writeln!(out, "\n## Implementation Change Evidence");
    let _ = writeln!(out, "- qa_fixer_entries: {}", execution.qa_fixer_log_entries.len());
    let _ = writeln!(
        out,
        "- qa_fixer_files_changed_unique: {}",
        execution.derived.qa_fixer_files_changed_unique.len()
    );
    let _ = writeln!(out, "- git_available: {}", git.git_available);
    let _ = writeln!(out, "- git_commit_count: {}", git.commit_history.len());
    let _ = writeln!(out, "- worktree_changed_files: {}", git.worktree_changed_files.len());
    let _ = writeln!(out, "- worktree_untracked_files: {}", git.worktree_untracked_files.len());

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_rows, DEFAULT_JSON_LIST_FIELDS};
    use crate::row::EventRow;

    fn normalize(file: LedgerFile, rows: Vec<EventRow>) -> Vec<NormalizedRow> {
        let fields = DEFAULT_JSON_LIST_FIELDS
            .iter()
            .map(|name| (*name).to_string())
            .collect();
        normalize_rows(
            &format!("data/team_ops/{}", file.file_name()),
            &rows,
            &fields,
            &mut IntegrityReport::new(),
        )
    }

    fn stage_teams() -> Vec<String> {
        DEFAULT_STAGE_TEAMS.iter().map(|team| (*team).to_string()).collect()
    }

    struct Fixture {
        runs: Vec<NormalizedRow>,
        requests: Vec<NormalizedRow>,
        handoffs: Vec<NormalizedRow>,
        decisions: Vec<NormalizedRow>,
    }

    fn fixture() -> Fixture {
        Fixture {
            runs: normalize(
                LedgerFile::RunRegistry,
                vec![
                    EventRow::from_pairs(1, [("run_id", "R1"), ("status", "active")]),
                    EventRow::from_pairs(2, [("run_id", "R2"), ("status", "complete")]),
                    EventRow::from_pairs(3, [("run_id", "R3"), ("status", "")]),
                ],
            ),
            requests: normalize(
                LedgerFile::ChangeRequestQueue,
                vec![
                    EventRow::from_pairs(
                        1,
                        [("request_id", "CR-1"), ("status", "open"), ("priority", "p1"), ("assignee", "")],
                    ),
                    EventRow::from_pairs(
                        2,
                        [("request_id", "CR-2"), ("status", "Open"), ("priority", "P1"), ("assignee", "red")],
                    ),
                    EventRow::from_pairs(
                        3,
                        [("request_id", "CR-3"), ("status", "done"), ("priority", "P1"), ("assignee", "red")],
                    ),
                ],
            ),
            handoffs: normalize(
                LedgerFile::HandoffLog,
                vec![
                    EventRow::from_pairs(
                        1,
                        [("entry_id", "H-1"), ("run_id", "R1"), ("from_team", "blue"), ("to_team", "red"), ("blocking_flags", "[\"missing brief\"]")],
                    ),
                    EventRow::from_pairs(
                        2,
                        [("entry_id", "H-1"), ("run_id", "R1"), ("from_team", "blue"), ("to_team", "red"), ("blocking_flags", "[]")],
                    ),
                    EventRow::from_pairs(
                        3,
                        [("entry_id", "H-2"), ("run_id", "R1"), ("from_team", "red"), ("to_team", "green"), ("blocking_flags", "[\"legal\"]")],
                    ),
                ],
            ),
            decisions: Vec::new(),
        }
    }

    #[test]
    fn summary_counts_runs_stages_and_p1_requests() {
        let data = fixture();
        let current =
            CurrentViews::materialize(&data.runs, &data.requests, &data.handoffs, &data.decisions);

        let summary = build_summary(
            &current,
            &data.handoffs,
            &IntegrityReport::new(),
            &ActiveStatusPolicy::defaults(),
            &stage_teams(),
        );

        assert_eq!(summary.run_summary.total_runs, 3);
        assert_eq!(summary.run_summary.status_counts.get("unknown"), Some(&1));
        assert_eq!(summary.run_summary.active_runs, vec!["R1"]);

        let r1 = &summary.stage_completion_map["R1"];
        assert_eq!(r1.get("blue"), Some(&true));
        assert_eq!(r1.get("red"), Some(&true));
        assert_eq!(r1.get("qa_fixer"), Some(&false));
        assert!(summary.stage_completion_map["R2"].values().all(|done| !done));

        assert_eq!(summary.open_p1_by_assignee["unassigned"], vec!["CR-1"]);
        assert_eq!(summary.open_p1_by_assignee["red"], vec!["CR-2"]);

        assert_eq!(summary.active_blocking_flags.len(), 1);
        assert_eq!(summary.active_blocking_flags[0].entry_id, "H-2");
        assert!(summary.integrity_overview.integrity_ok);
    }

    #[test]
    fn markdown_lists_sections_and_placeholders() {
        let data = fixture();
        let current =
            CurrentViews::materialize(&data.runs, &[], &data.handoffs, &data.decisions);
        let summary = build_summary(
            &current,
            &data.handoffs,
            &IntegrityReport::new(),
            &ActiveStatusPolicy::defaults(),
            &stage_teams(),
        );
        let execution = ExecutionChanges::new(
            vec![
                FixLogEntry {
                    files_changed: vec!["b.md".to_string(), " a.md ".to_string()],
                    ..FixLogEntry::default()
                },
                FixLogEntry {
                    files_changed: vec!["a.md".to_string(), String::new()],
                    ..FixLogEntry::default()
                },
            ],
            GitEvidence::default(),
        );

        let markdown = render_markdown_summary(&summary, "2025-01-01T00:00:00Z", &execution);

        assert!(markdown.starts_with("# Oracle Record Summary\n"));
        assert!(markdown.contains("- Active runs: R1\n"));
        assert!(markdown.contains("## Open P1 By Assignee\n- none\n"));
        assert!(markdown.contains("- run=R1 entry=H-2 red->green flags=[\"legal\"]"));
        assert!(markdown.contains("- qa_fixer_files_changed_unique: 2\n"));
        assert!(markdown.contains("- git_available: false\n"));
        assert_eq!(
            execution.derived.qa_fixer_files_changed_unique,
            vec!["a.md", "b.md"]
        );
    }
}
