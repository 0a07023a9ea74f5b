use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use teamops_ledger_core::{
    build_summary, check_duplicate_ids, check_supersedes_chain, format_compact_stamp,
    format_rfc3339, normalize_rows, now_utc, parse_fix_log, parse_git_log, parse_porcelain_status,
    render_markdown_summary, ActiveStatusPolicy, CurrentViews, ExecutionChanges, GitEvidence,
    IntegrityIssue, IntegrityReport, LedgerError, LedgerFile, NormalizedRow, RecordSummary,
    COMMIT_MARKER, DEFAULT_JSON_LIST_FIELDS, DEFAULT_STAGE_TEAMS,
};
use time::OffsetDateTime;
use ulid::Ulid;
use walkdir::WalkDir;

use crate::csv_io::read_optional_table;
use crate::layout::{unique_dir, LedgerLayout};
use crate::LedgerStore;

const RECORD_TYPE: &str = "oracle_team_history_export";
const RECORD_FILE: &str = "oracle_record.json";
const SUMMARY_FILE: &str = "oracle_record.md";
const MANIFEST_FILE: &str = "manifest.json";
const CHECKSUM_FILE: &str = "oracle_record.sha256";

const DEFAULT_INCLUDE_GLOBS: [&str; 11] = [
    "teams/**/*.md",
    "pipeline/**/*.md",
    "data/team_ops/**/*.csv",
    "data/team_ops/**/*.json",
    "planning/reports/TEAM_LEAD*.md",
    "planning/reports/HARDENING_CONTROL_MATRIX_*.md",
    "planning/invariants/**/*.md",
    "planning/invariants/**/*.csv",
    "planning/RAPID_REVIEW_CELL/**/*.md",
    "planning/RAPID_REVIEW_CELL/**/*.csv",
    "AGENTS.md",
];

const DEFAULT_EVENT_CSV_FILES: [&str; 7] = [
    "data/team_ops/run_registry.csv",
    "data/team_ops/change_request_queue.csv",
    "data/team_ops/handoff_log.csv",
    "data/team_ops/decision_log.csv",
    "data/team_ops/team_registry.csv",
    "data/team_ops/qa_edit_authority.csv",
    "data/team_ops/archive/archive_index.csv",
];

const DEFAULT_FIX_LOG: &str = "pipeline/07_qa_fix_log.md";

const SKIPPED_DIRS: [&str; 2] = [".git", "target"];

/// What an export covers. Defaults describe the standard team-ops layout;
/// a JSON document can override any subset of fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExportScope {
    pub description: String,
    pub include_globs: Vec<String>,
    pub event_csv_files: Vec<String>,
    pub json_list_fields: BTreeSet<String>,
    pub stage_teams: Vec<String>,
    pub fix_log: String,
}

impl Default for ExportScope {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ExportScope {
    #[must_use]
    pub fn defaults() -> Self {
        let owned = |items: &[&str]| items.iter().map(|item| (*item).to_string()).collect();
        Self {
            description: "Comprehensive machine-readable record of teams work since inception"
                .to_string(),
            include_globs: owned(&DEFAULT_INCLUDE_GLOBS),
            event_csv_files: owned(&DEFAULT_EVENT_CSV_FILES),
            json_list_fields: DEFAULT_JSON_LIST_FIELDS
                .iter()
                .map(|field| (*field).to_string())
                .collect(),
            stage_teams: owned(&DEFAULT_STAGE_TEAMS),
            fix_log: DEFAULT_FIX_LOG.to_string(),
        }
    }

    /// Parses and validates a scope override.
    ///
    /// # Errors
    /// Returns [`LedgerError::Configuration`] for malformed JSON, unknown
    /// fields, or a scope that fails [`ExportScope::validate`].
    pub fn from_json(raw: &str) -> Result<Self, LedgerError> {
        let scope: Self = serde_json::from_str(raw)
            .map_err(|err| LedgerError::Configuration(format!("invalid export scope: {err}")))?;
        scope.validate()?;
        Ok(scope)
    }

    /// # Errors
    /// Returns [`LedgerError::Configuration`] when a list is empty, a glob
    /// does not compile, or a path escapes the repository root.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.include_globs.is_empty() {
            return Err(LedgerError::Configuration(
                "include_globs MUST contain at least one pattern".to_string(),
            ));
        }
        if self.stage_teams.is_empty() {
            return Err(LedgerError::Configuration(
                "stage_teams MUST contain at least one team".to_string(),
            ));
        }
        for path in self.event_csv_files.iter().chain(std::iter::once(&self.fix_log)) {
            if !is_repo_relative(path) {
                return Err(LedgerError::Configuration(format!(
                    "path '{path}' must be relative to the repository root"
                )));
            }
        }
        self.glob_set().map(|_| ())
    }

    fn glob_set(&self) -> Result<GlobSet, LedgerError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.include_globs {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|err| {
                    LedgerError::Configuration(format!("invalid include glob '{pattern}': {err}"))
                })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|err| LedgerError::Configuration(format!("invalid include globs: {err}")))
    }
}

fn is_repo_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|part| part != "..")
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub strict: bool,
    pub collect_git: bool,
    pub policy: ActiveStatusPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            strict: false,
            collect_git: true,
            policy: ActiveStatusPolicy::defaults(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryEntry {
    pub path: String,
    pub size_bytes: u64,
    pub mtime_utc: String,
    pub sha256: String,
}

/// What the CLI prints after an export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportReport {
    pub export_dir: String,
    pub record: String,
    pub summary_md: String,
    pub manifest: String,
    pub checksum: String,
    pub included_file_count: usize,
    pub integrity_ok: bool,
    pub issue_count: usize,
    pub strict_failed: bool,
}

#[derive(Serialize)]
struct ScopeSection<'a> {
    description: &'a str,
    included_globs: &'a [String],
    event_csv_files: &'a [String],
}

#[derive(Serialize)]
struct IntegritySection<'a> {
    strict_mode: bool,
    issue_count: usize,
    issues: &'a [IntegrityIssue],
    integrity_ok: bool,
}

#[derive(Serialize)]
struct OracleRecord<'a> {
    record_type: &'static str,
    generated_utc: &'a str,
    repo_root: String,
    scope: ScopeSection<'a>,
    integrity: IntegritySection<'a>,
    summary: &'a RecordSummary,
    execution_changes: &'a ExecutionChanges,
    events: BTreeMap<&'a str, &'a [NormalizedRow]>,
    current: &'a CurrentViews<'a>,
    inventory: Vec<&'a InventoryEntry>,
    files: BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct ExportManifest<'a> {
    operation_id: Ulid,
    generated_utc: &'a str,
    record_path: String,
    summary_path: String,
    record_sha256: String,
    summary_sha256: String,
    included_file_count: usize,
    inventory_entries: usize,
    integrity_ok: bool,
    issue_count: usize,
}

struct InventoryFile {
    entry: InventoryEntry,
    content: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

fn mtime_utc(meta: &fs::Metadata) -> Result<String> {
    let modified = meta.modified().context("file modification time unavailable")?;
    Ok(format_rfc3339(OffsetDateTime::from(modified))?)
}

fn gather_inventory(layout: &LedgerLayout, globs: &GlobSet) -> Result<Vec<InventoryFile>> {
    let mut found = BTreeMap::new();
    let walker = WalkDir::new(layout.root())
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.context("failed to walk repository")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = layout.relative(entry.path());
        if globs.is_match(&relative) {
            found.insert(relative, entry.into_path());
        }
    }

    let mut files = Vec::with_capacity(found.len());
    for (relative, path) in found {
        let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let meta = fs::metadata(&path).with_context(|| format!("failed to stat {}", path.display()))?;
        files.push(InventoryFile {
            entry: InventoryEntry {
                path: relative,
                size_bytes: meta.len(),
                mtime_utc: mtime_utc(&meta)?,
                sha256: sha256_hex(&bytes),
            },
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    tracing::debug!(files = files.len(), "collected export inventory");
    Ok(files)
}

fn run_git(root: &Path, args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).current_dir(root).output() {
        Ok(output) => output,
        Err(err) => {
            tracing::debug!(error = %err, "failed to spawn git");
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!(
            args = ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git command failed"
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Collects branch, history and worktree status for `root`. Any git failure
/// degrades to `git_available = false` with empty fields.
#[must_use]
pub fn collect_git_evidence(root: &Path) -> GitEvidence {
    let mut evidence = GitEvidence::default();
    let inside = run_git(root, &["rev-parse", "--is-inside-work-tree"]);
    if inside.as_deref().map(str::trim) != Some("true") {
        tracing::warn!(root = %root.display(), "git unavailable; exporting without git evidence");
        return evidence;
    }
    evidence.git_available = true;

    if let Some(branch) = run_git(root, &["branch", "--show-current"]) {
        evidence.branch = branch.trim().to_string();
    }

    let pretty = format!("--pretty=format:{COMMIT_MARKER}%H|%ad|%an|%s");
    if let Some(log) = run_git(root, &["log", "--date=iso-strict", "--name-status", &pretty]) {
        evidence.commit_history = parse_git_log(&log);
    }

    if let Some(status) = run_git(root, &["status", "--porcelain", "-uall"]) {
        let status = parse_porcelain_status(&status);
        evidence.worktree_status_porcelain = status.lines;
        evidence.worktree_changed_files = status.changed;
        evidence.worktree_untracked_files = status.untracked;
    }
    evidence
}

fn rows_for<'e>(events: &'e [(&str, Vec<NormalizedRow>)], file: LedgerFile) -> &'e [NormalizedRow] {
    let key = LedgerLayout::ledger_key(file);
    events
        .iter()
        .find(|(file_key, _)| *file_key == key)
        .map(|(_, rows)| rows.as_slice())
        .unwrap_or_default()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

impl LedgerStore {
    /// Builds a self-contained snapshot of the repository's team history
    /// under `exports/oracle_record_<stamp>/`.
    ///
    /// Integrity issues never abort an export; with `options.strict` they
    /// only set [`ExportReport::strict_failed`].
    pub fn export(&self, scope: &ExportScope, options: &ExportOptions) -> Result<ExportReport> {
        scope.validate()?;
        options.policy.validate()?;
        let layout = self.layout();

        let now = now_utc();
        let generated_utc = format_rfc3339(now)?;
        let inventory = gather_inventory(layout, &scope.glob_set()?)?;

        let mut report = IntegrityReport::new();
        let mut events: Vec<(&str, Vec<NormalizedRow>)> = Vec::new();
        for file_key in &scope.event_csv_files {
            let table = read_optional_table(&layout.resolve(file_key))?;
            let rows = normalize_rows(file_key, &table.rows, &scope.json_list_fields, &mut report);
            events.push((file_key.as_str(), rows));
        }

        let ledger_rows = |file: LedgerFile| rows_for(&events, file);

        for file in LedgerFile::ALL.into_iter().filter(|file| file.requires_unique_ids()) {
            let key = LedgerLayout::ledger_key(file);
            report.extend(check_duplicate_ids(&key, ledger_rows(file), file.id_field()));
        }
        for file in LedgerFile::ALL {
            let key = LedgerLayout::ledger_key(file);
            report.extend(check_supersedes_chain(
                &key,
                ledger_rows(file),
                file.id_field(),
                file.supersedes_field(),
            ));
        }

        let current = CurrentViews::materialize(
            ledger_rows(LedgerFile::RunRegistry),
            ledger_rows(LedgerFile::ChangeRequestQueue),
            ledger_rows(LedgerFile::HandoffLog),
            ledger_rows(LedgerFile::DecisionLog),
        );
        let summary = build_summary(
            &current,
            ledger_rows(LedgerFile::HandoffLog),
            &report,
            &options.policy,
            &scope.stage_teams,
        );

        let fix_log_path = layout.resolve(&scope.fix_log);
        let fix_log_entries = if fix_log_path.is_file() {
            let text = fs::read_to_string(&fix_log_path)
                .with_context(|| format!("failed to read {}", fix_log_path.display()))?;
            parse_fix_log(&text)
        } else {
            Vec::new()
        };
        let git = if options.collect_git {
            collect_git_evidence(layout.root())
        } else {
            GitEvidence::default()
        };
        let execution = ExecutionChanges::new(fix_log_entries, git);

        let record = OracleRecord {
            record_type: RECORD_TYPE,
            generated_utc: &generated_utc,
            repo_root: layout.root().display().to_string(),
            scope: ScopeSection {
                description: &scope.description,
                included_globs: &scope.include_globs,
                event_csv_files: &scope.event_csv_files,
            },
            integrity: IntegritySection {
                strict_mode: options.strict,
                issue_count: report.issue_count(),
                issues: report.issues(),
                integrity_ok: report.is_ok(),
            },
            summary: &summary,
            execution_changes: &execution,
            events: events
                .iter()
                .map(|(file_key, rows)| (*file_key, rows.as_slice()))
                .collect(),
            current: &current,
            inventory: inventory.iter().map(|file| &file.entry).collect(),
            files: inventory
                .iter()
                .map(|file| (file.entry.path.as_str(), file.content.as_str()))
                .collect(),
        };

        let export_dir = unique_dir(
            &layout.exports_dir(),
            &format!("oracle_record_{}", format_compact_stamp(now)?),
        );
        fs::create_dir_all(&export_dir)
            .with_context(|| format!("failed to create {}", export_dir.display()))?;

        let record_path = export_dir.join(RECORD_FILE);
        let record_json =
            serde_json::to_string_pretty(&record).context("failed to encode oracle record")?;
        write_text(&record_path, &(record_json + "\n"))?;

        let summary_path = export_dir.join(SUMMARY_FILE);
        let markdown = render_markdown_summary(&summary, &generated_utc, &execution);
        write_text(&summary_path, &markdown)?;

        let record_sha256 = sha256_file(&record_path)?;
        let manifest = ExportManifest {
            operation_id: Ulid::new(),
            generated_utc: &generated_utc,
            record_path: layout.relative(&record_path),
            summary_path: layout.relative(&summary_path),
            summary_sha256: sha256_file(&summary_path)?,
            record_sha256: record_sha256.clone(),
            included_file_count: inventory.len(),
            inventory_entries: inventory.len(),
            integrity_ok: report.is_ok(),
            issue_count: report.issue_count(),
        };
        let manifest_path = export_dir.join(MANIFEST_FILE);
        let manifest_json =
            serde_json::to_string_pretty(&manifest).context("failed to encode export manifest")?;
        write_text(&manifest_path, &(manifest_json + "\n"))?;

        let checksum_path = export_dir.join(CHECKSUM_FILE);
        write_text(&checksum_path, &format!("{record_sha256}  {RECORD_FILE}\n"))?;

        let strict_failed = options.strict && !report.is_ok();
        if strict_failed {
            tracing::warn!(issues = report.issue_count(), "strict export found integrity issues");
        }
        tracing::info!(
            export_dir = %export_dir.display(),
            files = inventory.len(),
            issues = report.issue_count(),
            "wrote oracle record"
        );

        let display = |path: &PathBuf| path.display().to_string();
        Ok(ExportReport {
            export_dir: display(&export_dir),
            record: display(&record_path),
            summary_md: display(&summary_path),
            manifest: display(&manifest_path),
            checksum: display(&checksum_path),
            included_file_count: inventory.len(),
            integrity_ok: report.is_ok(),
            issue_count: report.issue_count(),
            strict_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{must, read_file, seed_ledgers, temp_root, write_file};
    use serde_json::{json, Value};
    use teamops_ledger_core::IssueCode;

    fn no_git() -> ExportOptions {
        ExportOptions {
            collect_git: false,
            ..ExportOptions::default()
        }
    }

    fn load_json(path: &str) -> Value {
        let text = must(fs::read_to_string(path).map_err(anyhow::Error::from));
        must(serde_json::from_str(&text).map_err(anyhow::Error::from))
    }

    fn seed_repo(label: &str) -> PathBuf {
        let root = temp_root(label);
        seed_ledgers(&root);
        write_file(&root, "teams/blue/brief.md", "# Blue brief\n");
        write_file(&root, "AGENTS.md", "agents\n");
        write_file(&root, "notes/private.md", "not exported\n");
        write_file(
            &root,
            "pipeline/07_qa_fix_log.md",
            "# QA Fix Log\n---\n- run_id: R1\n- files_changed:\n  - teams/blue/brief.md\n  - teams/blue/brief.md\n- request_ids_implemented:\n  - CR-2\n",
        );
        root
    }

    #[test]
    fn default_scope_is_valid() {
        assert_eq!(ExportScope::defaults().validate(), Ok(()));
    }

    #[test]
    fn scope_override_keeps_unspecified_defaults() {
        let scope = must(
            ExportScope::from_json(r#"{"include_globs": ["teams/**/*.md"]}"#)
                .map_err(anyhow::Error::from),
        );
        assert_eq!(scope.include_globs, vec!["teams/**/*.md"]);
        assert_eq!(scope.fix_log, DEFAULT_FIX_LOG);
    }

    #[test]
    fn scope_rejects_unknown_fields_and_escaping_paths() {
        assert!(matches!(
            ExportScope::from_json(r#"{"globs": []}"#),
            Err(LedgerError::Configuration(_))
        ));
        assert!(matches!(
            ExportScope::from_json(r#"{"event_csv_files": ["../outside.csv"]}"#),
            Err(LedgerError::Configuration(_))
        ));
        assert!(matches!(
            ExportScope::from_json(r#"{"include_globs": ["teams/[*.md"]}"#),
            Err(LedgerError::Configuration(_))
        ));
    }

    #[test]
    fn export_writes_record_summary_manifest_and_checksum() {
        let root = seed_repo("export");
        let store = must(LedgerStore::open(&root));

        let report = must(store.export(&ExportScope::defaults(), &no_git()));

        assert!(report.integrity_ok);
        assert!(!report.strict_failed);
        assert_eq!(report.included_file_count, 7);

        let record = load_json(&report.record);
        assert_eq!(record["record_type"], json!(RECORD_TYPE));
        assert_eq!(record["integrity"]["integrity_ok"], json!(true));
        assert_eq!(record["summary"]["run_summary"]["active_runs"], json!(["R1"]));
        assert_eq!(record["current"]["runs"]["R9"]["status"], json!("complete"));
        assert_eq!(
            record["execution_changes"]["derived"]["qa_fixer_files_changed_unique"],
            json!(["teams/blue/brief.md"])
        );
        assert_eq!(record["execution_changes"]["git"]["git_available"], json!(false));
        assert!(record["files"].get("notes/private.md").is_none());
        assert_eq!(record["files"]["AGENTS.md"], json!("agents\n"));
        let handoffs = &record["events"]["data/team_ops/handoff_log.csv"];
        assert_eq!(handoffs[1]["blocking_flags"], json!(["legal"]));
        assert_eq!(handoffs[0]["_row_number"], json!(1));

        let manifest = load_json(&report.manifest);
        let record_hash = must(sha256_file(Path::new(&report.record)));
        assert_eq!(manifest["record_sha256"], json!(record_hash));
        assert_eq!(manifest["issue_count"], json!(0));

        let checksum = must(fs::read_to_string(&report.checksum).map_err(anyhow::Error::from));
        assert_eq!(checksum, format!("{record_hash}  oracle_record.json\n"));

        let markdown = must(fs::read_to_string(&report.summary_md).map_err(anyhow::Error::from));
        assert!(markdown.contains("- red: CR-2"));
    }

    #[test]
    fn malformed_flags_are_reported_and_strict_fails() {
        let root = seed_repo("strict");
        write_file(
            &root,
            "data/team_ops/handoff_log.csv",
            "entry_id,run_id,timestamp_utc,from_team,to_team,blocking_flags\n\
             H-1,R1,2025-01-01T01:00:00Z,blue,red,[oops\n\
             H-1,R1,2025-01-01T02:00:00Z,red,green,[]\n",
        );
        let store = must(LedgerStore::open(&root));
        let options = ExportOptions {
            strict: true,
            ..no_git()
        };

        let report = must(store.export(&ExportScope::defaults(), &options));

        assert!(report.strict_failed);
        assert_eq!(report.issue_count, 2);
        let record = load_json(&report.record);
        let codes: Vec<&str> = record["integrity"]["issues"]
            .as_array()
            .map(|issues| issues.iter().filter_map(|issue| issue["code"].as_str()).collect())
            .unwrap_or_default();
        assert!(codes.contains(&IssueCode::JsonFieldInvalid.as_str()));
        assert!(codes.contains(&IssueCode::DuplicateId.as_str()));
        let first = &record["events"]["data/team_ops/handoff_log.csv"][0];
        assert_eq!(first["blocking_flags_raw"], json!("[oops"));
    }

    #[test]
    fn two_exports_in_one_second_get_distinct_dirs() {
        let root = seed_repo("distinct");
        let store = must(LedgerStore::open(&root));

        let first = must(store.export(&ExportScope::defaults(), &no_git()));
        let second = must(store.export(&ExportScope::defaults(), &no_git()));

        assert_ne!(first.export_dir, second.export_dir);
        assert!(Path::new(&first.record).is_file());
        let checksum = read_file(Path::new(&second.export_dir), "oracle_record.sha256");
        assert!(checksum.ends_with("  oracle_record.json\n"));
    }

    #[test]
    fn git_outside_a_work_tree_degrades_to_empty_evidence() {
        let root = temp_root("no-git");
        let evidence = collect_git_evidence(&root);
        assert_eq!(evidence, GitEvidence::default());
    }
}
