use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use teamops_ledger_core::{
    format_compact_stamp, format_rfc3339, now_utc, plan_cleanup, ActiveStatusPolicy, CleanupPlan,
    CleanupSummary, EventTable, LedgerError, LedgerFile, ARCHIVE_INDEX_FIELDS,
};
use ulid::Ulid;

use crate::csv_io::{read_optional_table, write_rows, write_table_atomic};
use crate::layout::unique_dir;
use crate::LedgerStore;

/// Outcome of one cleanup run. The same document is written as the archive
/// `manifest.json` and printed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    #[serde(flatten)]
    pub summary: CleanupSummary,
    pub archive_dir: Option<String>,
    pub backup_files: Vec<String>,
    pub archived_files: Vec<String>,
}

impl LedgerStore {
    /// Splits the live ledgers into keep and archive sets and, unless
    /// `dry_run`, applies the split.
    ///
    /// All inputs are read and the archive index header is checked before
    /// anything is written, so a failing run leaves the repository as it
    /// found it.
    pub fn cleanup(&self, policy: &ActiveStatusPolicy, dry_run: bool) -> Result<CleanupReport> {
        policy.validate()?;
        let tables = self.read_ledgers()?;
        let index = self.read_archive_index()?;

        let plan = plan_cleanup(&tables, policy);
        let now = now_utc();
        let summary = plan.summary(policy, Ulid::new(), format_rfc3339(now)?, dry_run);

        if dry_run {
            tracing::info!(
                operation_id = %summary.operation_id,
                archived = plan.archived_total(),
                "cleanup dry run computed plan"
            );
            return Ok(CleanupReport {
                summary,
                archive_dir: None,
                backup_files: Vec::new(),
                archived_files: Vec::new(),
            });
        }

        let archive_root = self.layout().archive_root();
        let archive_dir = unique_dir(&archive_root, &format_compact_stamp(now)?);
        let mut report = CleanupReport {
            archive_dir: Some(self.layout().relative(&archive_dir)),
            backup_files: self.backup_ledgers(&archive_dir.join("backup"))?,
            archived_files: Vec::new(),
            summary,
        };

        for file in LedgerFile::ALL {
            let table = tables.get(file);
            let split = plan.split(file);
            write_table_atomic(
                &self.layout().ledger_path(file),
                &table.with_rows(split.keep.clone()),
            )?;
            if !split.archive.is_empty() {
                let target = archive_dir.join("archived_rows").join(file.file_name());
                write_rows(&target, table, &split.archive)?;
                report.archived_files.push(self.layout().relative(&target));
            }
        }

        let manifest_path = archive_dir.join("manifest.json");
        let manifest =
            serde_json::to_string_pretty(&report).context("failed to encode archive manifest")?;
        fs::write(&manifest_path, manifest + "\n")
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;

        self.append_archive_index(index, &report, &plan)?;

        tracing::info!(
            operation_id = %report.summary.operation_id,
            archive_dir = report.archive_dir.as_deref().unwrap_or_default(),
            archived = plan.archived_total(),
            "cleanup archived rows"
        );
        Ok(report)
    }

    fn read_archive_index(&self) -> Result<EventTable> {
        let path = self.layout().archive_index_path();
        let index = read_optional_table(&path)?;
        if index.header.is_empty() {
            return Ok(EventTable::new(
                ARCHIVE_INDEX_FIELDS.iter().map(|name| (*name).to_string()).collect(),
            ));
        }
        if index.header != ARCHIVE_INDEX_FIELDS {
            return Err(LedgerError::Structure(format!(
                "{} has header [{}], expected [{}]",
                path.display(),
                index.header.join(","),
                ARCHIVE_INDEX_FIELDS.join(",")
            ))
            .into());
        }
        Ok(index)
    }

    fn backup_ledgers(&self, backup_dir: &Path) -> Result<Vec<String>> {
        fs::create_dir_all(backup_dir)
            .with_context(|| format!("failed to create {}", backup_dir.display()))?;
        let mut copied = Vec::new();
        for file in LedgerFile::ALL {
            let source = self.layout().ledger_path(file);
            let target = backup_dir.join(file.file_name());
            fs::copy(&source, &target).with_context(|| {
                format!("failed to back up {} to {}", source.display(), target.display())
            })?;
            copied.push(self.layout().relative(&target));
        }
        Ok(copied)
    }

    fn append_archive_index(
        &self,
        mut index: EventTable,
        report: &CleanupReport,
        plan: &CleanupPlan,
    ) -> Result<()> {
        let mut cells = vec![
            ("timestamp_utc".to_string(), report.summary.timestamp_utc.clone()),
            (
                "archive_dir".to_string(),
                report.archive_dir.clone().unwrap_or_default(),
            ),
            (
                "active_run_ids".to_string(),
                report.summary.active_run_ids.join(";"),
            ),
        ];
        for file in LedgerFile::ALL {
            cells.push((
                file.archive_index_column().to_string(),
                plan.split(file).archive.len().to_string(),
            ));
        }
        index.push(cells);
        write_table_atomic(&self.layout().archive_index_path(), &index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{must, read_file, seed_ledgers, temp_root, write_file};
    use teamops_ledger_core::LedgerRow;

    fn ids(table: &EventTable, field: &str) -> Vec<String> {
        table.rows.iter().map(|row| row.value(field).to_string()).collect()
    }

    #[test]
    fn cleanup_archives_inactive_runs_and_superseded_requests() {
        let root = temp_root("cleanup");
        seed_ledgers(&root);
        let store = must(LedgerStore::open(&root));
        let before = must(store.read_ledgers());
        let plan = plan_cleanup(&before, &ActiveStatusPolicy::defaults());

        let report = must(store.cleanup(&ActiveStatusPolicy::defaults(), false));

        assert_eq!(report.summary.active_run_ids, vec!["R1"]);
        let after = must(store.read_ledgers());
        for file in LedgerFile::ALL {
            let live: Vec<Vec<String>> = after
                .get(file)
                .rows
                .iter()
                .map(|row| after.get(file).record_for(row))
                .collect();
            let kept: Vec<Vec<String>> = plan
                .split(file)
                .keep
                .iter()
                .map(|row| before.get(file).record_for(row))
                .collect();
            assert_eq!(live, kept, "{} live rows differ from the keep set", file.file_name());
        }
        assert_eq!(ids(&after.run_registry, "status"), vec!["active"]);
        assert_eq!(ids(&after.change_requests, "request_id"), vec!["CR-2"]);
        assert_eq!(ids(&after.handoffs, "entry_id"), vec!["H-1"]);
        assert_eq!(ids(&after.decisions, "decision_id"), vec!["D-1"]);
        assert_eq!(after.change_requests.header, before.change_requests.header);

        let archive_dir = match &report.archive_dir {
            Some(dir) => dir.clone(),
            None => panic!("expected archive dir"),
        };
        assert_eq!(report.backup_files.len(), 4);
        let archived = must(read_required(
            &root,
            &format!("{archive_dir}/archived_rows/change_request_queue.csv"),
        ));
        assert_eq!(ids(&archived, "request_id"), vec!["CR-1", "CR-3"]);

        let manifest_text = read_file(&root, &format!("{archive_dir}/manifest.json"));
        let manifest: serde_json::Value =
            must(serde_json::from_str(&manifest_text).map_err(anyhow::Error::from));
        assert_eq!(manifest["counts"]["run_registry.csv"]["archive"], serde_json::json!(3));
        assert_eq!(manifest["dry_run"], serde_json::json!(false));

        let index = read_file(&root, "data/team_ops/archive/archive_index.csv");
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines[0], ARCHIVE_INDEX_FIELDS.join(","));
        assert!(lines[1].ends_with(",R1,3,2,1,1"));
    }

    fn read_required(root: &Path, relative: &str) -> Result<EventTable> {
        crate::csv_io::read_required_table(&root.join(relative))
    }

    #[test]
    fn backup_matches_pre_cleanup_bytes() {
        let root = temp_root("backup");
        seed_ledgers(&root);
        let original = read_file(&root, "data/team_ops/handoff_log.csv");
        let store = must(LedgerStore::open(&root));

        let report = must(store.cleanup(&ActiveStatusPolicy::defaults(), false));

        let backup = report
            .backup_files
            .iter()
            .find(|path| path.ends_with("handoff_log.csv"))
            .cloned()
            .unwrap_or_default();
        assert_eq!(read_file(&root, &backup), original);
    }

    #[test]
    fn second_cleanup_archives_nothing_and_keeps_files() {
        let root = temp_root("idempotent");
        seed_ledgers(&root);
        let store = must(LedgerStore::open(&root));
        must(store.cleanup(&ActiveStatusPolicy::defaults(), false));
        let after_first = must(store.read_ledgers());

        let second = must(store.cleanup(&ActiveStatusPolicy::defaults(), false));

        assert_eq!(must(store.read_ledgers()), after_first);
        assert!(second.archived_files.is_empty());
        assert!(second.summary.counts.values().all(|counts| counts.archive == 0));
        assert_ne!(second.archive_dir, None);
        let index = read_file(&root, "data/team_ops/archive/archive_index.csv");
        assert_eq!(index.lines().count(), 3);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let root = temp_root("dry-run");
        seed_ledgers(&root);
        let original = read_file(&root, "data/team_ops/run_registry.csv");
        let store = must(LedgerStore::open(&root));

        let report = must(store.cleanup(&ActiveStatusPolicy::defaults(), true));

        assert!(report.summary.dry_run);
        assert_eq!(report.summary.counts["run_registry.csv"].archive, 3);
        assert_eq!(read_file(&root, "data/team_ops/run_registry.csv"), original);
        assert!(!root.join("data/team_ops/archive").exists());
    }

    #[test]
    fn mismatched_index_header_aborts_before_writes() {
        let root = temp_root("index-header");
        seed_ledgers(&root);
        write_file(&root, "data/team_ops/archive/archive_index.csv", "when,where\n");
        let original = read_file(&root, "data/team_ops/run_registry.csv");
        let store = must(LedgerStore::open(&root));

        let err = match store.cleanup(&ActiveStatusPolicy::defaults(), false) {
            Ok(_) => panic!("expected structure error"),
            Err(err) => err,
        };

        assert!(matches!(err.downcast_ref::<LedgerError>(), Some(LedgerError::Structure(_))));
        assert_eq!(read_file(&root, "data/team_ops/run_registry.csv"), original);
    }

    #[test]
    fn keep_run_history_keeps_every_active_run_row() {
        let root = temp_root("history");
        seed_ledgers(&root);
        let store = must(LedgerStore::open(&root));
        let policy = must(
            ActiveStatusPolicy::from_lists(None, None, true).map_err(anyhow::Error::from),
        );

        must(store.cleanup(&policy, false));

        let after = must(store.read_ledgers());
        assert_eq!(ids(&after.run_registry, "status"), vec!["initialized", "active"]);
    }
}
