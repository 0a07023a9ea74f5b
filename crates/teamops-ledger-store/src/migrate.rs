use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use teamops_ledger_core::{plan_id_migration, EventTable, LedgerFile, MigrationReason};

use crate::csv_io::{append_rows, read_required_table};
use crate::LedgerStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedRow {
    pub reason: MigrationReason,
    pub row: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub file: String,
    pub dry_run: bool,
    pub canonicalized: usize,
    pub backfilled: usize,
    pub appended: usize,
    pub planned: Vec<PlannedRow>,
}

fn header_ordered(table: &EventTable, cells: Vec<String>) -> Map<String, Value> {
    table
        .header
        .iter()
        .cloned()
        .zip(cells.into_iter().map(Value::String))
        .collect()
}

impl LedgerStore {
    /// Appends canonical-ID rows (and, when asked, lineage backfill rows) to
    /// the change-request queue. Existing rows are left untouched.
    pub fn migrate_ids(&self, dry_run: bool, backfill_duplicate_lineage: bool) -> Result<MigrationReport> {
        let file = LedgerFile::ChangeRequestQueue;
        let path = self.layout().ledger_path(file);
        let queue = read_required_table(&path)?;
        let plan = plan_id_migration(&queue, backfill_duplicate_lineage)?;

        let planned = plan
            .entries()
            .iter()
            .map(|(reason, row)| PlannedRow {
                reason: *reason,
                row: header_ordered(&queue, queue.record_for(row)),
            })
            .collect();

        let appended = if dry_run || plan.is_empty() {
            0
        } else {
            let rows: Vec<_> = plan.rows().cloned().collect();
            append_rows(&path, &queue, &rows)?;
            rows.len()
        };
        tracing::info!(
            dry_run,
            planned = plan.len(),
            appended,
            "request id migration finished"
        );

        Ok(MigrationReport {
            file: self.layout().relative(&path),
            dry_run,
            canonicalized: plan.count(MigrationReason::CanonicalizedLegacyId),
            backfilled: plan.count(MigrationReason::BackfilledDuplicateLineage),
            appended,
            planned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{must, read_file, temp_root, write_file};

    const QUEUE: &str = "data/team_ops/change_request_queue.csv";

    fn seed_queue(root: &std::path::Path) {
        write_file(
            root,
            QUEUE,
            "request_id,run_id,status,statement,supersedes_request_id\n\
             CR-0001-BLUE,R1,open,legacy,\n\
             CR-RED-0002,R1,open,first,\n\
             CR-RED-0002,R1,in_progress,second,\n",
        );
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let root = temp_root("migrate-dry");
        seed_queue(&root);
        let original = read_file(&root, QUEUE);
        let store = must(LedgerStore::open(&root));

        let report = must(store.migrate_ids(true, false));

        assert_eq!(report.canonicalized, 1);
        assert_eq!(report.appended, 0);
        assert_eq!(report.planned[0].row["request_id"], Value::from("CR-BLUE-0001"));
        assert_eq!(report.planned[0].row["supersedes_request_id"], Value::from("CR-0001-BLUE"));
        assert_eq!(read_file(&root, QUEUE), original);
    }

    #[test]
    fn apply_appends_and_second_run_is_a_no_op() {
        let root = temp_root("migrate-apply");
        seed_queue(&root);
        let store = must(LedgerStore::open(&root));

        let first = must(store.migrate_ids(false, true));
        let after_first = read_file(&root, QUEUE);
        let second = must(store.migrate_ids(false, false));

        assert_eq!((first.canonicalized, first.backfilled, first.appended), (1, 1, 2));
        assert!(after_first.starts_with(
            "request_id,run_id,status,statement,supersedes_request_id\nCR-0001-BLUE,R1,open,legacy,\n"
        ));
        assert_eq!(after_first.lines().count(), 6);
        assert_eq!(second.appended, 0);
        assert_eq!(read_file(&root, QUEUE), after_first);
    }

    #[test]
    fn missing_queue_is_missing_input() {
        let root = temp_root("migrate-missing");
        let store = must(LedgerStore::open(&root));
        let err = match store.migrate_ids(true, false) {
            Ok(_) => panic!("expected missing input"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<teamops_ledger_core::LedgerError>(),
            Some(teamops_ledger_core::LedgerError::MissingInput(_))
        ));
    }

    #[test]
    fn queue_without_supersedes_column_is_left_untouched() {
        let root = temp_root("migrate-no-supersedes");
        write_file(
            &root,
            QUEUE,
            "request_id,run_id,status,statement
             CR-0001-BLUE,R1,open,legacy
",
        );
        let original = read_file(&root, QUEUE);
        let store = must(LedgerStore::open(&root));

        for _ in 0..3 {
            let err = match store.migrate_ids(false, false) {
                Ok(report) => panic!("expected structure error, appended {}", report.appended),
                Err(err) => err,
            };
            assert!(matches!(
                err.downcast_ref::<teamops_ledger_core::LedgerError>(),
                Some(teamops_ledger_core::LedgerError::Structure(_))
            ));
        }
        assert_eq!(read_file(&root, QUEUE), original);
    }
}
