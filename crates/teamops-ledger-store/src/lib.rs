//! Filesystem persistence for the team-ops ledgers.
//!
//! [`LedgerStore`] owns a repository root. It reads CSV ledgers into
//! [`teamops_ledger_core`] tables, runs the pure planning functions there,
//! and applies the resulting plans with backups, atomic rewrites and
//! append-only writes.

#![allow(clippy::missing_errors_doc)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use teamops_ledger_core::{LedgerFile, LedgerTables};

mod archive;
mod csv_io;
mod export;
mod layout;
mod migrate;
mod tickets;

pub use archive::CleanupReport;
pub use csv_io::{
    append_rows, ensure_table, read_optional_table, read_required_table, write_rows,
    write_table_atomic,
};
pub use export::{
    collect_git_evidence, sha256_file, ExportOptions, ExportReport, ExportScope, InventoryEntry,
};
pub use layout::{unique_dir, LedgerLayout};
pub use migrate::{MigrationReport, PlannedRow};
pub use tickets::{CreatedTicket, FromReviewReport, NewTicket, RecordedResponse, DEFAULT_OPENED_BY};

pub struct LedgerStore {
    layout: LedgerLayout,
}

impl LedgerStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("repository root {} is not a directory", root.display());
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve repository root {}", root.display()))?;
        tracing::debug!(root = %root.display(), "opened ledger store");
        Ok(Self {
            layout: LedgerLayout::new(root),
        })
    }

    #[must_use]
    pub fn layout(&self) -> &LedgerLayout {
        &self.layout
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Reads the four live ledgers. Every file is required; the first missing
    /// one aborts the read.
    pub fn read_ledgers(&self) -> Result<LedgerTables> {
        let mut tables = LedgerTables::default();
        for file in LedgerFile::ALL {
            *tables.get_mut(file) = read_required_table(&self.layout.ledger_path(file))?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use ulid::Ulid;

    pub fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    pub fn temp_root(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("teamops-{label}-{}", Ulid::new()));
        must(fs::create_dir_all(&dir).map_err(anyhow::Error::from));
        dir
    }

    pub fn write_file(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            must(fs::create_dir_all(parent).map_err(anyhow::Error::from));
        }
        must(fs::write(&path, contents).map_err(anyhow::Error::from));
    }

    pub fn read_file(root: &Path, relative: &str) -> String {
        must(fs::read_to_string(root.join(relative)).map_err(anyhow::Error::from))
    }

    /// A small repository with one active run (R1), one finished run (R9)
    /// and rows referencing both.
    pub fn seed_ledgers(root: &Path) {
        write_file(
            root,
            "data/team_ops/run_registry.csv",
            "run_id,created_utc,status,supersedes_run_id\n\
             R1,2025-01-01T00:00:00Z,initialized,\n\
             R9,2025-01-01T00:00:00Z,active,\n\
             R1,2025-01-02T00:00:00Z,active,\n\
             R9,2025-01-03T00:00:00Z,complete,\n",
        );
        write_file(
            root,
            "data/team_ops/change_request_queue.csv",
            "request_id,run_id,status,priority,assignee,statement,supersedes_request_id\n\
             CR-1,R1,open,P1,,first,\n\
             CR-2,R1,open,P1,red,second,CR-1\n\
             CR-3,R9,open,P2,,third,\n",
        );
        write_file(
            root,
            "data/team_ops/handoff_log.csv",
            "entry_id,run_id,timestamp_utc,from_team,to_team,blocking_flags,supersedes_entry_id\n\
             H-1,R1,2025-01-01T01:00:00Z,blue,red,[],\n\
             H-2,R9,2025-01-01T02:00:00Z,blue,red,\"[\"\"legal\"\"]\",\n",
        );
        write_file(
            root,
            "data/team_ops/decision_log.csv",
            "decision_id,run_id,timestamp_utc,supersedes_decision_id\n\
             D-1,R1,2025-01-01T03:00:00Z,\n\
             D-2,R9,2025-01-01T04:00:00Z,\n",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{must, seed_ledgers, temp_root};
    use super::*;
    use teamops_ledger_core::LedgerError;

    #[test]
    fn open_rejects_missing_root() {
        let root = temp_root("open").join("absent");
        assert!(LedgerStore::open(&root).is_err());
    }

    #[test]
    fn read_ledgers_reports_first_missing_file() {
        let root = temp_root("read");
        seed_ledgers(&root);
        must(std::fs::remove_file(root.join("data/team_ops/handoff_log.csv")).map_err(anyhow::Error::from));

        let store = must(LedgerStore::open(&root));
        let err = match store.read_ledgers() {
            Ok(_) => panic!("expected missing input"),
            Err(err) => err,
        };
        match err.downcast_ref::<LedgerError>() {
            Some(LedgerError::MissingInput(path)) => {
                assert!(path.ends_with("data/team_ops/handoff_log.csv"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn read_ledgers_keeps_file_order() {
        let root = temp_root("order");
        seed_ledgers(&root);
        let store = must(LedgerStore::open(&root));

        let tables = must(store.read_ledgers());

        assert_eq!(tables.run_registry.len(), 4);
        assert_eq!(tables.change_requests.len(), 3);
        assert_eq!(tables.handoffs.header[0], "entry_id");
    }
}
