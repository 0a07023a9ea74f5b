use std::path::{Component, Path, PathBuf};

use teamops_ledger_core::{LedgerFile, ARCHIVE_INDEX_FILE};

const TEAM_OPS_DIR: &str = "data/team_ops";
const REVIEW_LOG_DIR: &str = "planning/RAPID_REVIEW_CELL/logs";

/// Where every ledger lives relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    root: PathBuf,
}

impl LedgerLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn team_ops_dir(&self) -> PathBuf {
        self.root.join(TEAM_OPS_DIR)
    }

    #[must_use]
    pub fn ledger_path(&self, file: LedgerFile) -> PathBuf {
        self.team_ops_dir().join(file.file_name())
    }

    /// Repository-relative key of a live ledger, as used in export records.
    #[must_use]
    pub fn ledger_key(file: LedgerFile) -> String {
        format!("{TEAM_OPS_DIR}/{}", file.file_name())
    }

    #[must_use]
    pub fn archive_root(&self) -> PathBuf {
        self.team_ops_dir().join("archive")
    }

    #[must_use]
    pub fn archive_index_path(&self) -> PathBuf {
        self.archive_root().join(ARCHIVE_INDEX_FILE)
    }

    #[must_use]
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    #[must_use]
    pub fn review_log_dir(&self) -> PathBuf {
        self.root.join(REVIEW_LOG_DIR)
    }

    #[must_use]
    pub fn ticket_queue_path(&self) -> PathBuf {
        self.review_log_dir().join("TICKET_QUEUE.csv")
    }

    #[must_use]
    pub fn ticket_responses_path(&self) -> PathBuf {
        self.review_log_dir().join("TICKET_RESPONSES.csv")
    }

    #[must_use]
    pub fn claim_register_path(&self) -> PathBuf {
        self.review_log_dir().join("CLAIM_REGISTER.csv")
    }

    #[must_use]
    pub fn evidence_support_path(&self) -> PathBuf {
        self.review_log_dir().join("EVIDENCE_SUPPORT.csv")
    }

    #[must_use]
    pub fn decision_disposition_path(&self) -> PathBuf {
        self.review_log_dir().join("DECISION_DISPOSITION.csv")
    }

    /// Joins a `/`-separated repository-relative key onto the root.
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Repository-relative path with `/` separators, or the full path when
    /// `path` is outside the root.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rest) => rest
                .components()
                .filter_map(|component| match component {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Returns `base`, or `base-2`, `base-3`, ... when the name is already taken
/// under `parent`.
#[must_use]
pub fn unique_dir(parent: &Path, base: &str) -> PathBuf {
    let first = parent.join(base);
    if !first.exists() {
        return first;
    }
    let mut suffix = 2_u32;
    loop {
        let candidate = parent.join(format!("{base}-{suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}
