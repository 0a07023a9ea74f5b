use serde::{Deserialize, Serialize};

pub const ARCHIVE_INDEX_FILE: &str = "archive_index.csv";

pub const ARCHIVE_INDEX_FIELDS: [&str; 7] = [
    "timestamp_utc",
    "archive_dir",
    "active_run_ids",
    "run_rows_archived",
    "request_rows_archived",
    "handoff_rows_archived",
    "decision_rows_archived",
];

/// The four live team-ops ledgers the archiver owns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFile {
    RunRegistry,
    ChangeRequestQueue,
    HandoffLog,
    DecisionLog,
}

impl LedgerFile {
    pub const ALL: [Self; 4] = [
        Self::RunRegistry,
        Self::ChangeRequestQueue,
        Self::HandoffLog,
        Self::DecisionLog,
    ];

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::RunRegistry => "run_registry.csv",
            Self::ChangeRequestQueue => "change_request_queue.csv",
            Self::HandoffLog => "handoff_log.csv",
            Self::DecisionLog => "decision_log.csv",
        }
    }

    #[must_use]
    pub fn id_field(self) -> &'static str {
        match self {
            Self::RunRegistry => "run_id",
            Self::ChangeRequestQueue => "request_id",
            Self::HandoffLog => "entry_id",
            Self::DecisionLog => "decision_id",
        }
    }

    #[must_use]
    pub fn supersedes_field(self) -> &'static str {
        match self {
            Self::RunRegistry => "supersedes_run_id",
            Self::ChangeRequestQueue => "supersedes_request_id",
            Self::HandoffLog => "supersedes_entry_id",
            Self::DecisionLog => "supersedes_decision_id",
        }
    }

    /// Whether the ID must be unique across rows. Run and request IDs repeat
    /// as their entities move through states; entry and decision IDs do not.
    #[must_use]
    pub fn requires_unique_ids(self) -> bool {
        matches!(self, Self::HandoffLog | Self::DecisionLog)
    }

    /// Column holding the per-file count in `archive_index.csv`.
    #[must_use]
    pub fn archive_index_column(self) -> &'static str {
        match self {
            Self::RunRegistry => "run_rows_archived",
            Self::ChangeRequestQueue => "request_rows_archived",
            Self::HandoffLog => "handoff_rows_archived",
            Self::DecisionLog => "decision_rows_archived",
        }
    }

    #[must_use]
    pub fn from_file_key(file_key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|file| file_key.ends_with(file.file_name()))
    }
}
