use serde::{Deserialize, Serialize};

/// Version-control corroboration attached to an export. Every field stays at
/// its default when git is unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitEvidence {
    pub git_available: bool,
    pub branch: String,
    pub commit_history: Vec<GitCommit>,
    pub worktree_status_porcelain: Vec<String>,
    pub worktree_changed_files: Vec<String>,
    pub worktree_untracked_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitCommit {
    pub commit: String,
    pub date_utc: String,
    pub author: String,
    pub subject: String,
    pub files: Vec<GitFileChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GitFileChange {
    Renamed {
        status: String,
        path_old: String,
        path_new: String,
    },
    Changed {
        status: String,
        path: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    pub lines: Vec<String>,
    pub changed: Vec<String>,
    pub untracked: Vec<String>,
}

pub const COMMIT_MARKER: &str = "@@";

/// Parses `git log --name-status --pretty=format:@@%H|%ad|%an|%s` output.
#[must_use]
pub fn parse_git_log(output: &str) -> Vec<GitCommit> {
    let mut commits = Vec::new();
    let mut current: Option<GitCommit> = None;

    for line in output.lines() {
        if let Some(header) = line.strip_prefix(COMMIT_MARKER) {
            if let Some(done) = current.take() {
                commits.push(done);
            }
            let mut parts = header.splitn(4, '|');
            current = Some(GitCommit {
                commit: parts.next().unwrap_or_default().to_string(),
                date_utc: parts.next().unwrap_or_default().to_string(),
                author: parts.next().unwrap_or_default().to_string(),
                subject: parts.next().unwrap_or_default().to_string(),
                files: Vec::new(),
            });
            continue;
        }

        let Some(commit) = current.as_mut() else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }
        let status = parts[0].trim().to_string();
        if status.starts_with('R') && parts.len() >= 3 {
            commit.files.push(GitFileChange::Renamed {
                status,
                path_old: parts[1].to_string(),
                path_new: parts[2].to_string(),
            });
        } else {
            commit.files.push(GitFileChange::Changed {
                status,
                path: parts[1].to_string(),
            });
        }
    }

    if let Some(done) = current {
        commits.push(done);
    }
    commits
}

/// Parses `git status --porcelain -uall` output into changed and untracked
/// paths.
#[must_use]
pub fn parse_porcelain_status(output: &str) -> WorktreeStatus {
    let mut status = WorktreeStatus::default();
    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        status.lines.push(line.to_string());
        if line.len() < 4 || !line.is_char_boundary(3) {
            continue;
        }
        let (code, rest) = line.split_at(2);
        let path = rest[1..].trim().to_string();
        if code == "??" {
            status.untracked.push(path);
        } else {
            status.changed.push(path);
        }
    }
    status
}
