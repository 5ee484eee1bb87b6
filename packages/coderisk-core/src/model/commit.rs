use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-file change summary within a commit, including patch text (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    pub patch: Option<String>,
}

/// Natural key (repo_id, sha). Carries parent_shas and a topological_index
/// that is the sole legitimate processing order for per-block mutation (§3.1, §3.2 inv. 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub repo_id: i64,
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<Utc>,
    pub committer_date: DateTime<Utc>,
    pub message: String,
    pub parent_shas: Vec<String>,
    pub files: Vec<FileChange>,
    /// NULL (None) when a parent falls outside the fetched window; sorts last (§4.1).
    pub topological_index: Option<u64>,
    /// Full raw API response payload (§4.1 raw preservation).
    pub raw: serde_json::Value,
}

impl Commit {
    pub fn natural_key(&self) -> (i64, &str) {
        (self.repo_id, self.sha.as_str())
    }

    pub fn is_merge(&self) -> bool {
        self.parent_shas.len() > 1
    }

    pub fn touched_no_files(&self) -> bool {
        self.files.is_empty()
    }
}
