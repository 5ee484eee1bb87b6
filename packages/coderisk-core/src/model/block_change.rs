use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// Every modification to a block (§3.1). On rename, `renamed_from` carries
/// the predecessor block's name so identity can be traced across the rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockChange {
    pub repo_id: i64,
    pub canonical_file_path: String,
    pub block_name: String,
    pub commit_sha: String,
    pub change_kind: ChangeKind,
    pub patch_snippet: String,
    pub renamed_from: Option<String>,
}
