use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Function,
    Method,
    Class,
    Component,
    Enum,
    Interface,
    Type,
}

/// Risk properties accumulated by S5-S7 (§3.1). Additive only — see §3.3
/// lifecycle rule that risk properties are the sole mutable fields on a
/// CodeBlock after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskProperties {
    pub incident_count: u32,
    pub last_incident_date: Option<chrono::DateTime<chrono::Utc>>,
    pub temporal_summary: Option<String>,
    pub original_author: Option<String>,
    pub last_modifier: Option<String>,
    pub staleness_days: Option<i64>,
    pub familiarity_map: HashMap<String, u32>,
    pub co_change_count: u32,
    pub avg_coupling_rate: f64,
    pub risk_score: f64,
}

/// Natural key (repo_id, canonical_file_path, block_name) — deliberately
/// excludes start_line, since line numbers shift with unrelated edits above
/// the block and would fragment its history (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub repo_id: i64,
    pub canonical_file_path: String,
    pub block_name: String,
    pub block_type: BlockType,
    pub language: String,
    /// Advisory only; never part of the natural key.
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub first_seen_commit_sha: String,
    pub last_modified_commit_sha: String,
    pub risk: RiskProperties,
}

impl CodeBlock {
    pub fn natural_key(&self) -> (i64, &str, &str) {
        (self.repo_id, self.canonical_file_path.as_str(), self.block_name.as_str())
    }
}
