//! Port for the language-model collaborator (§1, §4.3, §4.4, §4.5).
//! Specified only by the JSON contracts it must honor — the vendor's actual
//! completion API is out of scope.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// §4.4 "dual-stage model invocation": the cheap pre-filter never sees patch
/// text, only file paths and a one-line diff summary per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFilterCandidate {
    pub path: String,
    pub one_line_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFilterResult {
    pub likely_significant_paths: Vec<String>,
}

/// §4.4 primary model extraction output, one per changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockChangeKindHint {
    Create,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedBlock {
    pub block_name: String,
    pub block_type: String,
    pub kind: BlockChangeKindHint,
    pub renamed_from: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub patch_snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomizeResult {
    pub blocks: Vec<ExtractedBlock>,
}

/// §4.4 "entity resolution" fuzzy step: disambiguate a modification target
/// among several same-named candidates in one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResolutionCandidate {
    pub block_name: String,
    pub signature: String,
    pub start_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResolutionResult {
    pub chosen_start_line: Option<u32>,
    pub confidence: f64,
}

/// §4.3 Phase 1 explicit extraction: referenced-issue detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Fixes,
    Closes,
    Resolves,
    Mentions,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedReference {
    pub issue_number: u64,
    pub reference_type: ReferenceType,
    pub base_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitExtractionResult {
    pub references: Vec<ExtractedReference>,
}

/// §4.3 Phase 2b issue classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClassification {
    FixedWithCode,
    NotABug,
    Duplicate,
    Wontfix,
    UserActionRequired,
    Unclear,
}

/// §4.3 Phase 2b ranking of deep-link candidate PRs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub pr_number: u64,
    pub ranking_score: f64,
    pub temporal_signal: f64,
    pub max_semantic_signal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingResult {
    pub ranked: Vec<RankedCandidate>,
}

/// §4.5 temporal-summary synthesis for blocks with ≥2 incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentForSummary {
    pub title: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn pre_filter(&self, candidates: &[PreFilterCandidate]) -> Result<PreFilterResult>;
    async fn atomize(&self, file_path: &str, patch_chunk: &str) -> Result<AtomizeResult>;
    async fn resolve_entity(&self, patch_context: &str, candidates: &[EntityResolutionCandidate]) -> Result<EntityResolutionResult>;
    async fn extract_references(&self, pr_title: &str, pr_body_excerpt: &str) -> Result<ExplicitExtractionResult>;
    async fn classify_issue(&self, issue_title: &str, issue_body: &str) -> Result<IssueClassification>;
    async fn rank_candidates(&self, issue_context: &str, candidates: &[(u64, String)]) -> Result<RankingResult>;
    async fn synthesize_temporal_summary(&self, incidents: &[IncidentForSummary]) -> Result<String>;
}
