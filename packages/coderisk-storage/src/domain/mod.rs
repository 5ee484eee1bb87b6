//! Port traits for the two stores named in the spec's dual-store design:
//! `StagingStore` (relational, system of record) and `GraphStore` (derived,
//! queried by risk consumers). Mirrors codegraph-storage's
//! `CodeSnapshotStore` shape — one async trait per store, typed methods
//! rather than raw SQL/Cypher strings reaching callers.

use crate::error::Result;
use async_trait::async_trait;
use coderisk_core::model::{
    BlockChange, CodeBlock, Comment, Commit, DeadLetter, FileIdentity, IngestionJob, Issue,
    IssuePRLink, PullRequest, Repository, TimelineEvent,
};

/// Variance between the two stores for one entity kind, as computed by
/// Reconcile's validate-only mode (§4.9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityCountVariance {
    pub staging_count: u64,
    pub graph_count: u64,
}

impl EntityCountVariance {
    /// |min/max|, per §4.9. 1.0 when either side is zero and both are zero.
    pub fn ratio(&self) -> f64 {
        let (min, max) = if self.staging_count <= self.graph_count {
            (self.staging_count, self.graph_count)
        } else {
            (self.graph_count, self.staging_count)
        };
        if max == 0 {
            return 1.0;
        }
        min as f64 / max as f64
    }
}

/// Relational system of record (§3, §5 "the relational store is the system
/// of record"). All writes are upserts keyed on natural keys (§5).
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn upsert_repository(&self, repo: &Repository) -> Result<i64>;
    async fn get_repository(&self, repo_id: i64) -> Result<Repository>;
    async fn find_repository_by_full_name(&self, owner: &str, name: &str) -> Result<Option<Repository>>;

    async fn upsert_commit(&self, commit: &Commit) -> Result<()>;
    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()>;
    async fn get_commit(&self, repo_id: i64, sha: &str) -> Result<Option<Commit>>;
    /// Rows with NULL `processed_at` (`v_unprocessed_commits`, §6).
    async fn unprocessed_commits(&self, repo_id: i64) -> Result<Vec<Commit>>;
    async fn mark_commit_processed(&self, repo_id: i64, sha: &str) -> Result<()>;
    /// Every staged commit regardless of `processed_at`, for passes (S3, S4's
    /// topological reprocessing, S7) that need the full set rather than only
    /// what S2 has not yet ingested.
    async fn all_commits(&self, repo_id: i64) -> Result<Vec<Commit>>;

    async fn upsert_file_identity(&self, identity: &FileIdentity) -> Result<()>;
    async fn all_file_identities(&self, repo_id: i64) -> Result<Vec<FileIdentity>>;

    async fn upsert_issue(&self, issue: &Issue) -> Result<()>;
    /// `v_unprocessed_issues` (§6).
    async fn unprocessed_issues(&self, repo_id: i64) -> Result<Vec<Issue>>;
    async fn mark_issue_processed(&self, repo_id: i64, number: u64) -> Result<()>;
    /// Every staged issue regardless of `processed_at` (S3/S5 need the whole set).
    async fn all_issues(&self, repo_id: i64) -> Result<Vec<Issue>>;

    async fn upsert_pull_request(&self, pr: &PullRequest) -> Result<()>;
    /// `v_unprocessed_prs` (§6).
    async fn unprocessed_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>>;
    async fn mark_pr_processed(&self, repo_id: i64, number: u64) -> Result<()>;
    /// Every staged PR regardless of `processed_at` (S3/S7 need the whole set).
    async fn all_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>>;

    async fn upsert_comment(&self, comment: &Comment) -> Result<()>;
    async fn upsert_timeline_event(&self, event: &TimelineEvent) -> Result<()>;
    async fn timeline_events_for_issue(&self, repo_id: i64, issue_number: u64) -> Result<Vec<TimelineEvent>>;

    async fn upsert_issue_pr_link(&self, link: &IssuePRLink) -> Result<()>;
    async fn issue_pr_links_for_repo(&self, repo_id: i64) -> Result<Vec<IssuePRLink>>;

    async fn upsert_code_block(&self, block: &CodeBlock) -> Result<()>;
    async fn get_code_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>>;
    async fn code_blocks_for_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>>;

    async fn upsert_block_change(&self, change: &BlockChange) -> Result<()>;
    async fn block_changes_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<BlockChange>>;

    async fn upsert_ingestion_job(&self, job: &IngestionJob) -> Result<()>;
    async fn get_ingestion_job(&self, repo_id: i64, stage: coderisk_core::model::StageId) -> Result<Option<IngestionJob>>;

    async fn upsert_dead_letter(&self, entry: &DeadLetter) -> Result<()>;
    /// Entries still eligible for retry (`status == Pending`).
    async fn pending_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>>;
    /// Entries that exhausted their retry budget (`status == Abandoned`),
    /// surfaced by Reconcile's validate-only report (§4.8, §4.9).
    async fn abandoned_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>>;

    /// Entity-kind counts used by Reconcile's validate-only mode (§4.9).
    async fn entity_counts(&self, repo_id: i64) -> Result<std::collections::HashMap<String, u64>>;

    /// Truncates all derived (non-staging-source) data for a repository, for
    /// Reconcile's full mode (§4.9). Staging rows survive; downstream
    /// derived fields (risk properties, links) are reset.
    async fn truncate_derived(&self, repo_id: i64) -> Result<()>;
}

/// A block's edge-neighborhood as returned by the `coupled-blocks` query
/// template (§6 graph query surface).
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledBlock {
    pub canonical_file_path: String,
    pub block_name: String,
    pub co_change_count: u32,
    pub co_change_rate: f64,
    pub via_import: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentSummary {
    pub commit_sha: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipSummary {
    pub original_author: Option<String>,
    pub last_modifier: Option<String>,
    pub familiarity_map: std::collections::HashMap<String, u32>,
}

/// Derived graph store, written by S2/S4/S5/S7 and queried by risk
/// consumers through the five read templates of §6 rather than raw Cypher.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_commit_node(&self, repo_id: i64, commit: &Commit) -> Result<()>;
    async fn upsert_developer_node(&self, repo_id: i64, email: &str, name: &str) -> Result<()>;
    async fn upsert_file_node(&self, repo_id: i64, canonical_path: &str) -> Result<()>;
    async fn upsert_code_block_node(&self, block: &CodeBlock) -> Result<()>;
    async fn upsert_issue_node(&self, issue: &Issue) -> Result<()>;
    async fn upsert_pr_node(&self, pr: &PullRequest) -> Result<()>;

    /// AUTHORED / MODIFIED / IN_PR / CREATED / MERGED_AS edges (§6).
    async fn write_commit_edges(&self, repo_id: i64, commit: &Commit) -> Result<()>;
    /// REFERENCES / CLOSED_BY / FIXED_BY / ASSOCIATED_WITH edges (§6), carrying
    /// the full property set listed for IssuePRLink edges.
    async fn write_issue_pr_link_edge(&self, link: &IssuePRLink) -> Result<()>;
    /// CREATED_BLOCK / MODIFIED_BLOCK / DELETED_BLOCK / RENAMED_FROM edges.
    async fn write_block_change_edge(&self, change: &BlockChange) -> Result<()>;
    /// CO_CHANGES_WITH edges (§4.7).
    async fn write_coupling_edge(
        &self,
        repo_id: i64,
        a: (&str, &str),
        b: (&str, &str),
        co_change_count: u32,
        co_change_rate: f64,
        via_import: bool,
    ) -> Result<()>;

    /// INCIDENT edge from the fixing commit to the block it touched (§4.5).
    /// Written by S5 once per (block, fixing commit) pair it walks; backs
    /// the `incidents-for-block` read template below.
    async fn write_incident_edge(
        &self,
        repo_id: i64,
        canonical_file_path: &str,
        block_name: &str,
        commit_sha: &str,
        occurred_at: chrono::DateTime<chrono::Utc>,
        summary: &str,
    ) -> Result<()>;

    async fn update_risk_properties(&self, block: &CodeBlock) -> Result<()>;

    // Read templates (§6 "Graph query surface").
    async fn block_by_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>>;
    async fn block_risk(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>>;
    async fn coupled_blocks(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<CoupledBlock>>;
    async fn incidents_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<IncidentSummary>>;
    async fn ownership_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<OwnershipSummary>>;

    /// Node count by label, for Reconcile's variance computation (§4.9).
    async fn node_counts(&self, repo_id: i64) -> Result<std::collections::HashMap<String, u64>>;

    /// Truncates all nodes/edges scoped to a repository, for Reconcile full mode.
    async fn truncate_repo(&self, repo_id: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_ratio_is_symmetric() {
        let v = EntityCountVariance { staging_count: 95, graph_count: 100 };
        assert!((v.ratio() - 0.95).abs() < 1e-9);
        let v2 = EntityCountVariance { staging_count: 100, graph_count: 95 };
        assert!((v2.ratio() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn both_zero_counts_as_full_agreement() {
        let v = EntityCountVariance { staging_count: 0, graph_count: 0 };
        assert_eq!(v.ratio(), 1.0);
    }
}
