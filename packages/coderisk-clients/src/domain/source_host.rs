//! Port for the source-host collaborator (§1, §4.1). Specified only by the
//! data it must return — the vendor's actual REST/GraphQL surface is out of
//! scope; this trait is the contract boundary.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of commits plus the host's notion of remaining rate-limit budget,
/// so callers can feed `AdaptiveTokenBucket::observe_remaining` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
    pub rate_limit_remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommit {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<Utc>,
    pub committer_date: DateTime<Utc>,
    pub message: String,
    pub parent_shas: Vec<String>,
    pub files: Vec<RawFileChange>,
    /// Full untouched API payload (§4.1 "raw preservation").
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFileChange {
    pub path: String,
    pub previous_path: Option<String>,
    pub additions: u32,
    pub deletions: u32,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub parent_number: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTimelineEvent {
    pub issue_number: u64,
    pub event_type: String,
    pub commit_sha: Option<String>,
    pub pr_number: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// The data contract of §4.1. `since` drives incremental runs
/// (`Since(last_commit_date)`, §4.1 idempotence); `None` means full history
/// bounded by the configured days-window.
#[async_trait]
pub trait SourceHostClient: Send + Sync {
    async fn commits(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawCommit>>;
    async fn issues(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawIssue>>;
    async fn pull_requests(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawPullRequest>>;
    async fn comments(&self, owner: &str, name: &str, parent_number: u64, page: u32) -> Result<RawPage<RawComment>>;
    async fn timeline_events(&self, owner: &str, name: &str, issue_number: u64, page: u32) -> Result<RawPage<RawTimelineEvent>>;
}
