//! PostgreSQL-backed `StagingStore` (§5 "the relational store is the system
//! of record"). Every staging table stores its natural key columns plus a
//! `data JSONB` column holding the full typed row; natural-key upserts use
//! `ON CONFLICT ... DO UPDATE`, matching §5's "concurrent upserts of the
//! same key are resolved by the store's constraint."
//!
//! Schema (applied out of band by migrations, not by this module):
//!
//! ```sql
//! CREATE TABLE repositories (id BIGINT PRIMARY KEY, owner TEXT, name TEXT, data JSONB,
//!   UNIQUE (owner, name));
//! CREATE TABLE commits (repo_id BIGINT, sha TEXT, processed_at TIMESTAMPTZ, data JSONB,
//!   PRIMARY KEY (repo_id, sha));
//! CREATE VIEW v_unprocessed_commits AS SELECT * FROM commits WHERE processed_at IS NULL;
//! -- file_identities, issues, pull_requests, comments, timeline_events,
//! -- issue_pr_links, code_blocks, block_changes, ingestion_jobs, dead_letters
//! -- follow the same (natural key columns, data JSONB) shape.
//! ```

use crate::domain::StagingStore;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use coderisk_core::model::{
    BlockChange, CodeBlock, Comment, Commit, DeadLetter, DeadLetterStatus, FileIdentity,
    IngestionJob, Issue, IssuePRLink, PullRequest, Repository, StageId, TimelineEvent,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashMap;

pub struct PostgresStagingStore {
    pool: PgPool,
}

impl PostgresStagingStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_data<T: serde::de::DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T> {
    let value: serde_json::Value = row.try_get("data")?;
    serde_json::from_value(value).map_err(Into::into)
}

#[async_trait]
impl StagingStore for PostgresStagingStore {
    async fn upsert_repository(&self, repo: &Repository) -> Result<i64> {
        let data = serde_json::to_value(repo)?;
        let row = sqlx::query(
            "INSERT INTO repositories (id, owner, name, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (owner, name) DO UPDATE SET data = EXCLUDED.data
             RETURNING id",
        )
        .bind(repo.id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn get_repository(&self, repo_id: i64) -> Result<Repository> {
        let row = sqlx::query("SELECT data FROM repositories WHERE id = $1")
            .bind(repo_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("Repository", repo_id))?;
        row_data(&row)
    }

    async fn find_repository_by_full_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT data FROM repositories WHERE owner = $1 AND name = $2")
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_data(&r)).transpose()
    }

    async fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        let data = serde_json::to_value(commit)?;
        sqlx::query(
            "INSERT INTO commits (repo_id, sha, processed_at, data) VALUES ($1, $2, NULL, $3)
             ON CONFLICT (repo_id, sha) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(commit.repo_id)
        .bind(&commit.sha)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()> {
        for c in commits {
            self.upsert_commit(c).await?;
        }
        Ok(())
    }

    async fn get_commit(&self, repo_id: i64, sha: &str) -> Result<Option<Commit>> {
        let row = sqlx::query("SELECT data FROM commits WHERE repo_id = $1 AND sha = $2")
            .bind(repo_id)
            .bind(sha)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_data(&r)).transpose()
    }

    async fn unprocessed_commits(&self, repo_id: i64) -> Result<Vec<Commit>> {
        let rows = sqlx::query("SELECT data FROM v_unprocessed_commits WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn mark_commit_processed(&self, repo_id: i64, sha: &str) -> Result<()> {
        sqlx::query("UPDATE commits SET processed_at = now() WHERE repo_id = $1 AND sha = $2")
            .bind(repo_id)
            .bind(sha)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all_commits(&self, repo_id: i64) -> Result<Vec<Commit>> {
        let rows = sqlx::query("SELECT data FROM commits WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_file_identity(&self, identity: &FileIdentity) -> Result<()> {
        let data = serde_json::to_value(identity)?;
        sqlx::query(
            "INSERT INTO file_identities (repo_id, canonical_path, data) VALUES ($1, $2, $3)
             ON CONFLICT (repo_id, canonical_path) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(identity.repo_id)
        .bind(&identity.canonical_path)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_file_identities(&self, repo_id: i64) -> Result<Vec<FileIdentity>> {
        let rows = sqlx::query("SELECT data FROM file_identities WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_issue(&self, issue: &Issue) -> Result<()> {
        let data = serde_json::to_value(issue)?;
        sqlx::query(
            "INSERT INTO issues (repo_id, number, processed_at, data) VALUES ($1, $2, NULL, $3)
             ON CONFLICT (repo_id, number) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(issue.repo_id)
        .bind(issue.number as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unprocessed_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT data FROM v_unprocessed_issues WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn mark_issue_processed(&self, repo_id: i64, number: u64) -> Result<()> {
        sqlx::query("UPDATE issues SET processed_at = now() WHERE repo_id = $1 AND number = $2")
            .bind(repo_id)
            .bind(number as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT data FROM issues WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_pull_request(&self, pr: &PullRequest) -> Result<()> {
        let data = serde_json::to_value(pr)?;
        sqlx::query(
            "INSERT INTO pull_requests (repo_id, number, processed_at, data) VALUES ($1, $2, NULL, $3)
             ON CONFLICT (repo_id, number) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(pr.repo_id)
        .bind(pr.number as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unprocessed_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>> {
        let rows = sqlx::query("SELECT data FROM v_unprocessed_prs WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn mark_pr_processed(&self, repo_id: i64, number: u64) -> Result<()> {
        sqlx::query("UPDATE pull_requests SET processed_at = now() WHERE repo_id = $1 AND number = $2")
            .bind(repo_id)
            .bind(number as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>> {
        let rows = sqlx::query("SELECT data FROM pull_requests WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<()> {
        let data = serde_json::to_value(comment)?;
        sqlx::query("INSERT INTO comments (repo_id, parent_number, created_at, data) VALUES ($1, $2, $3, $4)")
            .bind(comment.repo_id)
            .bind(comment.parent_number as i64)
            .bind(comment.created_at)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_timeline_event(&self, event: &TimelineEvent) -> Result<()> {
        let data = serde_json::to_value(event)?;
        sqlx::query("INSERT INTO timeline_events (repo_id, issue_number, created_at, data) VALUES ($1, $2, $3, $4)")
            .bind(event.repo_id)
            .bind(event.issue_number as i64)
            .bind(event.created_at)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn timeline_events_for_issue(&self, repo_id: i64, issue_number: u64) -> Result<Vec<TimelineEvent>> {
        let rows = sqlx::query(
            "SELECT data FROM timeline_events WHERE repo_id = $1 AND issue_number = $2 ORDER BY created_at",
        )
        .bind(repo_id)
        .bind(issue_number as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_issue_pr_link(&self, link: &IssuePRLink) -> Result<()> {
        let data = serde_json::to_value(link)?;
        sqlx::query(
            "INSERT INTO issue_pr_links (repo_id, issue_number, pr_number, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (repo_id, issue_number, pr_number) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(link.repo_id)
        .bind(link.issue_number as i64)
        .bind(link.pr_number as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn issue_pr_links_for_repo(&self, repo_id: i64) -> Result<Vec<IssuePRLink>> {
        let rows = sqlx::query("SELECT data FROM issue_pr_links WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_code_block(&self, block: &CodeBlock) -> Result<()> {
        let data = serde_json::to_value(block)?;
        sqlx::query(
            "INSERT INTO code_blocks (repo_id, canonical_file_path, block_name, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (repo_id, canonical_file_path, block_name) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(block.repo_id)
        .bind(&block.canonical_file_path)
        .bind(&block.block_name)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_code_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>> {
        let row = sqlx::query(
            "SELECT data FROM code_blocks WHERE repo_id = $1 AND canonical_file_path = $2 AND block_name = $3",
        )
        .bind(repo_id)
        .bind(canonical_file_path)
        .bind(block_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_data(&r)).transpose()
    }

    async fn code_blocks_for_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>> {
        let rows = sqlx::query("SELECT data FROM code_blocks WHERE repo_id = $1 AND canonical_file_path = $2")
            .bind(repo_id)
            .bind(canonical_file_path)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_block_change(&self, change: &BlockChange) -> Result<()> {
        let data = serde_json::to_value(change)?;
        sqlx::query(
            "INSERT INTO block_changes (repo_id, canonical_file_path, block_name, commit_sha, data)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(change.repo_id)
        .bind(&change.canonical_file_path)
        .bind(&change.block_name)
        .bind(&change.commit_sha)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn block_changes_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<BlockChange>> {
        let rows = sqlx::query(
            "SELECT data FROM block_changes WHERE repo_id = $1 AND canonical_file_path = $2 AND block_name = $3",
        )
        .bind(repo_id)
        .bind(canonical_file_path)
        .bind(block_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_data).collect()
    }

    async fn upsert_ingestion_job(&self, job: &IngestionJob) -> Result<()> {
        let data = serde_json::to_value(job)?;
        sqlx::query(
            "INSERT INTO ingestion_jobs (repo_id, stage, data) VALUES ($1, $2, $3)
             ON CONFLICT (repo_id, stage) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(job.repo_id)
        .bind(job.stage.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ingestion_job(&self, repo_id: i64, stage: StageId) -> Result<Option<IngestionJob>> {
        let row = sqlx::query("SELECT data FROM ingestion_jobs WHERE repo_id = $1 AND stage = $2")
            .bind(repo_id)
            .bind(stage.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_data(&r)).transpose()
    }

    async fn upsert_dead_letter(&self, entry: &DeadLetter) -> Result<()> {
        let data = serde_json::to_value(entry)?;
        let unit_kind = serde_json::to_string(&entry.unit_kind)?;
        sqlx::query(
            "INSERT INTO dead_letters (repo_id, unit_kind, unit_id, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (repo_id, unit_kind, unit_id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(entry.repo_id)
        .bind(unit_kind)
        .bind(&entry.unit_id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query("SELECT data FROM dead_letters WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        let all: Vec<DeadLetter> = rows.iter().map(row_data).collect::<Result<_>>()?;
        Ok(all.into_iter().filter(|d| d.status == DeadLetterStatus::Pending).collect())
    }

    async fn abandoned_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query("SELECT data FROM dead_letters WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_all(&self.pool)
            .await?;
        let all: Vec<DeadLetter> = rows.iter().map(row_data).collect::<Result<_>>()?;
        Ok(all.into_iter().filter(|d| d.status == DeadLetterStatus::Abandoned).collect())
    }

    async fn entity_counts(&self, repo_id: i64) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for (label, table) in [
            ("commit", "commits"),
            ("issue", "issues"),
            ("pull_request", "pull_requests"),
            ("code_block", "code_blocks"),
            ("issue_pr_link", "issue_pr_links"),
        ] {
            let row = sqlx::query(&format!("SELECT count(*) AS n FROM {table} WHERE repo_id = $1"))
                .bind(repo_id)
                .fetch_one(&self.pool)
                .await?;
            let n: i64 = row.try_get("n")?;
            counts.insert(label.to_string(), n as u64);
        }
        Ok(counts)
    }

    async fn truncate_derived(&self, repo_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM code_blocks WHERE repo_id = $1").bind(repo_id).execute(&self.pool).await?;
        sqlx::query("DELETE FROM block_changes WHERE repo_id = $1").bind(repo_id).execute(&self.pool).await?;
        sqlx::query("DELETE FROM issue_pr_links WHERE repo_id = $1").bind(repo_id).execute(&self.pool).await?;
        Ok(())
    }
}
