//! S2 Ingest — fact graph (§4.2). Reads staging, writes only facts with
//! 100% provenance: no LLM involvement. File references are resolved to
//! canonical paths via `FileIdentityMap` before any graph write, and a
//! force-push check runs before writing commit nodes so a history rewrite
//! can put the repository into rewrite mode ahead of S4.

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use coderisk_core::model::{FileIdentityMap, IngestionStatus, StageId};
use coderisk_core::topo::{detect_history_rewrite, parent_shas_hash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize)]
struct S2CacheData {
    repo_id: i64,
    rewrite_mode: bool,
}

pub struct S2IngestHandler;

impl S2IngestHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for S2IngestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S2IngestHandler {
    fn stage_id(&self) -> StageId {
        StageId::S2Ingest
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut repo = ctx.staging.get_repository(ctx.repo_id).await?;
        let mut metrics = StageMetrics::default();

        let commits = ctx.staging.unprocessed_commits(ctx.repo_id).await?;

        let mut identity_map = FileIdentityMap::new();
        for identity in ctx.staging.all_file_identities(ctx.repo_id).await? {
            identity_map.index(&identity);
        }

        let all_parent_shas: HashSet<String> =
            commits.iter().flat_map(|c| c.parent_shas.iter().cloned()).collect();
        let rewrite_mode = detect_history_rewrite(repo.parent_shas_hash.as_deref(), &commits);
        if rewrite_mode {
            ctx.graph.truncate_repo(ctx.repo_id).await?;
        }
        repo.parent_shas_hash = Some(parent_shas_hash(&all_parent_shas));
        ctx.staging.upsert_repository(&repo).await?;

        for commit in &commits {
            ctx.graph.upsert_developer_node(ctx.repo_id, &commit.author_email, &commit.author_name).await?;
            ctx.graph.upsert_commit_node(ctx.repo_id, commit).await?;
            for file in &commit.files {
                let canonical = identity_map.resolve(&file.path);
                ctx.graph.upsert_file_node(ctx.repo_id, &canonical).await?;
            }
            ctx.graph.write_commit_edges(ctx.repo_id, commit).await?;
            ctx.staging.mark_commit_processed(ctx.repo_id, &commit.sha).await?;
            metrics.units_processed += 1;
        }

        for issue in ctx.staging.unprocessed_issues(ctx.repo_id).await? {
            ctx.graph.upsert_issue_node(&issue).await?;
            ctx.staging.mark_issue_processed(ctx.repo_id, issue.number).await?;
            metrics.units_processed += 1;
        }

        for pr in ctx.staging.unprocessed_prs(ctx.repo_id).await? {
            ctx.graph.upsert_pr_node(&pr).await?;
            ctx.staging.mark_pr_processed(ctx.repo_id, pr.number).await?;
            metrics.units_processed += 1;
        }

        repo.ingestion_status = IngestionStatus::Staged;
        ctx.staging.upsert_repository(&repo).await?;

        let cache_data = bincode::serialize(&S2CacheData { repo_id: ctx.repo_id, rewrite_mode })?;
        Ok(StageOutput { cache_data, metrics })
    }
}
