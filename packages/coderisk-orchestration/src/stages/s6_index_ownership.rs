//! S6 IndexOwnership — Ownership Risk (§4.6). For each CodeBlock, walks its
//! MODIFIED_BLOCK history ordered by commit author_date and derives
//! original_author, last_modifier, staleness_days, and a familiarity
//! histogram. No LLM use.

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use coderisk_core::model::StageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
struct S6CacheData {
    blocks_processed: usize,
}

pub struct S6IndexOwnershipHandler;

impl S6IndexOwnershipHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for S6IndexOwnershipHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S6IndexOwnershipHandler {
    fn stage_id(&self) -> StageId {
        StageId::S6IndexOwnership
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut metrics = StageMetrics::default();
        let commits = ctx.staging.all_commits(ctx.repo_id).await?;
        let commit_by_sha: HashMap<&str, &coderisk_core::model::Commit> =
            commits.iter().map(|c| (c.sha.as_str(), c)).collect();

        let files: std::collections::HashSet<String> =
            commits.iter().flat_map(|c| c.files.iter().map(|f| f.path.clone())).collect();

        let mut blocks_processed = 0usize;
        let now = chrono::Utc::now();

        for path in files {
            let blocks = ctx.staging.code_blocks_for_file(ctx.repo_id, &path).await?;
            for mut block in blocks {
                let changes = ctx
                    .staging
                    .block_changes_for_block(ctx.repo_id, &path, &block.block_name)
                    .await?;

                let mut dated: Vec<(&coderisk_core::model::Commit, &coderisk_core::model::BlockChange)> = changes
                    .iter()
                    .filter_map(|c| commit_by_sha.get(c.commit_sha.as_str()).map(|commit| (*commit, c)))
                    .collect();
                dated.sort_by_key(|(commit, _)| commit.author_date);

                if dated.is_empty() {
                    continue;
                }

                let original_author = dated.first().map(|(c, _)| c.author_name.clone());
                let last_modifier = dated.last().map(|(c, _)| c.author_name.clone());
                let last_change_date = dated.last().map(|(c, _)| c.author_date);

                let mut familiarity_map: HashMap<String, u32> = HashMap::new();
                for (commit, _) in &dated {
                    *familiarity_map.entry(commit.author_name.clone()).or_insert(0) += 1;
                }

                block.risk.original_author = original_author;
                block.risk.last_modifier = last_modifier;
                block.risk.staleness_days = last_change_date.map(|d| (now - d).num_days());
                block.risk.familiarity_map = familiarity_map;

                ctx.staging.upsert_code_block(&block).await?;
                ctx.graph.update_risk_properties(&block).await?;
                blocks_processed += 1;
                metrics.units_processed += 1;
            }
        }

        let cache_data = bincode::serialize(&S6CacheData { blocks_processed })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageHandler;
    use coderisk_clients::{HttpLlmClient, HttpSourceHostClient};
    use coderisk_core::config::*;
    use coderisk_core::model::{BlockChange, BlockType, ChangeKind, Commit, FileChange, RiskProperties};
    use coderisk_storage::{InMemoryGraphStore, InMemoryStagingStore};
    use std::sync::Arc;
    use uuid::Uuid;

    fn test_ctx() -> StageContext {
        let config = Arc::new(PipelineConfig {
            source_host: SourceHostConfig { base_url: "http://localhost".into(), token: "t".into() },
            llm: LlmConfig {
                endpoint: "http://localhost".into(),
                api_key: "k".into(),
                primary_model: "m".into(),
                prefilter_model: None,
                prefilter_enabled: false,
            },
            store: StoreConfig { staging_dsn: "mem".into(), graph_uri: "mem".into(), graph_user: None, graph_password: None },
            days_window: 90,
            rate_limit: Default::default(),
            pool_sizes: Default::default(),
            chunk_budget_bytes: 1024,
            composite_score_weights: Default::default(),
        });
        StageContext {
            job_id: Uuid::new_v4(),
            repo_id: 1,
            owner: "acme".into(),
            name: "widgets".into(),
            incremental_since: None,
            cache_keys: crate::dag::CacheKeyManager::new(1),
            checkpoint_mgr: Arc::new(crate::checkpoint::CheckpointManager::new_in_memory()),
            config: config.clone(),
            staging: Arc::new(InMemoryStagingStore::new()),
            graph: Arc::new(InMemoryGraphStore::new()),
            source_host: Arc::new(HttpSourceHostClient::new(config.source_host.base_url.clone(), config.source_host.token.clone())),
            llm: Arc::new(HttpLlmClient::new(config.llm.endpoint.clone(), config.llm.api_key.clone(), config.llm.primary_model.clone())),
        }
    }

    fn commit(sha: &str, author: &str, date: chrono::DateTime<chrono::Utc>, path: &str) -> Commit {
        Commit {
            repo_id: 1,
            sha: sha.into(),
            author_name: author.into(),
            author_email: format!("{author}@x.com"),
            author_date: date,
            committer_date: date,
            message: "m".into(),
            parent_shas: vec![],
            files: vec![FileChange { path: path.into(), additions: 1, deletions: 0, patch: None }],
            topological_index: Some(0),
            raw: serde_json::Value::Null,
        }
    }

    // §8 universal invariant 5: re-running IndexOwnership from scratch
    // produces identical familiarity_map/original_author/last_modifier.
    #[tokio::test]
    async fn rerunning_index_ownership_is_idempotent() {
        let mut ctx = test_ctx();
        let t0 = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        use chrono::TimeZone;

        let c1 = commit("c1", "alice", t0, "src/a.rs");
        let c2 = commit("c2", "bob", t1, "src/a.rs");
        ctx.staging.upsert_commit(&c1).await.unwrap();
        ctx.staging.upsert_commit(&c2).await.unwrap();

        let block = test_block();
        ctx.staging.upsert_code_block(&block).await.unwrap();
        ctx.staging
            .upsert_block_change(&BlockChange {
                repo_id: 1,
                canonical_file_path: "src/a.rs".into(),
                block_name: "foo".into(),
                commit_sha: "c1".into(),
                change_kind: ChangeKind::Create,
                patch_snippet: String::new(),
                renamed_from: None,
            })
            .await
            .unwrap();
        ctx.staging
            .upsert_block_change(&BlockChange {
                repo_id: 1,
                canonical_file_path: "src/a.rs".into(),
                block_name: "foo".into(),
                commit_sha: "c2".into(),
                change_kind: ChangeKind::Modify,
                patch_snippet: String::new(),
                renamed_from: None,
            })
            .await
            .unwrap();

        let handler = S6IndexOwnershipHandler::new();
        handler.execute(&mut ctx).await.unwrap();
        let first = ctx.staging.get_code_block(1, "src/a.rs", "foo").await.unwrap().unwrap();

        handler.execute(&mut ctx).await.unwrap();
        let second = ctx.staging.get_code_block(1, "src/a.rs", "foo").await.unwrap().unwrap();

        assert_eq!(first.risk.original_author, second.risk.original_author);
        assert_eq!(first.risk.last_modifier, second.risk.last_modifier);
        assert_eq!(first.risk.familiarity_map, second.risk.familiarity_map);
        assert_eq!(first.risk.original_author, Some("alice".to_string()));
        assert_eq!(first.risk.last_modifier, Some("bob".to_string()));
    }

    fn test_block() -> coderisk_core::model::CodeBlock {
        coderisk_core::model::CodeBlock {
            repo_id: 1,
            canonical_file_path: "src/a.rs".into(),
            block_name: "foo".into(),
            block_type: BlockType::Function,
            language: "rust".into(),
            start_line: 1,
            end_line: 5,
            signature: "fn foo()".into(),
            first_seen_commit_sha: "c1".into(),
            last_modified_commit_sha: "c2".into(),
            risk: RiskProperties::default(),
        }
    }
}
