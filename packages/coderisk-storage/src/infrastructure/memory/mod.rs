//! DashMap-backed in-memory stores, in the shape of codegraph-orchestration's
//! `CheckpointManager::new_in_memory` — interface-first so the trait can be
//! exercised in tests without a database, and swapped later for the real
//! backend with no call-site changes.

use crate::domain::{
    CoupledBlock, GraphStore, IncidentSummary, OwnershipSummary, StagingStore,
};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use coderisk_core::model::{
    BlockChange, CodeBlock, Comment, Commit, DeadLetter, FileIdentity, IngestionJob, Issue,
    IssuePRLink, PullRequest, Repository, StageId, TimelineEvent,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStagingStore {
    repositories: DashMap<i64, Repository>,
    repo_by_full_name: DashMap<(String, String), i64>,
    next_repo_id: AtomicI64,

    commits: DashMap<(i64, String), Commit>,
    processed_commits: DashMap<(i64, String), ()>,

    file_identities: DashMap<(i64, String), FileIdentity>,

    issues: DashMap<(i64, u64), Issue>,
    processed_issues: DashMap<(i64, u64), ()>,

    pull_requests: DashMap<(i64, u64), PullRequest>,
    processed_prs: DashMap<(i64, u64), ()>,

    comments: DashMap<(i64, u64, usize), Comment>,
    timeline_events: RwLock<Vec<TimelineEvent>>,

    issue_pr_links: DashMap<(i64, u64, u64), IssuePRLink>,

    code_blocks: DashMap<(i64, String, String), CodeBlock>,
    block_changes: RwLock<Vec<BlockChange>>,

    ingestion_jobs: DashMap<(i64, StageId), IngestionJob>,
    dead_letters: RwLock<Vec<DeadLetter>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self { next_repo_id: AtomicI64::new(1), ..Default::default() }
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn upsert_repository(&self, repo: &Repository) -> Result<i64> {
        let id = if repo.id != 0 {
            repo.id
        } else {
            self.next_repo_id.fetch_add(1, Ordering::SeqCst)
        };
        let mut stored = repo.clone();
        stored.id = id;
        self.repo_by_full_name
            .insert((stored.owner.clone(), stored.name.clone()), id);
        self.repositories.insert(id, stored);
        Ok(id)
    }

    async fn get_repository(&self, repo_id: i64) -> Result<Repository> {
        self.repositories
            .get(&repo_id)
            .map(|r| r.clone())
            .ok_or_else(|| StorageError::not_found("Repository", repo_id))
    }

    async fn find_repository_by_full_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let key = (owner.to_string(), name.to_string());
        Ok(self
            .repo_by_full_name
            .get(&key)
            .and_then(|id| self.repositories.get(&id).map(|r| r.clone())))
    }

    async fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        self.commits.insert((commit.repo_id, commit.sha.clone()), commit.clone());
        Ok(())
    }

    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()> {
        for c in commits {
            self.upsert_commit(c).await?;
        }
        Ok(())
    }

    async fn get_commit(&self, repo_id: i64, sha: &str) -> Result<Option<Commit>> {
        Ok(self.commits.get(&(repo_id, sha.to_string())).map(|c| c.clone()))
    }

    async fn unprocessed_commits(&self, repo_id: i64) -> Result<Vec<Commit>> {
        Ok(self
            .commits
            .iter()
            .filter(|e| e.key().0 == repo_id && !self.processed_commits.contains_key(e.key()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn mark_commit_processed(&self, repo_id: i64, sha: &str) -> Result<()> {
        self.processed_commits.insert((repo_id, sha.to_string()), ());
        Ok(())
    }

    async fn all_commits(&self, repo_id: i64) -> Result<Vec<Commit>> {
        Ok(self
            .commits
            .iter()
            .filter(|e| e.key().0 == repo_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_file_identity(&self, identity: &FileIdentity) -> Result<()> {
        self.file_identities
            .insert((identity.repo_id, identity.canonical_path.clone()), identity.clone());
        Ok(())
    }

    async fn all_file_identities(&self, repo_id: i64) -> Result<Vec<FileIdentity>> {
        Ok(self
            .file_identities
            .iter()
            .filter(|e| e.key().0 == repo_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_issue(&self, issue: &Issue) -> Result<()> {
        self.issues.insert((issue.repo_id, issue.number), issue.clone());
        Ok(())
    }

    async fn unprocessed_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        Ok(self
            .issues
            .iter()
            .filter(|e| e.key().0 == repo_id && !self.processed_issues.contains_key(e.key()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn mark_issue_processed(&self, repo_id: i64, number: u64) -> Result<()> {
        self.processed_issues.insert((repo_id, number), ());
        Ok(())
    }

    async fn all_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        Ok(self
            .issues
            .iter()
            .filter(|e| e.key().0 == repo_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_pull_request(&self, pr: &PullRequest) -> Result<()> {
        self.pull_requests.insert((pr.repo_id, pr.number), pr.clone());
        Ok(())
    }

    async fn unprocessed_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>> {
        Ok(self
            .pull_requests
            .iter()
            .filter(|e| e.key().0 == repo_id && !self.processed_prs.contains_key(e.key()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn mark_pr_processed(&self, repo_id: i64, number: u64) -> Result<()> {
        self.processed_prs.insert((repo_id, number), ());
        Ok(())
    }

    async fn all_prs(&self, repo_id: i64) -> Result<Vec<PullRequest>> {
        Ok(self
            .pull_requests
            .iter()
            .filter(|e| e.key().0 == repo_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<()> {
        let idx = self.comments.len();
        self.comments.insert((comment.repo_id, comment.parent_number, idx), comment.clone());
        Ok(())
    }

    async fn upsert_timeline_event(&self, event: &TimelineEvent) -> Result<()> {
        self.timeline_events.write().unwrap().push(event.clone());
        Ok(())
    }

    async fn timeline_events_for_issue(&self, repo_id: i64, issue_number: u64) -> Result<Vec<TimelineEvent>> {
        Ok(self
            .timeline_events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.repo_id == repo_id && e.issue_number == issue_number)
            .cloned()
            .collect())
    }

    async fn upsert_issue_pr_link(&self, link: &IssuePRLink) -> Result<()> {
        self.issue_pr_links
            .insert((link.repo_id, link.issue_number, link.pr_number), link.clone());
        Ok(())
    }

    async fn issue_pr_links_for_repo(&self, repo_id: i64) -> Result<Vec<IssuePRLink>> {
        Ok(self
            .issue_pr_links
            .iter()
            .filter(|e| e.key().0 == repo_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_code_block(&self, block: &CodeBlock) -> Result<()> {
        self.code_blocks.insert(
            (block.repo_id, block.canonical_file_path.clone(), block.block_name.clone()),
            block.clone(),
        );
        Ok(())
    }

    async fn get_code_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>> {
        Ok(self
            .code_blocks
            .get(&(repo_id, canonical_file_path.to_string(), block_name.to_string()))
            .map(|b| b.clone()))
    }

    async fn code_blocks_for_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>> {
        Ok(self
            .code_blocks
            .iter()
            .filter(|e| e.key().0 == repo_id && e.key().1 == canonical_file_path)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_block_change(&self, change: &BlockChange) -> Result<()> {
        self.block_changes.write().unwrap().push(change.clone());
        Ok(())
    }

    async fn block_changes_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<BlockChange>> {
        Ok(self
            .block_changes
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.repo_id == repo_id && c.canonical_file_path == canonical_file_path && c.block_name == block_name)
            .cloned()
            .collect())
    }

    async fn upsert_ingestion_job(&self, job: &IngestionJob) -> Result<()> {
        self.ingestion_jobs.insert((job.repo_id, job.stage), job.clone());
        Ok(())
    }

    async fn get_ingestion_job(&self, repo_id: i64, stage: StageId) -> Result<Option<IngestionJob>> {
        Ok(self.ingestion_jobs.get(&(repo_id, stage)).map(|j| j.clone()))
    }

    async fn upsert_dead_letter(&self, entry: &DeadLetter) -> Result<()> {
        let mut letters = self.dead_letters.write().unwrap();
        if let Some(existing) = letters
            .iter_mut()
            .find(|e| e.repo_id == entry.repo_id && e.unit_kind == entry.unit_kind && e.unit_id == entry.unit_id)
        {
            *existing = entry.clone();
        } else {
            letters.push(entry.clone());
        }
        Ok(())
    }

    async fn pending_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>> {
        Ok(self
            .dead_letters
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.repo_id == repo_id && e.status == coderisk_core::model::DeadLetterStatus::Pending)
            .cloned()
            .collect())
    }

    async fn abandoned_dead_letters(&self, repo_id: i64) -> Result<Vec<DeadLetter>> {
        Ok(self
            .dead_letters
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.repo_id == repo_id && e.status == coderisk_core::model::DeadLetterStatus::Abandoned)
            .cloned()
            .collect())
    }

    async fn entity_counts(&self, repo_id: i64) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        counts.insert("commit".to_string(), self.commits.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        counts.insert("issue".to_string(), self.issues.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        counts.insert("pull_request".to_string(), self.pull_requests.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        counts.insert("code_block".to_string(), self.code_blocks.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        counts.insert("issue_pr_link".to_string(), self.issue_pr_links.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        Ok(counts)
    }

    async fn truncate_derived(&self, repo_id: i64) -> Result<()> {
        self.code_blocks.retain(|k, _| k.0 != repo_id);
        self.issue_pr_links.retain(|k, _| k.0 != repo_id);
        self.block_changes.write().unwrap().retain(|c| c.repo_id != repo_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    commit_nodes: DashMap<(i64, String), ()>,
    block_nodes: DashMap<(i64, String, String), CodeBlock>,
    issue_pr_edges: DashMap<(i64, u64, u64), IssuePRLink>,
    block_changes: RwLock<Vec<BlockChange>>,
    coupling_edges: RwLock<Vec<(i64, (String, String), (String, String), u32, f64, bool)>>,
    incidents: RwLock<Vec<(i64, String, String, IncidentSummary)>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_commit_node(&self, repo_id: i64, commit: &Commit) -> Result<()> {
        self.commit_nodes.insert((repo_id, commit.sha.clone()), ());
        Ok(())
    }

    async fn upsert_developer_node(&self, _repo_id: i64, _email: &str, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert_file_node(&self, _repo_id: i64, _canonical_path: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert_code_block_node(&self, block: &CodeBlock) -> Result<()> {
        self.block_nodes.insert(
            (block.repo_id, block.canonical_file_path.clone(), block.block_name.clone()),
            block.clone(),
        );
        Ok(())
    }

    async fn upsert_issue_node(&self, _issue: &Issue) -> Result<()> {
        Ok(())
    }

    async fn upsert_pr_node(&self, _pr: &PullRequest) -> Result<()> {
        Ok(())
    }

    async fn write_commit_edges(&self, _repo_id: i64, _commit: &Commit) -> Result<()> {
        Ok(())
    }

    async fn write_issue_pr_link_edge(&self, link: &IssuePRLink) -> Result<()> {
        self.issue_pr_edges
            .insert((link.repo_id, link.issue_number, link.pr_number), link.clone());
        Ok(())
    }

    async fn write_block_change_edge(&self, change: &BlockChange) -> Result<()> {
        self.block_changes.write().unwrap().push(change.clone());
        Ok(())
    }

    async fn write_coupling_edge(
        &self,
        repo_id: i64,
        a: (&str, &str),
        b: (&str, &str),
        co_change_count: u32,
        co_change_rate: f64,
        via_import: bool,
    ) -> Result<()> {
        self.coupling_edges.write().unwrap().push((
            repo_id,
            (a.0.to_string(), a.1.to_string()),
            (b.0.to_string(), b.1.to_string()),
            co_change_count,
            co_change_rate,
            via_import,
        ));
        Ok(())
    }

    async fn write_incident_edge(
        &self,
        repo_id: i64,
        canonical_file_path: &str,
        block_name: &str,
        commit_sha: &str,
        occurred_at: chrono::DateTime<chrono::Utc>,
        summary: &str,
    ) -> Result<()> {
        self.incidents.write().unwrap().push((
            repo_id,
            canonical_file_path.to_string(),
            block_name.to_string(),
            IncidentSummary { commit_sha: commit_sha.to_string(), occurred_at, summary: summary.to_string() },
        ));
        Ok(())
    }

    async fn update_risk_properties(&self, block: &CodeBlock) -> Result<()> {
        self.block_nodes.insert(
            (block.repo_id, block.canonical_file_path.clone(), block.block_name.clone()),
            block.clone(),
        );
        Ok(())
    }

    async fn block_by_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>> {
        Ok(self
            .block_nodes
            .iter()
            .filter(|e| e.key().0 == repo_id && e.key().1 == canonical_file_path)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn block_risk(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>> {
        Ok(self
            .block_nodes
            .get(&(repo_id, canonical_file_path.to_string(), block_name.to_string()))
            .map(|b| b.clone()))
    }

    async fn coupled_blocks(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<CoupledBlock>> {
        let key = (canonical_file_path.to_string(), block_name.to_string());
        Ok(self
            .coupling_edges
            .read()
            .unwrap()
            .iter()
            .filter(|(r, a, b, ..)| *r == repo_id && (*a == key || *b == key))
            .map(|(_, a, b, count, rate, via_import)| {
                let other = if *a == key { b } else { a };
                CoupledBlock {
                    canonical_file_path: other.0.clone(),
                    block_name: other.1.clone(),
                    co_change_count: *count,
                    co_change_rate: *rate,
                    via_import: *via_import,
                }
            })
            .collect())
    }

    async fn incidents_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<IncidentSummary>> {
        Ok(self
            .incidents
            .read()
            .unwrap()
            .iter()
            .filter(|(r, f, b, _)| *r == repo_id && f == canonical_file_path && b == block_name)
            .map(|(_, _, _, s)| s.clone())
            .collect())
    }

    async fn ownership_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<OwnershipSummary>> {
        Ok(self
            .block_nodes
            .get(&(repo_id, canonical_file_path.to_string(), block_name.to_string()))
            .map(|b| OwnershipSummary {
                original_author: b.risk.original_author.clone(),
                last_modifier: b.risk.last_modifier.clone(),
                familiarity_map: b.risk.familiarity_map.clone(),
            }))
    }

    async fn node_counts(&self, repo_id: i64) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        counts.insert("Commit".to_string(), self.commit_nodes.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        counts.insert("CodeBlock".to_string(), self.block_nodes.iter().filter(|e| e.key().0 == repo_id).count() as u64);
        Ok(counts)
    }

    async fn truncate_repo(&self, repo_id: i64) -> Result<()> {
        self.commit_nodes.retain(|k, _| k.0 != repo_id);
        self.block_nodes.retain(|k, _| k.0 != repo_id);
        self.issue_pr_edges.retain(|k, _| k.0 != repo_id);
        self.coupling_edges.write().unwrap().retain(|(r, ..)| *r != repo_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderisk_core::model::{BlockType, IngestionStatus, RiskProperties};

    fn repo(owner: &str, name: &str) -> Repository {
        Repository { id: 0, owner: owner.into(), name: name.into(), ingestion_status: IngestionStatus::Pending, parent_shas_hash: None }
    }

    #[tokio::test]
    async fn upsert_repository_assigns_id_and_is_findable_by_full_name() {
        let store = InMemoryStagingStore::new();
        let id = store.upsert_repository(&repo("acme", "widget")).await.unwrap();
        assert_eq!(id, 1);

        let found = store.find_repository_by_full_name("acme", "widget").await.unwrap().unwrap();
        assert_eq!(found.id, 1);
    }

    #[tokio::test]
    async fn unprocessed_commits_excludes_marked_ones() {
        let store = InMemoryStagingStore::new();
        let commit = Commit {
            repo_id: 1,
            sha: "abc".into(),
            author_name: "a".into(),
            author_email: "a@x.com".into(),
            author_date: chrono::Utc::now(),
            committer_date: chrono::Utc::now(),
            message: "m".into(),
            parent_shas: vec![],
            files: vec![],
            topological_index: Some(0),
            raw: serde_json::Value::Null,
        };
        store.upsert_commit(&commit).await.unwrap();
        assert_eq!(store.unprocessed_commits(1).await.unwrap().len(), 1);

        store.mark_commit_processed(1, "abc").await.unwrap();
        assert_eq!(store.unprocessed_commits(1).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn graph_store_round_trips_block_risk_and_coupling() {
        let store = InMemoryGraphStore::new();
        let block = CodeBlock {
            repo_id: 1,
            canonical_file_path: "src/a.rs".into(),
            block_name: "foo".into(),
            block_type: BlockType::Function,
            language: "rust".into(),
            start_line: 1,
            end_line: 10,
            signature: "fn foo()".into(),
            first_seen_commit_sha: "abc".into(),
            last_modified_commit_sha: "abc".into(),
            risk: RiskProperties::default(),
        };
        store.upsert_code_block_node(&block).await.unwrap();
        store
            .write_coupling_edge(1, ("src/a.rs", "foo"), ("src/b.rs", "bar"), 3, 0.75, false)
            .await
            .unwrap();

        let fetched = store.block_risk(1, "src/a.rs", "foo").await.unwrap().unwrap();
        assert_eq!(fetched.block_name, "foo");

        let coupled = store.coupled_blocks(1, "src/a.rs", "foo").await.unwrap();
        assert_eq!(coupled.len(), 1);
        assert_eq!(coupled[0].block_name, "bar");
        assert_eq!(coupled[0].co_change_count, 3);
    }

    // §8 universal invariant 1: for every graph node, there is a staging row
    // with the same natural key. Here the "write" is the upsert a stage would
    // perform against both stores for the same CodeBlock; the natural key is
    // (repo_id, canonical_file_path, block_name).
    #[tokio::test]
    async fn every_graph_block_node_has_a_matching_staging_row_by_natural_key() {
        let staging = InMemoryStagingStore::new();
        let graph = InMemoryGraphStore::new();

        let block = CodeBlock {
            repo_id: 1,
            canonical_file_path: "src/a.rs".into(),
            block_name: "foo".into(),
            block_type: BlockType::Function,
            language: "rust".into(),
            start_line: 1,
            end_line: 10,
            signature: "fn foo()".into(),
            first_seen_commit_sha: "abc".into(),
            last_modified_commit_sha: "abc".into(),
            risk: RiskProperties::default(),
        };
        staging.upsert_code_block(&block).await.unwrap();
        graph.upsert_code_block_node(&block).await.unwrap();

        for node in graph.block_by_file(1, "src/a.rs").await.unwrap() {
            let staged = staging
                .get_code_block(1, &node.canonical_file_path, &node.block_name)
                .await
                .unwrap();
            assert!(staged.is_some(), "graph node {:?}/{:?} has no staging counterpart", node.canonical_file_path, node.block_name);
        }
    }
}
