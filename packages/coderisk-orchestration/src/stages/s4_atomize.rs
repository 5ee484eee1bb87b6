//! S4 Atomize — the hardest subsystem (§4.4). Consumes commits strictly in
//! ascending `topological_index`, chunks per-file patches on `@@` hunk
//! boundaries, runs the dual-stage LLM pass (cheap pre-filter, then primary
//! extraction), resolves ambiguous modification targets, and dead-letters
//! whatever cannot be resolved rather than aborting the run.

use crate::deadletter::DeadLetterDrain;
use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use chrono::Utc;
use coderisk_clients::domain::llm::{
    BlockChangeKindHint, EntityResolutionCandidate, ExtractedBlock, PreFilterCandidate,
};
use coderisk_core::block_detector::detect_blocks;
use coderisk_core::model::{
    BlockChange, BlockType, ChangeKind, CodeBlock, Commit, DeadLetter, DeadLetterStatus,
    RiskProperties, StageId, UnitKind,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct S4CacheData {
    commits_processed: usize,
    highest_topological_index: Option<u64>,
}

pub struct S4AtomizeHandler;

impl S4AtomizeHandler {
    pub fn new() -> Self {
        Self
    }

    /// Splits on `@@` hunk headers and never inside a hunk; groups whole
    /// hunks into chunks capped at `budget_bytes` (§4.4 "Diff chunking").
    fn chunk_patch(patch: &str, budget_bytes: usize) -> Vec<String> {
        let mut hunks = Vec::new();
        let mut current = String::new();
        for line in patch.lines() {
            if line.starts_with("@@") && !current.is_empty() {
                hunks.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.is_empty() {
            hunks.push(current);
        }

        let mut chunks = Vec::new();
        let mut chunk = String::new();
        for hunk in hunks {
            if !chunk.is_empty() && chunk.len() + hunk.len() > budget_bytes {
                chunks.push(std::mem::take(&mut chunk));
            }
            chunk.push_str(&hunk);
        }
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        chunks
    }

    fn map_block_type(name: &str) -> BlockType {
        match name {
            "method" => BlockType::Method,
            "class" => BlockType::Class,
            "component" => BlockType::Component,
            "enum" => BlockType::Enum,
            "interface" => BlockType::Interface,
            "type" => BlockType::Type,
            _ => BlockType::Function,
        }
    }

    /// Regex fallback used when the primary model call itself errors
    /// (timeout, invalid JSON) — scans the patch's added lines rather than
    /// a working-tree checkout, since only patch text is staged (§4.4
    /// "Language coverage").
    fn fallback_extract(patch_chunk: &str) -> Vec<ExtractedBlock> {
        let added: Vec<&str> = patch_chunk
            .lines()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .map(|l| &l[1..])
            .collect();

        detect_blocks(&added)
            .into_iter()
            .map(|b| ExtractedBlock {
                block_name: b.name,
                block_type: format!("{:?}", b.block_type).to_lowercase(),
                kind: BlockChangeKindHint::Modify,
                renamed_from: None,
                start_line: b.start_line,
                end_line: b.start_line,
                signature: String::new(),
                patch_snippet: patch_chunk.chars().take(500).collect(),
            })
            .collect()
    }

    async fn process_commit(&self, ctx: &mut StageContext, commit: &Commit) -> Result<usize> {
        let mut units = 0usize;

        let significant_paths: Vec<String> = if ctx.config.llm.prefilter_enabled {
            let candidates: Vec<PreFilterCandidate> = commit
                .files
                .iter()
                .map(|f| PreFilterCandidate {
                    path: f.path.clone(),
                    one_line_summary: format!("+{} -{} lines", f.additions, f.deletions),
                })
                .collect();
            match ctx.llm.pre_filter(&candidates).await {
                Ok(result) => result.likely_significant_paths,
                Err(_) => commit.files.iter().map(|f| f.path.clone()).collect(),
            }
        } else {
            commit.files.iter().map(|f| f.path.clone()).collect()
        };

        for file in commit.files.iter().filter(|f| significant_paths.contains(&f.path)) {
            let Some(patch) = &file.patch else { continue };
            let chunks = Self::chunk_patch(patch, ctx.config.chunk_budget_bytes);

            for chunk in chunks {
                let extracted = match ctx.llm.atomize(&file.path, &chunk).await {
                    Ok(result) => result.blocks,
                    Err(_) => Self::fallback_extract(&chunk),
                };

                for block in extracted {
                    if self.apply_block_change(ctx, commit, &file.path, block).await? {
                        units += 1;
                    }
                }
            }
        }

        Ok(units)
    }

    async fn apply_block_change(
        &self,
        ctx: &mut StageContext,
        commit: &Commit,
        path: &str,
        extracted: ExtractedBlock,
    ) -> Result<bool> {
        let change_kind = match extracted.kind {
            BlockChangeKindHint::Create => ChangeKind::Create,
            BlockChangeKindHint::Modify => ChangeKind::Modify,
            BlockChangeKindHint::Delete => ChangeKind::Delete,
            BlockChangeKindHint::Rename => ChangeKind::Rename,
        };

        if matches!(change_kind, ChangeKind::Create) {
            let block = CodeBlock {
                repo_id: commit.repo_id,
                canonical_file_path: path.to_string(),
                block_name: extracted.block_name.clone(),
                block_type: Self::map_block_type(&extracted.block_type),
                language: String::new(),
                start_line: extracted.start_line,
                end_line: extracted.end_line,
                signature: extracted.signature.clone(),
                first_seen_commit_sha: commit.sha.clone(),
                last_modified_commit_sha: commit.sha.clone(),
                risk: RiskProperties::default(),
            };
            ctx.staging.upsert_code_block(&block).await?;
            ctx.graph.upsert_code_block_node(&block).await?;
            self.write_change(ctx, commit, path, &extracted.block_name, change_kind, extracted.patch_snippet, None).await?;
            return Ok(true);
        }

        if matches!(change_kind, ChangeKind::Rename) {
            let Some(from) = &extracted.renamed_from else { return Ok(false) };
            let Some(mut predecessor) = ctx.staging.get_code_block(commit.repo_id, path, from).await? else {
                return Ok(false);
            };
            predecessor.block_name = extracted.block_name.clone();
            predecessor.last_modified_commit_sha = commit.sha.clone();
            predecessor.start_line = extracted.start_line;
            predecessor.end_line = extracted.end_line;
            predecessor.signature = extracted.signature.clone();
            ctx.staging.upsert_code_block(&predecessor).await?;
            ctx.graph.upsert_code_block_node(&predecessor).await?;
            self.write_change(ctx, commit, path, &extracted.block_name, change_kind, extracted.patch_snippet, Some(from.clone())).await?;
            return Ok(true);
        }

        // Modify or Delete: resolve the target by exact match first, falling
        // back to the LLM's fuzzy entity resolution (§4.4 "Entity resolution").
        if let Some(mut existing) = ctx.staging.get_code_block(commit.repo_id, path, &extracted.block_name).await? {
            if matches!(change_kind, ChangeKind::Modify) {
                existing.last_modified_commit_sha = commit.sha.clone();
                existing.start_line = extracted.start_line;
                existing.end_line = extracted.end_line;
                existing.signature = extracted.signature.clone();
                ctx.staging.upsert_code_block(&existing).await?;
                ctx.graph.upsert_code_block_node(&existing).await?;
            }
            self.write_change(ctx, commit, path, &extracted.block_name, change_kind, extracted.patch_snippet, None).await?;
            return Ok(true);
        }

        let file_blocks = ctx.staging.code_blocks_for_file(commit.repo_id, path).await?;
        if file_blocks.is_empty() {
            return Ok(false);
        }

        let candidates: Vec<EntityResolutionCandidate> = file_blocks
            .iter()
            .map(|b| EntityResolutionCandidate {
                block_name: b.block_name.clone(),
                signature: b.signature.clone(),
                start_line: b.start_line,
            })
            .collect();

        let resolution = ctx
            .llm
            .resolve_entity(&extracted.patch_snippet, &candidates)
            .await
            .unwrap_or(coderisk_clients::domain::llm::EntityResolutionResult { chosen_start_line: None, confidence: 0.0 });

        let resolved = resolution.confidence >= 0.70 && resolution.chosen_start_line.is_some();
        if !resolved {
            let now = Utc::now();
            let drain = DeadLetterDrain::new(ctx.staging.clone());
            drain
                .record_retry_failure(
                    DeadLetter {
                        repo_id: commit.repo_id,
                        unit_kind: UnitKind::EntityResolution,
                        unit_id: format!("{}:{}:{}", path, extracted.block_name, commit.sha),
                        error: "entity resolution confidence below 0.70".into(),
                        attempts: 0,
                        first_seen: now,
                        last_seen: now,
                        status: DeadLetterStatus::Pending,
                    },
                    "unresolved modification target".into(),
                )
                .await?;
            return Ok(false);
        }

        let target_line = resolution.chosen_start_line.unwrap();
        if let Some(mut resolved_block) = file_blocks.into_iter().find(|b| b.start_line == target_line) {
            if matches!(change_kind, ChangeKind::Modify) {
                resolved_block.last_modified_commit_sha = commit.sha.clone();
                ctx.staging.upsert_code_block(&resolved_block).await?;
                ctx.graph.upsert_code_block_node(&resolved_block).await?;
            }
            self.write_change(ctx, commit, path, &resolved_block.block_name, change_kind, extracted.patch_snippet, None).await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn write_change(
        &self,
        ctx: &mut StageContext,
        commit: &Commit,
        path: &str,
        block_name: &str,
        change_kind: ChangeKind,
        patch_snippet: String,
        renamed_from: Option<String>,
    ) -> Result<()> {
        let change = BlockChange {
            repo_id: commit.repo_id,
            canonical_file_path: path.to_string(),
            block_name: block_name.to_string(),
            commit_sha: commit.sha.clone(),
            change_kind,
            patch_snippet,
            renamed_from,
        };
        ctx.staging.upsert_block_change(&change).await?;
        ctx.graph.write_block_change_edge(&change).await?;
        Ok(())
    }
}

impl Default for S4AtomizeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S4AtomizeHandler {
    fn stage_id(&self) -> StageId {
        StageId::S4Atomize
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut commits = ctx.staging.unprocessed_commits(ctx.repo_id).await?;
        commits.sort_by_key(|c| c.topological_index.unwrap_or(u64::MAX));

        let mut metrics = StageMetrics::default();
        let mut highest_topological_index = None;

        for commit in &commits {
            match self.process_commit(ctx, commit).await {
                Ok(units) => {
                    metrics.units_processed += units;
                    ctx.staging.mark_commit_processed(ctx.repo_id, &commit.sha).await?;
                    highest_topological_index = commit.topological_index.max(highest_topological_index);
                }
                Err(e) if e.category() == coderisk_core::error::ErrorCategory::Invariant => return Err(e),
                Err(e) => {
                    metrics.units_dead_lettered += 1;
                    metrics.errors.push(e.to_string());
                    let now = Utc::now();
                    ctx.staging
                        .upsert_dead_letter(&DeadLetter {
                            repo_id: ctx.repo_id,
                            unit_kind: UnitKind::CommitAtomization,
                            unit_id: commit.sha.clone(),
                            error: e.to_string(),
                            attempts: 0,
                            first_seen: now,
                            last_seen: now,
                            status: DeadLetterStatus::Pending,
                        })
                        .await?;
                }
            }
        }

        let cache_data = bincode::serialize(&S4CacheData {
            commits_processed: commits.len(),
            highest_topological_index,
        })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_patch_never_splits_within_a_hunk() {
        let patch = "@@ -1,3 +1,4 @@\n-old\n+new\n+new2\n@@ -10,2 +11,2 @@\n-foo\n+bar\n";
        let chunks = S4AtomizeHandler::chunk_patch(patch, 1024);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("@@ -1,3"));
        assert!(chunks[0].contains("@@ -10,2"));
    }

    #[test]
    fn chunk_patch_splits_across_budget_boundary() {
        let hunk = format!("@@ -1,1 +1,1 @@\n+{}\n", "x".repeat(80));
        let patch = hunk.repeat(3);
        let chunks = S4AtomizeHandler::chunk_patch(&patch, 100);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.starts_with("@@"));
        }
    }

    #[test]
    fn fallback_extract_finds_function_in_added_lines() {
        let chunk = "@@ -1,1 +1,2 @@\n+def handler():\n+    pass\n";
        let blocks = S4AtomizeHandler::fallback_extract(chunk);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_name, "handler");
    }
}
