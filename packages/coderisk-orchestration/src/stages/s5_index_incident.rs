//! S5 IndexIncident — Temporal Risk (§4.5). For every issue with an outgoing
//! FIXED_BY/ASSOCIATED_WITH link, walks issue -> PR -> merge_commit ->
//! MODIFIED_BLOCK -> CodeBlock and accumulates an incident list per block,
//! then asks the LLM for a short natural-language summary once a block has
//! accrued at least two incidents.

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use coderisk_clients::domain::llm::IncidentForSummary;
use coderisk_core::model::{LinkClassification, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
struct S5CacheData {
    blocks_touched: usize,
    summaries_synthesized: usize,
}

pub struct S5IndexIncidentHandler;

impl S5IndexIncidentHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for S5IndexIncidentHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
struct BlockIncidents {
    canonical_file_path: String,
    block_name: String,
    incidents: Vec<IncidentForSummary>,
}

#[async_trait]
impl StageHandler for S5IndexIncidentHandler {
    fn stage_id(&self) -> StageId {
        StageId::S5IndexIncident
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut metrics = StageMetrics::default();
        let links = ctx.staging.issue_pr_links_for_repo(ctx.repo_id).await?;
        let issues = ctx.staging.all_issues(ctx.repo_id).await?;
        let prs = ctx.staging.all_prs(ctx.repo_id).await?;

        // Recomputed from scratch every run so a rerun is idempotent rather
        // than double-counting incidents (§8 invariant 5 applied by analogy).
        let mut per_block: HashMap<(String, String), BlockIncidents> = HashMap::new();

        for link in &links {
            if matches!(link.classify(), LinkClassification::NoLink { .. }) {
                continue;
            }
            let Some(issue) = issues.iter().find(|i| i.number == link.issue_number) else { continue };
            if issue.closed_at.is_none() {
                continue;
            }
            let Some(pr) = prs.iter().find(|p| p.number == link.pr_number) else { continue };
            let Some(merge_sha) = &pr.merge_commit_sha else { continue };
            let Some(commit) = ctx.staging.get_commit(ctx.repo_id, merge_sha).await? else { continue };

            let occurred_at = issue.closed_at.unwrap_or(commit.author_date);

            for file in &commit.files {
                let blocks = ctx.staging.code_blocks_for_file(ctx.repo_id, &file.path).await?;
                for block in blocks {
                    let changes = ctx
                        .staging
                        .block_changes_for_block(ctx.repo_id, &file.path, &block.block_name)
                        .await?;
                    if !changes.iter().any(|c| &c.commit_sha == merge_sha) {
                        continue;
                    }
                    ctx.graph
                        .write_incident_edge(
                            ctx.repo_id,
                            &file.path,
                            &block.block_name,
                            merge_sha,
                            occurred_at,
                            &issue.title,
                        )
                        .await?;

                    let key = (file.path.clone(), block.block_name.clone());
                    let entry = per_block.entry(key).or_insert_with(|| BlockIncidents {
                        canonical_file_path: file.path.clone(),
                        block_name: block.block_name.clone(),
                        incidents: Vec::new(),
                    });
                    entry.incidents.push(IncidentForSummary { title: issue.title.clone(), occurred_at });
                }
            }
        }

        let mut summaries_synthesized = 0usize;
        for incidents in per_block.values() {
            let Some(mut block) = ctx
                .staging
                .get_code_block(ctx.repo_id, &incidents.canonical_file_path, &incidents.block_name)
                .await?
            else {
                continue;
            };

            block.risk.incident_count = incidents.incidents.len() as u32;
            block.risk.last_incident_date = incidents.incidents.iter().map(|i| i.occurred_at).max();

            if incidents.incidents.len() >= 2 {
                match ctx.llm.synthesize_temporal_summary(&incidents.incidents).await {
                    Ok(summary) if !summary.is_empty() => {
                        block.risk.temporal_summary = Some(summary);
                        summaries_synthesized += 1;
                    }
                    // Empty or failed synthesis leaves any prior summary in
                    // place rather than clearing it (§7 "Open Questions"
                    // resolution, documented in DESIGN.md).
                    _ => {}
                }
            }

            ctx.staging.upsert_code_block(&block).await?;
            ctx.graph.update_risk_properties(&block).await?;
            metrics.units_processed += 1;
        }

        let cache_data = bincode::serialize(&S5CacheData {
            blocks_touched: per_block.len(),
            summaries_synthesized,
        })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_incidents_default_is_empty() {
        let b = BlockIncidents::default();
        assert!(b.incidents.is_empty());
    }
}
