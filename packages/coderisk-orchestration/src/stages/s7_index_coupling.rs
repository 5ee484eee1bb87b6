//! S7 IndexCoupling — Coupling Risk (§4.7). For each pair of blocks that
//! co-occur in the same commit at least twice within the window, emits a
//! CO_CHANGES_WITH edge once co_change_rate >= 0.50 and co_change_count >= 2,
//! then folds co-change + incident + staleness + familiarity into the
//! composite risk_score (final stage in the chain).

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use coderisk_core::model::StageId;
use coderisk_core::risk_score::{composite_risk_score, RiskWeights, SaturationConstants};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

type BlockKey = (String, String);

#[derive(Debug, Serialize, Deserialize)]
struct S7CacheData {
    pairs_considered: usize,
    edges_written: usize,
}

pub struct S7IndexCouplingHandler;

impl S7IndexCouplingHandler {
    pub fn new() -> Self {
        Self
    }

    fn pair_key(a: &BlockKey, b: &BlockKey) -> (BlockKey, BlockKey) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}

impl Default for S7IndexCouplingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S7IndexCouplingHandler {
    fn stage_id(&self) -> StageId {
        StageId::S7IndexCoupling
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut metrics = StageMetrics::default();
        let commits = ctx.staging.all_commits(ctx.repo_id).await?;

        let files: HashSet<String> =
            commits.iter().flat_map(|c| c.files.iter().map(|f| f.path.clone())).collect();

        // block_name -> set of all-blocks-in-file, to avoid re-fetching per commit.
        let mut blocks_by_file: HashMap<String, Vec<String>> = HashMap::new();
        for path in &files {
            let blocks = ctx.staging.code_blocks_for_file(ctx.repo_id, path).await?;
            blocks_by_file.insert(path.clone(), blocks.into_iter().map(|b| b.block_name).collect());
        }

        let mut commit_blocks: HashMap<String, HashSet<BlockKey>> = HashMap::new();
        for (path, names) in &blocks_by_file {
            for name in names {
                let changes = ctx.staging.block_changes_for_block(ctx.repo_id, path, name).await?;
                for change in changes {
                    commit_blocks
                        .entry(change.commit_sha.clone())
                        .or_default()
                        .insert((path.clone(), name.clone()));
                }
            }
        }

        let mut block_commit_count: HashMap<BlockKey, u32> = HashMap::new();
        let mut pair_commit_count: HashMap<(BlockKey, BlockKey), u32> = HashMap::new();

        for touched in commit_blocks.values() {
            for key in touched {
                *block_commit_count.entry(key.clone()).or_insert(0) += 1;
            }
            let ordered: Vec<&BlockKey> = touched.iter().collect();
            for i in 0..ordered.len() {
                for j in (i + 1)..ordered.len() {
                    let key = Self::pair_key(ordered[i], ordered[j]);
                    *pair_commit_count.entry(key).or_insert(0) += 1;
                }
            }
        }

        let mut per_block_coupling: HashMap<BlockKey, (u32, Vec<f64>)> = HashMap::new();
        let mut edges_written = 0usize;

        for ((a, b), count) in &pair_commit_count {
            if *count < 2 {
                continue;
            }
            let count_a = *block_commit_count.get(a).unwrap_or(&0);
            let count_b = *block_commit_count.get(b).unwrap_or(&0);
            let denom = count_a.min(count_b).max(1);
            let rate = *count as f64 / denom as f64;

            if rate >= 0.50 {
                ctx.graph
                    .write_coupling_edge(
                        ctx.repo_id,
                        (a.0.as_str(), a.1.as_str()),
                        (b.0.as_str(), b.1.as_str()),
                        *count,
                        rate,
                        false,
                    )
                    .await?;
                edges_written += 1;

                let entry_a = per_block_coupling.entry(a.clone()).or_insert((0, Vec::new()));
                entry_a.0 += count;
                entry_a.1.push(rate);
                let entry_b = per_block_coupling.entry(b.clone()).or_insert((0, Vec::new()));
                entry_b.0 += count;
                entry_b.1.push(rate);
            }
        }

        let weights: RiskWeights = ctx.config.composite_score_weights.into();
        let saturation = SaturationConstants::default();

        for path in &files {
            let blocks = ctx.staging.code_blocks_for_file(ctx.repo_id, path).await?;
            for mut block in blocks {
                let key = (path.clone(), block.block_name.clone());
                if let Some((co_change_count, rates)) = per_block_coupling.get(&key) {
                    block.risk.co_change_count = *co_change_count;
                    block.risk.avg_coupling_rate = rates.iter().sum::<f64>() / rates.len() as f64;
                }

                block.risk.risk_score = composite_risk_score(
                    block.risk.incident_count,
                    block.risk.avg_coupling_rate,
                    block.risk.staleness_days,
                    &block.risk.familiarity_map,
                    &weights,
                    &saturation,
                );

                ctx.staging.upsert_code_block(&block).await?;
                ctx.graph.update_risk_properties(&block).await?;
                metrics.units_processed += 1;
            }
        }

        let cache_data = bincode::serialize(&S7CacheData {
            pairs_considered: pair_commit_count.len(),
            edges_written,
        })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = ("a.rs".to_string(), "foo".to_string());
        let b = ("b.rs".to_string(), "bar".to_string());
        assert_eq!(S7IndexCouplingHandler::pair_key(&a, &b), S7IndexCouplingHandler::pair_key(&b, &a));
    }
}
