//! Stage dependency graph. The teacher's `PipelineDAG` supports parallel
//! execution waves (its own pipeline is L1∥L3 -> L2 -> L4); coderisk's chain
//! is strictly sequential (§2: "S1->S7 sequentially... refuses to proceed
//! past a failed stage"), so this is a linear specialization of the same
//! shape — one stage per wave, each depending only on its immediate
//! predecessor. The cache-key and stage-node concepts are kept as-is since
//! checkpointing still keys on (repo, stage) regardless of fan-out.

use coderisk_core::model::StageId;

/// Derives the checkpoint cache key for a (repo, stage) pair.
#[derive(Debug, Clone)]
pub struct CacheKeyManager {
    repo_id: i64,
}

impl CacheKeyManager {
    pub fn new(repo_id: i64) -> Self {
        Self { repo_id }
    }

    pub fn key_for_stage(&self, stage: StageId) -> String {
        format!("{}:{}", stage.as_str(), self.repo_id)
    }
}

#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
    pub timeout_ms: u64,
}

impl StageNode {
    pub fn new(id: StageId, name: &'static str, dependencies: Vec<StageId>, timeout_ms: u64) -> Self {
        Self { id, name, dependencies, timeout_ms }
    }
}

pub struct PipelineDAG {
    nodes: Vec<StageNode>,
}

impl PipelineDAG {
    /// The one true pipeline order (§2 table): S1 has no dependency, every
    /// later stage depends solely on its immediate predecessor. Per-stage
    /// timeouts are generous defaults; §5 names no explicit per-stage
    /// timeout, only that "no CPU-bound section exceeds one scheduling
    /// quantum without an explicit yield" — these bound wall-clock runtime,
    /// not CPU time.
    pub fn default_pipeline() -> Self {
        let nodes = vec![
            StageNode::new(StageId::S1Stage, "Stage", vec![], 15 * 60_000),
            StageNode::new(StageId::S2Ingest, "Ingest", vec![StageId::S1Stage], 10 * 60_000),
            StageNode::new(StageId::S3Link, "Link", vec![StageId::S2Ingest], 30 * 60_000),
            StageNode::new(StageId::S4Atomize, "Atomize", vec![StageId::S3Link], 120 * 60_000),
            StageNode::new(StageId::S5IndexIncident, "IndexIncident", vec![StageId::S4Atomize], 20 * 60_000),
            StageNode::new(StageId::S6IndexOwnership, "IndexOwnership", vec![StageId::S5IndexIncident], 10 * 60_000),
            StageNode::new(StageId::S7IndexCoupling, "IndexCoupling", vec![StageId::S6IndexOwnership], 10 * 60_000),
        ];
        Self { nodes }
    }

    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Execution order restricted to `subset`, still in S1..S7 order. Used
    /// when the CLI or Reconcile asks to run only a stage sublist.
    pub fn execution_order(&self, subset: Option<&[StageId]>) -> Vec<StageId> {
        StageId::ALL_IN_ORDER
            .into_iter()
            .filter(|id| self.nodes.iter().any(|n| n.id == *id))
            .filter(|id| subset.map(|s| s.contains(id)).unwrap_or(true))
            .collect()
    }

    pub fn execution_plan(&self) -> String {
        self.execution_order(None)
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{}. {}", i + 1, id.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_order_is_strictly_sequential() {
        let dag = PipelineDAG::default_pipeline();
        assert_eq!(dag.execution_order(None), StageId::ALL_IN_ORDER.to_vec());
    }

    #[test]
    fn subset_preserves_relative_order() {
        let dag = PipelineDAG::default_pipeline();
        let subset = [StageId::S7IndexCoupling, StageId::S1Stage, StageId::S4Atomize];
        assert_eq!(
            dag.execution_order(Some(&subset)),
            vec![StageId::S1Stage, StageId::S4Atomize, StageId::S7IndexCoupling]
        );
    }

    #[test]
    fn cache_key_is_scoped_to_repo_and_stage() {
        let keys = CacheKeyManager::new(42);
        assert_eq!(keys.key_for_stage(StageId::S4Atomize), "S4_Atomize:42");
    }

    #[test]
    fn execution_plan_lists_all_seven_stages_in_order() {
        let dag = PipelineDAG::default_pipeline();
        let plan = dag.execution_plan();
        assert!(plan.starts_with("1. S1_Stage"));
        assert!(plan.ends_with("7. S7_IndexCoupling"));
    }
}
