//! Drives one repository's job through the sequential S1->S7 chain (§2, §5).
//! Adapted from the teacher's `PipelineOrchestrator`: its `run_dag` fans
//! parallel-group stages out with `tokio::spawn`/`join_all` because codegraph
//! has real fan-out phases (L1||L3 -> L2 -> L4); coderisk's chain is strictly
//! sequential, so `run_dag` here walks `PipelineDAG::execution_order` one
//! stage at a time instead. The per-stage dependency-cache load, timeout
//! wrap, and checkpoint-then-merge-metrics structure of `execute_stage` is
//! kept as-is.

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::dag::PipelineDAG;
use crate::error::{OrchestratorError, Result};
use crate::job::{Job, JobState, JobStateMachine};
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use coderisk_core::model::{IngestionJob, StageId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub metrics: StageMetrics,
    pub stages_run: Vec<StageId>,
    pub stages_skipped: Vec<StageId>,
}

pub struct PipelineOrchestrator {
    dag: Arc<PipelineDAG>,
    checkpoint_mgr: Arc<CheckpointManager>,
    stage_handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    worker_id: String,
}

impl PipelineOrchestrator {
    pub fn new(checkpoint_mgr: Arc<CheckpointManager>) -> Self {
        Self {
            dag: Arc::new(PipelineDAG::default_pipeline()),
            checkpoint_mgr,
            stage_handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage_id(), handler);
    }

    /// Main entry point. `ctx` is reused unmodified across stages; only its
    /// `cache_keys` is stage-scoped, derived fresh per `execute_stage` call.
    pub async fn execute_job(&self, mut job: Job, mut ctx: StageContext, stage_subset: Option<&[StageId]>) -> (Job, PipelineResult) {
        let job_id = job.id;
        let start = Instant::now();

        info!("job {}: execution plan\n{}", job_id, self.dag.execution_plan());

        let mut state_machine = JobStateMachine::new(job);
        if let Err(e) = state_machine.start(self.worker_id.clone(), StageId::S1Stage) {
            error!("job {}: failed to start: {}", job_id, e);
            return (state_machine.into_job(), PipelineResult::default());
        }
        job = state_machine.into_job();

        let order = self.dag.execution_order(stage_subset);

        let result = self.run_chain(job_id, &order, &mut ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut sm = JobStateMachine::new(job);
        let final_job = match result {
            Ok(mut pipeline_result) => {
                pipeline_result.metrics.duration_ms = elapsed_ms;
                info!(
                    "job {}: completed in {}ms ({} units processed, {} dead-lettered)",
                    job_id, elapsed_ms, pipeline_result.metrics.units_processed, pipeline_result.metrics.units_dead_lettered
                );
                sm.complete().ok();
                self.checkpoint_mgr.delete_job_checkpoints(job_id).await;
                return (sm.into_job(), pipeline_result);
            }
            Err((failed_stage, e)) => {
                error!("job {}: stage {:?} failed: {}", job_id, failed_stage, e);
                let retry_count = match &sm.job().state {
                    JobState::Failed { retry_count, .. } => *retry_count + 1,
                    _ => 0,
                };
                sm.fail(e.to_string(), e.category(), failed_stage, retry_count).ok();
                sm.into_job()
            }
        };

        (final_job, PipelineResult { metrics: StageMetrics { duration_ms: elapsed_ms, ..Default::default() }, ..Default::default() })
    }

    async fn run_chain(&self, job_id: Uuid, order: &[StageId], ctx: &mut StageContext) -> std::result::Result<PipelineResult, (StageId, OrchestratorError)> {
        let mut result = PipelineResult::default();
        let completed = self.checkpoint_mgr.completed_stages(job_id).await;

        for stage_id in order {
            let handler = self
                .stage_handlers
                .get(stage_id)
                .cloned()
                .ok_or(OrchestratorError::MissingHandler(*stage_id))
                .map_err(|e| (*stage_id, e))?;

            let node = self.dag.get_stage(*stage_id).ok_or(OrchestratorError::StageNotFound(*stage_id)).map_err(|e| (*stage_id, e))?;

            if completed.contains(stage_id) {
                info!("job {}: stage {:?} already completed, skipping", job_id, stage_id);
                result.stages_skipped.push(*stage_id);
                continue;
            }

            ctx.cache_keys = crate::dag::CacheKeyManager::new(ctx.repo_id);

            Self::record_ingestion_job(ctx, *stage_id, coderisk_core::model::JobState::Running, None, &StageMetrics::default()).await;

            let timeout = tokio::time::Duration::from_millis(node.timeout_ms);
            let output = match tokio::time::timeout(timeout, Self::execute_stage(handler.clone(), ctx)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    Self::record_ingestion_job(
                        ctx,
                        *stage_id,
                        coderisk_core::model::JobState::Failed { error_category: e.category() },
                        Some(e.to_string()),
                        &StageMetrics::default(),
                    )
                    .await;
                    return Err((*stage_id, e));
                }
                Err(_) => {
                    let e = OrchestratorError::Timeout(*stage_id);
                    Self::record_ingestion_job(
                        ctx,
                        *stage_id,
                        coderisk_core::model::JobState::Failed { error_category: e.category() },
                        Some(e.to_string()),
                        &StageMetrics::default(),
                    )
                    .await;
                    return Err((*stage_id, e));
                }
            };

            let cache_key = ctx.cache_keys.key_for_stage(*stage_id);
            let checkpoint = Checkpoint::new(job_id, *stage_id, cache_key, output.cache_data.clone());
            self.checkpoint_mgr.save_checkpoint(checkpoint).await;

            Self::record_ingestion_job(
                ctx,
                *stage_id,
                coderisk_core::model::JobState::Completed { elapsed_ms: output.metrics.duration_ms },
                None,
                &output.metrics,
            )
            .await;

            result.metrics.merge(&output.metrics);
            result.stages_run.push(*stage_id);

            if !output.metrics.errors.is_empty() {
                warn!("job {}: stage {:?} completed with {} per-unit errors", job_id, stage_id, output.metrics.errors.len());
            }
        }

        Ok(result)
    }

    /// Populates the observability-only `IngestionJob` row for this stage
    /// attempt (§3.1); failures to write it are logged, not propagated, since
    /// it is consulted for resume but never the source of truth (the
    /// checkpoint manager is).
    async fn record_ingestion_job(
        ctx: &StageContext,
        stage: StageId,
        state: coderisk_core::model::JobState,
        error: Option<String>,
        metrics: &StageMetrics,
    ) {
        let mut counters = HashMap::new();
        counters.insert("units_processed".to_string(), metrics.units_processed as u64);
        counters.insert("units_dead_lettered".to_string(), metrics.units_dead_lettered as u64);

        let job = IngestionJob { repo_id: ctx.repo_id, stage, state, error, counters };
        if let Err(e) = ctx.staging.upsert_ingestion_job(&job).await {
            warn!("failed to record ingestion job row for stage {:?}: {}", stage, e);
        }
    }

    async fn execute_stage(handler: Arc<dyn StageHandler>, ctx: &mut StageContext) -> Result<StageOutput> {
        let stage_id = handler.stage_id();
        info!("executing stage {:?}", stage_id);

        if handler.can_skip(ctx).await {
            info!("stage {:?} skipped (cache hit)", stage_id);
            return Ok(StageOutput { cache_data: Vec::new(), metrics: StageMetrics::default() });
        }

        handler.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageContext;
    use async_trait::async_trait;
    use coderisk_clients::{HttpLlmClient, HttpSourceHostClient};
    use coderisk_core::config::{LlmConfig, PipelineConfig, SourceHostConfig, StoreConfig};
    use coderisk_storage::{InMemoryGraphStore, InMemoryStagingStore};

    struct NoopStage(StageId);

    #[async_trait]
    impl StageHandler for NoopStage {
        fn stage_id(&self) -> StageId {
            self.0
        }
        async fn execute(&self, _ctx: &mut StageContext) -> Result<StageOutput> {
            Ok(StageOutput { cache_data: vec![], metrics: StageMetrics { units_processed: 1, ..Default::default() } })
        }
    }

    fn test_ctx() -> StageContext {
        let config = PipelineConfig {
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
        };
        let config = Arc::new(config);
        StageContext {
            job_id: Uuid::new_v4(),
            repo_id: 1,
            owner: "acme".into(),
            name: "widgets".into(),
            incremental_since: None,
            cache_keys: crate::dag::CacheKeyManager::new(1),
            checkpoint_mgr: Arc::new(CheckpointManager::new_in_memory()),
            config: config.clone(),
            staging: Arc::new(InMemoryStagingStore::new()),
            graph: Arc::new(InMemoryGraphStore::new()),
            source_host: Arc::new(HttpSourceHostClient::new(config.source_host.base_url.clone(), config.source_host.token.clone())),
            llm: Arc::new(HttpLlmClient::new(config.llm.endpoint.clone(), config.llm.api_key.clone(), config.llm.primary_model.clone())),
        }
    }

    #[tokio::test]
    async fn runs_all_seven_stages_in_order_when_all_noop() {
        let mut orchestrator = PipelineOrchestrator::new(Arc::new(CheckpointManager::new_in_memory()));
        for id in StageId::ALL_IN_ORDER {
            orchestrator.register_handler(Arc::new(NoopStage(id)));
        }
        let job = Job::new_queued(1, 0);
        let (final_job, result) = orchestrator.execute_job(job, test_ctx(), None).await;
        assert!(matches!(final_job.state, JobState::Completed { .. }));
        assert_eq!(result.stages_run, StageId::ALL_IN_ORDER.to_vec());
        assert_eq!(result.metrics.units_processed, 7);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_job() {
        let mut orchestrator = PipelineOrchestrator::new(Arc::new(CheckpointManager::new_in_memory()));
        orchestrator.register_handler(Arc::new(NoopStage(StageId::S1Stage)));
        let job = Job::new_queued(1, 0);
        let (final_job, _) = orchestrator.execute_job(job, test_ctx(), None).await;
        assert!(matches!(final_job.state, JobState::Failed { .. }));
    }
}
