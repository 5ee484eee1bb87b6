//! Orchestration layer for the CodeRisk ingestion pipeline: job lifecycle,
//! checkpointing, the sequential S1->S7 DAG, the seven stage handlers, the
//! dead-letter drain, and the Reconcile recovery tool. Adapted from the
//! teacher's `codegraph-orchestration` crate, specialized from a
//! parallel-phase DAG to coderisk's strictly linear chain (§2, §5).

pub mod checkpoint;
pub mod dag;
pub mod deadletter;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod stages;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use dag::{CacheKeyManager, PipelineDAG, StageNode};
pub use error::{OrchestratorError, Result};
pub use job::{Job, JobState, JobStateMachine};
pub use orchestrator::{PipelineOrchestrator, PipelineResult};
pub use pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
pub use reconcile::{Reconcile, ReconcileMode, ReconcileReport};

/// Builds an orchestrator with all seven stage handlers registered, the
/// shape every binary (the CLI, standalone per-stage debug runs) wants.
pub fn default_orchestrator(checkpoint_mgr: std::sync::Arc<CheckpointManager>) -> PipelineOrchestrator {
    let mut orchestrator = PipelineOrchestrator::new(checkpoint_mgr);
    orchestrator.register_handler(std::sync::Arc::new(stages::S1StageHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S2IngestHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S3LinkHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S4AtomizeHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S5IndexIncidentHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S6IndexOwnershipHandler::new()));
    orchestrator.register_handler(std::sync::Arc::new(stages::S7IndexCouplingHandler::new()));
    orchestrator
}
