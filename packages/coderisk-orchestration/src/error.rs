//! Orchestrator-level errors (job/checkpoint/DAG bookkeeping). Stage bodies
//! themselves return `coderisk_core::error::ErrorCategory`-carrying errors
//! from the crates they call (`coderisk-storage`, `coderisk-clients`); this
//! enum only covers failures in the scheduling machinery itself. Reuses
//! `coderisk_core::error::ErrorCategory` rather than redefining a third
//! Transient/Permanent/* taxonomy (see DESIGN.md).

use coderisk_core::error::ErrorCategory;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("stage not found: {0:?}")]
    StageNotFound(coderisk_core::model::StageId),

    #[error("no handler registered for stage {0:?}")]
    MissingHandler(coderisk_core::model::StageId),

    #[error("missing required checkpoint for dependency {0:?}")]
    MissingDependency(coderisk_core::model::StageId),

    #[error("stage {stage:?} execution failed: {message}")]
    StageExecutionFailed { stage: coderisk_core::model::StageId, message: String, category: ErrorCategory },

    #[error("stage {0:?} timed out")]
    Timeout(coderisk_core::model::StageId),

    #[error("storage error: {0}")]
    Storage(#[from] coderisk_storage::StorageError),

    #[error("client error: {0}")]
    Client(#[from] coderisk_clients::ClientError),

    #[error("core error: {0}")]
    Core(#[from] coderisk_core::error::CoreError),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classification used to decide whether a stage failure advances the
    /// job to a retryable Failed state or fails it loudly (§7 taxonomy).
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::StageExecutionFailed { category, .. } => *category,
            OrchestratorError::Storage(e) => match e.kind {
                coderisk_storage::ErrorKind::Database => ErrorCategory::Transient,
                coderisk_storage::ErrorKind::Conflict => ErrorCategory::Permanent,
                coderisk_storage::ErrorKind::NotFound
                | coderisk_storage::ErrorKind::Serialization
                | coderisk_storage::ErrorKind::Config => ErrorCategory::Invariant,
            },
            OrchestratorError::Client(e) => e.category(),
            OrchestratorError::Timeout(_) => ErrorCategory::Transient,
            OrchestratorError::InvalidStateTransition { .. }
            | OrchestratorError::MissingDependency(_)
            | OrchestratorError::MissingHandler(_)
            | OrchestratorError::StageNotFound(_) => ErrorCategory::Invariant,
            OrchestratorError::JobNotFound(_)
            | OrchestratorError::Core(_)
            | OrchestratorError::Bincode(_)
            | OrchestratorError::Config(_) => ErrorCategory::Permanent,
        }
    }
}
