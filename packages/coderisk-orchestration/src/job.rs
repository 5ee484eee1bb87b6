//! Job lifecycle for a single repository's pipeline run. A job tracks
//! progress through the sequential S1->S7 chain (§2); unlike the source this
//! crate is adapted from, there is no separate "snapshot" concept — a job is
//! keyed by `repo_id` alone, and "incremental" means `Since(last_commit_date)`
//! (§4.1) rather than a filesystem diff against a prior snapshot.

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use coderisk_core::error::ErrorCategory;
use coderisk_core::model::StageId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued { queued_at: DateTime<Utc>, priority: i32 },
    Running { started_at: DateTime<Utc>, worker_id: String, current_stage: StageId },
    Completed { started_at: DateTime<Utc>, completed_at: DateTime<Utc>, duration_ms: u64 },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        failed_stage: StageId,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Cancelled { cancelled_at: DateTime<Utc>, reason: String },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. } | JobState::Cancelled { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub repo_id: i64,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `Some` drives `Since(last_commit_date)` fetching in S1 (§4.1); `None`
    /// means a full initial ingestion bounded by the configured days-window.
    pub incremental_since: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new_queued(repo_id: i64, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repo_id,
            state: JobState::Queued { queued_at: now, priority },
            created_at: now,
            updated_at: now,
            incremental_since: None,
        }
    }

    pub fn new_incremental(repo_id: i64, priority: i32, since: DateTime<Utc>) -> Self {
        let mut job = Self::new_queued(repo_id, priority);
        job.incremental_since = Some(since);
        job
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental_since.is_some()
    }
}

/// Mirrors the teacher's transition set (start/complete/fail/retry/cancel),
/// adapted to a single linear stage chain with no `update_stage` call needed
/// mid-flight (the orchestrator advances `current_stage` by re-entering
/// `start` is not used for that; see `Job State` diagram in DESIGN.md).
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    pub fn start(&mut self, worker_id: String, current_stage: StageId) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running { started_at: now, worker_id, current_stage };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    pub fn update_stage(&mut self, stage: StageId) -> Result<()> {
        match &mut self.job.state {
            JobState::Running { current_stage, .. } => {
                *current_stage = stage;
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "update_stage".to_string(),
            }),
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.job.state = JobState::Completed { started_at: *started_at, completed_at: now, duration_ms };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    /// Transition to Failed. Permanent-external and schema-invariant failures
    /// (§7) never get a `next_retry_at`; transient failures get exponential
    /// backoff capped at 3 attempts, matching the teacher's job-level retry
    /// policy (distinct from the dead-letter queue's own per-unit backoff in
    /// §4.8, which is much longer-lived).
    pub fn fail(&mut self, error: String, error_category: ErrorCategory, failed_stage: StageId, retry_count: u32) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } | JobState::Failed { started_at, .. } => {
                let now = Utc::now();
                let next_retry_at = if retry_count < 3 && error_category == ErrorCategory::Transient {
                    let backoff_secs = 2i64.pow(retry_count);
                    Some(now + chrono::Duration::seconds(backoff_secs))
                } else {
                    None
                };

                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    error_category,
                    failed_stage,
                    retry_count,
                    next_retry_at,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    pub fn retry(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Failed { retry_count, next_retry_at, .. } => {
                if next_retry_at.is_none() {
                    return Err(OrchestratorError::config("no retry scheduled (max retries exceeded)"));
                }
                let now = Utc::now();
                self.job.state = JobState::Queued { queued_at: now, priority: *retry_count as i32 };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "queued (retry)".to_string(),
            }),
        }
    }

    pub fn cancel(&mut self, reason: String) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "cancelled".to_string(),
            });
        }
        let now = Utc::now();
        self.job.state = JobState::Cancelled { cancelled_at: now, reason };
        self.job.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_to_running_to_completed() {
        let job = Job::new_queued(1, 0);
        let mut sm = JobStateMachine::new(job);
        sm.start("worker-1".into(), StageId::S1Stage).unwrap();
        assert!(matches!(sm.job().state, JobState::Running { .. }));
        sm.complete().unwrap();
        assert!(matches!(sm.job().state, JobState::Completed { .. }));
    }

    #[test]
    fn transient_failure_schedules_retry() {
        let job = Job::new_queued(1, 0);
        let mut sm = JobStateMachine::new(job);
        sm.start("worker-1".into(), StageId::S1Stage).unwrap();
        sm.fail("connection reset".into(), ErrorCategory::Transient, StageId::S1Stage, 0).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_some()),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn permanent_failure_does_not_retry() {
        let job = Job::new_queued(1, 0);
        let mut sm = JobStateMachine::new(job);
        sm.start("worker-1".into(), StageId::S1Stage).unwrap();
        sm.fail("400 bad credentials".into(), ErrorCategory::Permanent, StageId::S1Stage, 0).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_none()),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn retry_after_third_transient_failure_exhausted() {
        let job = Job::new_queued(1, 0);
        let mut sm = JobStateMachine::new(job);
        sm.start("worker-1".into(), StageId::S1Stage).unwrap();
        sm.fail("timeout".into(), ErrorCategory::Transient, StageId::S1Stage, 3).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_none()),
            _ => panic!("expected Failed"),
        }
        assert!(sm.retry().is_err());
    }

    #[test]
    fn cannot_cancel_completed_job() {
        let job = Job::new_queued(1, 0);
        let mut sm = JobStateMachine::new(job);
        sm.start("worker-1".into(), StageId::S1Stage).unwrap();
        sm.complete().unwrap();
        assert!(sm.cancel("too late".into()).is_err());
    }

    #[test]
    fn incremental_job_carries_since_timestamp() {
        let since = Utc::now();
        let job = Job::new_incremental(1, 0, since);
        assert!(job.is_incremental());
        assert_eq!(job.incremental_since, Some(since));
    }
}
