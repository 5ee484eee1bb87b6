//! In-memory checkpoint store for resumable stage execution. Mirrors the
//! teacher's `CheckpointManager` shape (save/load/completed_stages/delete),
//! backed by `std::sync::Mutex` rather than `parking_lot` — `parking_lot` is
//! referenced by the teacher's checkpoint module but never actually declared
//! in its own Cargo.toml, and `std::sync` is already what every other
//! in-memory store in this workspace uses (see `coderisk-storage`'s
//! in-memory stores).

use coderisk_core::model::StageId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub job_id: Uuid,
    pub stage: StageId,
    pub cache_key: String,
    /// bincode-serialized `StageOutput::cache_data` payload.
    pub cache_data: Vec<u8>,
}

impl Checkpoint {
    pub fn new(job_id: Uuid, stage: StageId, cache_key: String, cache_data: Vec<u8>) -> Self {
        Self { id: Uuid::new_v4(), job_id, stage, cache_key, cache_data }
    }
}

pub struct CheckpointManager {
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl CheckpointManager {
    pub fn new_in_memory() -> Self {
        Self { checkpoints: Mutex::new(Vec::new()) }
    }

    /// Replaces any existing checkpoint for the same (job, stage) pair.
    pub async fn save_checkpoint(&self, checkpoint: Checkpoint) {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.retain(|cp| !(cp.job_id == checkpoint.job_id && cp.stage == checkpoint.stage));
        checkpoints.push(checkpoint);
    }

    pub async fn load_checkpoint(&self, cache_key: &str) -> Option<Vec<u8>> {
        let checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.iter().find(|cp| cp.cache_key == cache_key).map(|cp| cp.cache_data.clone())
    }

    pub async fn completed_stages(&self, job_id: Uuid) -> std::collections::HashSet<StageId> {
        let checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.iter().filter(|cp| cp.job_id == job_id).map(|cp| cp.stage).collect()
    }

    pub async fn delete_job_checkpoints(&self, job_id: Uuid) {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.retain(|cp| cp.job_id != job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let mgr = CheckpointManager::new_in_memory();
        let job_id = Uuid::new_v4();
        let cp = Checkpoint::new(job_id, StageId::S1Stage, "s1:1".into(), vec![1, 2, 3]);
        mgr.save_checkpoint(cp).await;
        assert_eq!(mgr.load_checkpoint("s1:1").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn save_replaces_existing_for_same_job_and_stage() {
        let mgr = CheckpointManager::new_in_memory();
        let job_id = Uuid::new_v4();
        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::S1Stage, "s1:1".into(), vec![1])).await;
        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::S1Stage, "s1:1".into(), vec![2])).await;
        assert_eq!(mgr.load_checkpoint("s1:1").await, Some(vec![2]));
    }

    #[tokio::test]
    async fn completed_stages_tracks_per_job() {
        let mgr = CheckpointManager::new_in_memory();
        let job_id = Uuid::new_v4();
        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::S1Stage, "s1:1".into(), vec![1])).await;
        mgr.save_checkpoint(Checkpoint::new(job_id, StageId::S2Ingest, "s2:1".into(), vec![2])).await;
        let completed = mgr.completed_stages(job_id).await;
        assert_eq!(completed.len(), 2);
        assert!(completed.contains(&StageId::S1Stage));
    }

    #[tokio::test]
    async fn delete_job_checkpoints_clears_only_that_job() {
        let mgr = CheckpointManager::new_in_memory();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        mgr.save_checkpoint(Checkpoint::new(job_a, StageId::S1Stage, "a".into(), vec![1])).await;
        mgr.save_checkpoint(Checkpoint::new(job_b, StageId::S1Stage, "b".into(), vec![2])).await;
        mgr.delete_job_checkpoints(job_a).await;
        assert!(mgr.completed_stages(job_a).await.is_empty());
        assert_eq!(mgr.completed_stages(job_b).await.len(), 1);
    }

    #[tokio::test]
    async fn load_nonexistent_returns_none() {
        let mgr = CheckpointManager::new_in_memory();
        assert_eq!(mgr.load_checkpoint("missing").await, None);
    }
}
