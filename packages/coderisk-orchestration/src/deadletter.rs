//! Dead-letter drain (§4.8). A per-repository queue of units that failed an
//! LLM or entity-resolution step; the pipeline proceeds past them rather than
//! aborting (§3.1, §4.4 "Failure discipline"). This module wraps the pure
//! `coderisk_core::model::dead_letter::next_retry_at` backoff function
//! (SPEC_FULL.md §C.2) with the store lookup that decides which entries are
//! due, so both a periodic drain job and Reconcile's incremental mode share
//! one retry policy instead of re-deriving it.

use chrono::Utc;
use coderisk_core::model::{next_retry_at, DeadLetter, DeadLetterStatus};
use coderisk_storage::StagingStore;
use std::sync::Arc;

pub struct DeadLetterDrain {
    staging: Arc<dyn StagingStore>,
}

impl DeadLetterDrain {
    pub fn new(staging: Arc<dyn StagingStore>) -> Self {
        Self { staging }
    }

    /// Entries whose next scheduled retry has arrived, excluding ones already
    /// marked abandoned (§4.8 "max 10 attempts... marked abandoned").
    pub async fn due_for_retry(&self, repo_id: i64) -> coderisk_storage::Result<Vec<DeadLetter>> {
        let pending = self.staging.pending_dead_letters(repo_id).await?;
        let now = Utc::now();
        Ok(pending
            .into_iter()
            .filter(|entry| entry.status == DeadLetterStatus::Pending)
            .filter(|entry| match next_retry_at(entry.attempts, entry.last_seen) {
                Some(due_at) => due_at <= now,
                None => false,
            })
            .collect())
    }

    /// Records a retry attempt's outcome. On success the caller is expected
    /// to have already performed the unit's real side effects (re-running
    /// the stage step); this only updates or clears the dead-letter row.
    pub async fn record_retry_failure(&self, mut entry: DeadLetter, error: String) -> coderisk_storage::Result<()> {
        entry.attempts += 1;
        entry.last_seen = Utc::now();
        entry.error = error;
        if coderisk_core::model::dead_letter::is_abandoned(entry.attempts) {
            entry.status = DeadLetterStatus::Abandoned;
        }
        self.staging.upsert_dead_letter(&entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderisk_core::model::UnitKind;
    use coderisk_storage::InMemoryStagingStore;

    fn entry(repo_id: i64, attempts: u32, last_seen: chrono::DateTime<Utc>) -> DeadLetter {
        DeadLetter {
            repo_id,
            unit_kind: UnitKind::CommitAtomization,
            unit_id: "abc123".into(),
            error: "llm timeout".into(),
            attempts,
            first_seen: last_seen,
            last_seen,
            status: DeadLetterStatus::Pending,
        }
    }

    #[tokio::test]
    async fn fresh_entry_is_not_yet_due() {
        let store = Arc::new(InMemoryStagingStore::new());
        store.upsert_dead_letter(&entry(1, 0, Utc::now())).await.unwrap();
        let drain = DeadLetterDrain::new(store);
        assert!(drain.due_for_retry(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_entry_past_backoff_window_is_due() {
        let store = Arc::new(InMemoryStagingStore::new());
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        store.upsert_dead_letter(&entry(1, 0, long_ago)).await.unwrap();
        let drain = DeadLetterDrain::new(store);
        assert_eq!(drain.due_for_retry(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_retry_failure_abandons_after_max_attempts() {
        let store = Arc::new(InMemoryStagingStore::new());
        let drain = DeadLetterDrain::new(store.clone());
        let e = entry(1, 9, Utc::now());
        drain.record_retry_failure(e, "still failing".into()).await.unwrap();
        let abandoned = store.abandoned_dead_letters(1).await.unwrap();
        assert_eq!(abandoned[0].status, DeadLetterStatus::Abandoned);
    }
}
