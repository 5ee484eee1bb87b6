use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    CommitAtomization,
    EntityResolution,
    IssuePrLink,
    IncidentSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    Abandoned,
}

/// Populated when a per-unit processing step fails irrecoverably; the
/// pipeline proceeds past it rather than aborting (§3.1, §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub repo_id: i64,
    pub unit_kind: UnitKind,
    pub unit_id: String,
    pub error: String,
    pub attempts: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: DeadLetterStatus,
}

/// Exponential backoff schedule for dead-letter retries: base 5 min, factor
/// 2, cap 24h, max 10 attempts (§4.8). A pure function so Reconcile and the
/// drain loop share one policy (SPEC_FULL.md §C.2).
pub fn next_retry_at(attempts: u32, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    const MAX_ATTEMPTS: u32 = 10;
    const BASE_SECS: i64 = 5 * 60;
    const CAP_SECS: i64 = 24 * 60 * 60;

    if attempts >= MAX_ATTEMPTS {
        return None;
    }

    let backoff_secs = BASE_SECS.saturating_mul(1i64 << attempts.min(20)).min(CAP_SECS);
    Some(from + chrono::Duration::seconds(backoff_secs))
}

pub fn is_abandoned(attempts: u32) -> bool {
    attempts >= 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let t0 = Utc::now();
        let r0 = next_retry_at(0, t0).unwrap();
        assert_eq!((r0 - t0).num_seconds(), 300);

        let r1 = next_retry_at(1, t0).unwrap();
        assert_eq!((r1 - t0).num_seconds(), 600);

        let r_capped = next_retry_at(10_u32.min(19), t0);
        // attempts=9 -> 5min * 2^9 = 2560min, capped at 24h = 1440min
        let r9 = next_retry_at(9, t0).unwrap();
        assert_eq!((r9 - t0).num_seconds(), 24 * 60 * 60);
        let _ = r_capped;
    }

    #[test]
    fn max_attempts_stops_retry() {
        let t0 = Utc::now();
        assert!(next_retry_at(10, t0).is_none());
        assert!(is_abandoned(10));
        assert!(!is_abandoned(9));
    }
}
