use serde::{Deserialize, Serialize};

/// Stage identifiers for the pipeline chain (§2). Sequential S1..S7 plus the
/// out-of-chain Reconcile recovery tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    S1Stage,
    S2Ingest,
    S3Link,
    S4Atomize,
    S5IndexIncident,
    S6IndexOwnership,
    S7IndexCoupling,
}

impl StageId {
    pub const ALL_IN_ORDER: [StageId; 7] = [
        StageId::S1Stage,
        StageId::S2Ingest,
        StageId::S3Link,
        StageId::S4Atomize,
        StageId::S5IndexIncident,
        StageId::S6IndexOwnership,
        StageId::S7IndexCoupling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::S1Stage => "S1_Stage",
            StageId::S2Ingest => "S2_Ingest",
            StageId::S3Link => "S3_Link",
            StageId::S4Atomize => "S4_Atomize",
            StageId::S5IndexIncident => "S5_IndexIncident",
            StageId::S6IndexOwnership => "S6_IndexOwnership",
            StageId::S7IndexCoupling => "S7_IndexCoupling",
        }
    }

    pub fn ordinal(&self) -> u8 {
        StageId::ALL_IN_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap() as u8
            + 1
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observability-only row, consulted for resume (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub repo_id: i64,
    pub stage: StageId,
    pub state: JobState,
    pub error: Option<String>,
    pub counters: std::collections::HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { elapsed_ms: u64 },
    Failed { error_category: crate::error::ErrorCategory },
}
