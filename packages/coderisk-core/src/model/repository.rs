use serde::{Deserialize, Serialize};

/// A repository under ingestion, identified by (owner, name).
///
/// `id` is assigned once by the staging store and propagates as the
/// foreign key through every downstream table and graph write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub ingestion_status: IngestionStatus,
    /// Hash of the parent_shas set last seen, used for force-push detection (§4.2).
    pub parent_shas_hash: Option<String>,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Staging,
    Staged,
    Failed { stage: u8 },
    Complete,
}
