use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Natural key (repo_id, canonical_path). Maps historical paths to the sha
/// of the commit that renamed them, so any past reference resolves to the
/// current canonical path (§3.1, §3.2 inv. 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub repo_id: i64,
    pub canonical_path: String,
    /// historical_path -> commit sha of the rename that retired it.
    pub historical_paths: HashMap<String, String>,
}

impl FileIdentity {
    pub fn new(repo_id: i64, canonical_path: impl Into<String>) -> Self {
        Self {
            repo_id,
            canonical_path: canonical_path.into(),
            historical_paths: HashMap::new(),
        }
    }

    pub fn record_rename(&mut self, historical_path: impl Into<String>, rename_commit_sha: impl Into<String>) {
        self.historical_paths.insert(historical_path.into(), rename_commit_sha.into());
    }
}

/// Reverse lookup index: historical_path -> canonical_path, built from a set
/// of `FileIdentity` rows for a repository (§3.1).
#[derive(Debug, Default)]
pub struct FileIdentityMap {
    canonical_by_historical: HashMap<String, String>,
    known_canonical: std::collections::HashSet<String>,
}

impl FileIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&mut self, identity: &FileIdentity) {
        self.known_canonical.insert(identity.canonical_path.clone());
        for historical in identity.historical_paths.keys() {
            self.canonical_by_historical
                .insert(historical.clone(), identity.canonical_path.clone());
        }
    }

    /// Resolve any path (historical or canonical) to its canonical form.
    /// Unknown paths resolve to themselves (assumed already canonical).
    pub fn resolve(&self, path: &str) -> String {
        self.canonical_by_historical
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }

    pub fn is_known_canonical(&self, path: &str) -> bool {
        self.known_canonical.contains(path)
    }
}
