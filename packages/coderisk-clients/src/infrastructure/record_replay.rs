//! Recorder/replay mode for `LlmClient` (SPEC_FULL.md §C.6, §9 "Dynamic LLM
//! outputs"). `RecordingLlmClient` wraps a real client and persists each
//! prompt/response pair to a directory, keyed by a hash of the prompt;
//! `ReplayLlmClient` reads them back with no network access, giving Atomize
//! the deterministic re-run the §8 round-trip laws need.

use crate::domain::llm::*;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use coderisk_core::error::ErrorCategory;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

fn hash_key(method: &str, payload: &impl serde::Serialize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

fn fixture_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

pub struct RecordingLlmClient<C> {
    inner: C,
    dir: PathBuf,
}

impl<C: LlmClient> RecordingLlmClient<C> {
    pub fn new(inner: C, dir: impl Into<PathBuf>) -> Self {
        Self { inner, dir: dir.into() }
    }

    fn persist<T: serde::Serialize>(&self, key: &str, value: &T) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        if let Ok(json) = serde_json::to_vec_pretty(value) {
            let _ = std::fs::write(fixture_path(&self.dir, key), json);
        }
    }
}

macro_rules! record_method {
    ($self:ident, $method:literal, $payload:expr, $call:expr) => {{
        let key = hash_key($method, &$payload);
        let result = $call.await?;
        $self.persist(&key, &result);
        Ok(result)
    }};
}

#[async_trait]
impl<C: LlmClient> LlmClient for RecordingLlmClient<C> {
    async fn pre_filter(&self, candidates: &[PreFilterCandidate]) -> Result<PreFilterResult> {
        record_method!(self, "pre_filter", candidates, self.inner.pre_filter(candidates))
    }

    async fn atomize(&self, file_path: &str, patch_chunk: &str) -> Result<AtomizeResult> {
        record_method!(self, "atomize", (file_path, patch_chunk), self.inner.atomize(file_path, patch_chunk))
    }

    async fn resolve_entity(&self, patch_context: &str, candidates: &[EntityResolutionCandidate]) -> Result<EntityResolutionResult> {
        record_method!(
            self,
            "resolve_entity",
            (patch_context, candidates),
            self.inner.resolve_entity(patch_context, candidates)
        )
    }

    async fn extract_references(&self, pr_title: &str, pr_body_excerpt: &str) -> Result<ExplicitExtractionResult> {
        record_method!(
            self,
            "extract_references",
            (pr_title, pr_body_excerpt),
            self.inner.extract_references(pr_title, pr_body_excerpt)
        )
    }

    async fn classify_issue(&self, issue_title: &str, issue_body: &str) -> Result<IssueClassification> {
        record_method!(self, "classify_issue", (issue_title, issue_body), self.inner.classify_issue(issue_title, issue_body))
    }

    async fn rank_candidates(&self, issue_context: &str, candidates: &[(u64, String)]) -> Result<RankingResult> {
        record_method!(
            self,
            "rank_candidates",
            (issue_context, candidates),
            self.inner.rank_candidates(issue_context, candidates)
        )
    }

    async fn synthesize_temporal_summary(&self, incidents: &[IncidentForSummary]) -> Result<String> {
        record_method!(self, "synthesize_temporal_summary", incidents, self.inner.synthesize_temporal_summary(incidents))
    }
}

pub struct ReplayLlmClient {
    dir: PathBuf,
}

impl ReplayLlmClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = fixture_path(&self.dir, key);
        let bytes = std::fs::read(&path)
            .map_err(|e| ClientError::llm(format!("no recorded fixture at {}: {e}", path.display()), ErrorCategory::Permanent))?;
        serde_json::from_slice(&bytes).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })
    }
}

#[async_trait]
impl LlmClient for ReplayLlmClient {
    async fn pre_filter(&self, candidates: &[PreFilterCandidate]) -> Result<PreFilterResult> {
        self.load(&hash_key("pre_filter", &candidates))
    }

    async fn atomize(&self, file_path: &str, patch_chunk: &str) -> Result<AtomizeResult> {
        self.load(&hash_key("atomize", &(file_path, patch_chunk)))
    }

    async fn resolve_entity(&self, patch_context: &str, candidates: &[EntityResolutionCandidate]) -> Result<EntityResolutionResult> {
        self.load(&hash_key("resolve_entity", &(patch_context, candidates)))
    }

    async fn extract_references(&self, pr_title: &str, pr_body_excerpt: &str) -> Result<ExplicitExtractionResult> {
        self.load(&hash_key("extract_references", &(pr_title, pr_body_excerpt)))
    }

    async fn classify_issue(&self, issue_title: &str, issue_body: &str) -> Result<IssueClassification> {
        self.load(&hash_key("classify_issue", &(issue_title, issue_body)))
    }

    async fn rank_candidates(&self, issue_context: &str, candidates: &[(u64, String)]) -> Result<RankingResult> {
        self.load(&hash_key("rank_candidates", &(issue_context, candidates)))
    }

    async fn synthesize_temporal_summary(&self, incidents: &[IncidentForSummary]) -> Result<String> {
        self.load(&hash_key("synthesize_temporal_summary", incidents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLlmClient;

    #[async_trait]
    impl LlmClient for StaticLlmClient {
        async fn pre_filter(&self, _candidates: &[PreFilterCandidate]) -> Result<PreFilterResult> {
            Ok(PreFilterResult { likely_significant_paths: vec!["src/a.rs".into()] })
        }
        async fn atomize(&self, _file_path: &str, _patch_chunk: &str) -> Result<AtomizeResult> {
            Ok(AtomizeResult { blocks: vec![] })
        }
        async fn resolve_entity(&self, _patch_context: &str, _candidates: &[EntityResolutionCandidate]) -> Result<EntityResolutionResult> {
            Ok(EntityResolutionResult { chosen_start_line: Some(10), confidence: 0.9 })
        }
        async fn extract_references(&self, _pr_title: &str, _pr_body_excerpt: &str) -> Result<ExplicitExtractionResult> {
            Ok(ExplicitExtractionResult { references: vec![] })
        }
        async fn classify_issue(&self, _issue_title: &str, _issue_body: &str) -> Result<IssueClassification> {
            Ok(IssueClassification::FixedWithCode)
        }
        async fn rank_candidates(&self, _issue_context: &str, _candidates: &[(u64, String)]) -> Result<RankingResult> {
            Ok(RankingResult { ranked: vec![] })
        }
        async fn synthesize_temporal_summary(&self, _incidents: &[IncidentForSummary]) -> Result<String> {
            Ok("summary".to_string())
        }
    }

    #[tokio::test]
    async fn recorded_response_replays_identically() {
        let tmp = tempfile::tempdir().unwrap();
        let recorder = RecordingLlmClient::new(StaticLlmClient, tmp.path());
        let candidates = vec![PreFilterCandidate { path: "src/a.rs".into(), one_line_summary: "added fn".into() }];

        let recorded = recorder.pre_filter(&candidates).await.unwrap();

        let replay = ReplayLlmClient::new(tmp.path());
        let replayed = replay.pre_filter(&candidates).await.unwrap();

        assert_eq!(recorded.likely_significant_paths, replayed.likely_significant_paths);
    }

    #[tokio::test]
    async fn replay_without_recording_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let replay = ReplayLlmClient::new(tmp.path());
        let candidates = vec![PreFilterCandidate { path: "src/b.rs".into(), one_line_summary: "x".into() }];
        assert!(replay.pre_filter(&candidates).await.is_err());
    }
}
