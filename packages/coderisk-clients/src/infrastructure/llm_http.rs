//! HTTP-backed `LlmClient`, honoring the JSON contracts of §4.3/§4.4/§4.5
//! against an OpenAI-compatible chat-completions endpoint with a forced JSON
//! response format. The vendor's actual API beyond this contract is out of
//! scope (§1).

use crate::domain::llm::*;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use coderisk_core::error::ErrorCategory;
use coderisk_core::rate_limit::AdaptiveTokenBucket;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub struct HttpLlmClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    limiter: AdaptiveTokenBucket,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            limiter: AdaptiveTokenBucket::new(5000),
        }
    }

    async fn complete_json<T: serde::de::DeserializeOwned>(&self, system_prompt: &str, user_prompt: String) -> Result<T> {
        self.limiter.acquire().await;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_prompt },
            ],
            response_format: json!({ "type": "json_object" }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if let Some(remaining) = resp
            .headers()
            .get("x-ratelimit-remaining-requests")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.limiter.observe_remaining(remaining);
        }

        let status = resp.status();
        if !status.is_success() {
            let category = if status.is_server_error() || status.as_u16() == 429 {
                ErrorCategory::Transient
            } else {
                ErrorCategory::Permanent
            };
            return Err(ClientError::llm(format!("unexpected status {status}"), category));
        }

        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClientError::llm("empty choices array", ErrorCategory::Permanent))?;

        serde_json::from_str(&content).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn pre_filter(&self, candidates: &[PreFilterCandidate]) -> Result<PreFilterResult> {
        let prompt = serde_json::to_string(candidates).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })?;
        self.complete_json(
            "Given file paths and one-line diff summaries (no patch text), return JSON \
             {\"likely_significant_paths\": [...]} naming the subset likely to contain \
             semantically significant changes.",
            prompt,
        )
        .await
    }

    async fn atomize(&self, file_path: &str, patch_chunk: &str) -> Result<AtomizeResult> {
        let prompt = format!(
            "File: {file_path}\nPatch chunk:\n{patch_chunk}\n\n\
             Return JSON {{\"blocks\": [...]}} of every function/method/class created, \
             modified, deleted, or renamed by this patch."
        );
        self.complete_json("Extract structural block changes from a unified diff.", prompt).await
    }

    async fn resolve_entity(&self, patch_context: &str, candidates: &[EntityResolutionCandidate]) -> Result<EntityResolutionResult> {
        let candidates_json = serde_json::to_string(candidates).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })?;
        let prompt = format!(
            "Patch context:\n{patch_context}\n\nCandidates:\n{candidates_json}\n\n\
             Return JSON {{\"chosen_start_line\": <u32 or null>, \"confidence\": <0..1>}} naming \
             which candidate this patch actually modifies."
        );
        self.complete_json("Disambiguate among same-named code block candidates.", prompt).await
    }

    async fn extract_references(&self, pr_title: &str, pr_body_excerpt: &str) -> Result<ExplicitExtractionResult> {
        let prompt = format!(
            "PR title: {pr_title}\nPR body (excerpt): {pr_body_excerpt}\n\n\
             Return JSON {{\"references\": [{{\"issue_number\": ..., \"reference_type\": \
             \"fixes|closes|resolves|mentions|external\", \"base_confidence\": ...}}]}}."
        );
        self.complete_json("Extract issue references from a pull request description.", prompt).await
    }

    async fn classify_issue(&self, issue_title: &str, issue_body: &str) -> Result<IssueClassification> {
        let prompt = format!(
            "Issue title: {issue_title}\nIssue body: {issue_body}\n\n\
             Return JSON {{\"classification\": \"fixed_with_code|not_a_bug|duplicate|wontfix|\
             user_action_required|unclear\"}}."
        );
        #[derive(Deserialize)]
        struct Wrapper {
            classification: IssueClassification,
        }
        let wrapper: Wrapper = self.complete_json("Classify a closed issue's resolution kind.", prompt).await?;
        Ok(wrapper.classification)
    }

    async fn rank_candidates(&self, issue_context: &str, candidates: &[(u64, String)]) -> Result<RankingResult> {
        let candidates_json = serde_json::to_string(candidates).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })?;
        let prompt = format!(
            "Issue context:\n{issue_context}\n\nCandidate PRs (number, context):\n{candidates_json}\n\n\
             Rank by weighted criteria (temporal 30%, closing-comment semantic 30%, body 20%, \
             title 15%, file context 5%). Return JSON {{\"ranked\": [{{\"pr_number\": ..., \
             \"ranking_score\": ..., \"temporal_signal\": ..., \"max_semantic_signal\": ...}}]}}."
        );
        self.complete_json("Rank candidate pull requests for a deep-link issue match.", prompt).await
    }

    async fn synthesize_temporal_summary(&self, incidents: &[IncidentForSummary]) -> Result<String> {
        let incidents_json = serde_json::to_string(incidents).map_err(|source| ClientError::InvalidResponse { collaborator: "llm", source })?;
        let prompt = format!(
            "Incidents:\n{incidents_json}\n\n\
             Return JSON {{\"summary\": \"...\"}} with a short natural-language summary of this \
             block's incident history."
        );
        #[derive(Deserialize)]
        struct Wrapper {
            summary: String,
        }
        let wrapper: Wrapper = self.complete_json("Summarize a code block's incident history in one or two sentences.", prompt).await?;
        Ok(wrapper.summary)
    }
}
