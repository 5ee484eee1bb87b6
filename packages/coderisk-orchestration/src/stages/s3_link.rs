//! S3 Link — issue<->PR validation (§4.3). The four phases share the
//! adaptive temporal tolerance computed in Phase 0 but are otherwise
//! independent passes over the staged issue/PR/timeline/comment set.
//!
//! Phase 2a's "semantic similarity" is specified only as a signal strength,
//! not a contract the LLM port exposes (`coderisk_clients::LlmClient` has no
//! generic embedding/similarity method — only the structured extraction,
//! classification, and ranking calls named in §4.3's own phases). This
//! handler approximates it with a bounded lexical Jaccard overlap over
//! title/body tokens rather than inventing a new port method for a single
//! boost term; recorded as an open-question resolution in DESIGN.md.

use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler, StageMetrics, StageOutput};
use async_trait::async_trait;
use chrono::Duration;
use coderisk_clients::domain::llm::{IssueClassification, ReferenceType};
use coderisk_core::model::{
    ConfidenceBreakdown, DetectionMethod, Issue, IssuePRLink, PullRequest, StageId,
    TimelineEventKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Serialize, Deserialize)]
struct S3CacheData {
    links_emitted: usize,
    adaptive_tolerance_secs: i64,
}

pub struct S3LinkHandler;

impl S3LinkHandler {
    pub fn new() -> Self {
        Self
    }

    /// §4.3 Phase 0: `T = max(36h, 0.75 * median_lead_time)`, capped at 7
    /// days; falls back to a fixed +/-3 days when the merged-PR sample is
    /// too small to trust a median.
    fn adaptive_tolerance(prs: &[PullRequest]) -> Duration {
        let mut leads: Vec<i64> = prs
            .iter()
            .filter_map(|pr| pr.merged_at.map(|merged| (merged - pr.created_at).num_seconds()))
            .filter(|s| *s >= 0)
            .collect();

        if leads.len() < 10 {
            return Duration::days(3);
        }

        leads.sort_unstable();
        let mid = leads.len() / 2;
        let median_secs = if leads.len() % 2 == 0 { (leads[mid - 1] + leads[mid]) / 2 } else { leads[mid] };

        let floor = Duration::hours(36).num_seconds();
        let candidate = ((median_secs as f64) * 0.75) as i64;
        let capped = candidate.max(floor).min(Duration::days(7).num_seconds());
        Duration::seconds(capped)
    }

    fn jaccard(a: &str, b: &str) -> f64 {
        let tokenize = |s: &str| -> HashSet<String> {
            s.split_whitespace().map(|t| t.to_lowercase()).filter(|t| t.len() > 2).collect()
        };
        let ta = tokenize(a);
        let tb = tokenize(b);
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let intersection = ta.intersection(&tb).count() as f64;
        let union = ta.union(&tb).count() as f64;
        intersection / union
    }

    fn has_negative_signal(text: &str) -> bool {
        let lower = text.to_lowercase();
        ["not fixed", "still broken", "reopened"].iter().any(|phrase| lower.contains(phrase))
    }

    fn mentions_pr(text: &str, pr_number: u64) -> bool {
        text.contains(&format!("#{pr_number}"))
    }

    fn temporal_boost(issue: &Issue, pr: &PullRequest) -> f64 {
        let (Some(closed), Some(merged)) = (issue.closed_at, pr.merged_at) else { return 0.0 };
        let delta = (closed - merged).num_seconds().abs();
        if delta < Duration::minutes(5).num_seconds() {
            0.15
        } else if delta < Duration::hours(1).num_seconds() {
            0.12
        } else if delta < Duration::hours(24).num_seconds() {
            0.05
        } else {
            0.0
        }
    }

    fn score_candidate(issue: &Issue, pr: &PullRequest, base: f64, detection_method: DetectionMethod) -> IssuePRLink {
        let bidirectional = Self::mentions_pr(&issue.body, pr.number);
        let negative = Self::has_negative_signal(&issue.body);
        let semantic = Self::jaccard(&issue.title, &pr.title).max(Self::jaccard(&issue.body, &pr.body));

        let confidence = ConfidenceBreakdown {
            base,
            bidirectional_boost: if bidirectional { 0.10 } else { 0.0 },
            semantic_boost: if semantic >= 0.70 { 0.15 } else { 0.0 },
            temporal_boost: Self::temporal_boost(issue, pr),
            file_context_boost: 0.0,
            negative_penalty: if negative { 0.15 } else { 0.0 },
        };

        let detection_method = if bidirectional && detection_method == DetectionMethod::ExplicitOneway {
            DetectionMethod::ExplicitBidirectional
        } else {
            detection_method
        };

        IssuePRLink {
            repo_id: issue.repo_id,
            issue_number: issue.number,
            pr_number: pr.number,
            detection_method,
            confidence,
            evidence_sources: vec!["issue_body".into(), "pr_title".into(), "pr_body".into()],
            rationale: format!("{:?} base={base:.2}", detection_method),
        }
    }
}

impl Default for S3LinkHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for S3LinkHandler {
    fn stage_id(&self) -> StageId {
        StageId::S3Link
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutput> {
        let mut metrics = StageMetrics::default();

        let issues = ctx.staging.all_issues(ctx.repo_id).await?;
        let prs = ctx.staging.all_prs(ctx.repo_id).await?;
        let merged_prs: Vec<&PullRequest> = prs.iter().filter(|p| p.merged_at.is_some()).collect();

        let tolerance = Self::adaptive_tolerance(&merged_prs.iter().map(|p| (*p).clone()).collect::<Vec<_>>());

        let mut linked_issue_numbers: HashSet<u64> = HashSet::new();
        let mut linked_pr_numbers: HashSet<u64> = HashSet::new();
        let mut candidates: Vec<IssuePRLink> = Vec::new();

        // Phase 0: timeline-verified cross references.
        for issue in &issues {
            let events = ctx.staging.timeline_events_for_issue(ctx.repo_id, issue.number).await?;
            for event in events {
                let pr_number = match event.kind {
                    TimelineEventKind::ClosedByPullRequest { pr_number } => Some(pr_number),
                    TimelineEventKind::ReferencedByCommit { ref commit_sha } => prs
                        .iter()
                        .find(|pr| pr.merge_commit_sha.as_deref() == Some(commit_sha.as_str()))
                        .map(|pr| pr.number),
                    TimelineEventKind::Other { .. } => None,
                };
                if let Some(pr_number) = pr_number {
                    if let Some(pr) = prs.iter().find(|p| p.number == pr_number) {
                        candidates.push(Self::score_candidate(
                            issue,
                            pr,
                            DetectionMethod::GithubTimelineVerified.base_confidence(),
                            DetectionMethod::GithubTimelineVerified,
                        ));
                        linked_issue_numbers.insert(issue.number);
                        linked_pr_numbers.insert(pr_number);
                    }
                }
            }
        }

        // Phase 1: explicit extraction for merged PRs not already timeline-verified.
        for pr in &merged_prs {
            if linked_pr_numbers.contains(&pr.number) {
                continue;
            }
            let excerpt = excerpt(&pr.body);
            let result = ctx.llm.extract_references(&pr.title, &excerpt).await?;
            for reference in result.references {
                let Some(issue) = issues.iter().find(|i| i.number == reference.issue_number) else { continue };
                let base = match reference.reference_type {
                    ReferenceType::Fixes | ReferenceType::Closes | ReferenceType::Resolves => 0.90,
                    ReferenceType::Mentions => 0.70,
                    ReferenceType::External => 0.60,
                };
                candidates.push(Self::score_candidate(issue, pr, base, DetectionMethod::ExplicitOneway));
                linked_issue_numbers.insert(issue.number);
                linked_pr_numbers.insert(pr.number);
            }
        }

        for link in candidates {
            ctx.staging.upsert_issue_pr_link(&link).await?;
            ctx.graph.write_issue_pr_link_edge(&link).await?;
            metrics.units_processed += 1;
        }

        // Phase 2b: deep-link finder for closed issues with no explicit refs.
        for issue in issues.iter().filter(|i| i.closed_at.is_some() && !linked_issue_numbers.contains(&i.number)) {
            let classification = ctx.llm.classify_issue(&issue.title, &issue.body).await?;
            if !matches!(classification, IssueClassification::FixedWithCode | IssueClassification::Unclear) {
                continue;
            }

            let closed_at = issue.closed_at.unwrap();
            let window_candidates: Vec<&PullRequest> = merged_prs
                .iter()
                .filter(|pr| {
                    let merged = pr.merged_at.unwrap();
                    (merged - closed_at).num_seconds().abs() <= tolerance.num_seconds()
                        && !linked_pr_numbers.contains(&pr.number)
                })
                .copied()
                .collect();

            if window_candidates.is_empty() {
                continue;
            }

            let pairs: Vec<(u64, String)> = window_candidates.iter().map(|pr| (pr.number, pr.title.clone())).collect();
            let ranking = ctx.llm.rank_candidates(&issue.body, &pairs).await?;

            let Some(top) = ranking.ranked.into_iter().max_by(|a, b| a.ranking_score.total_cmp(&b.ranking_score)) else {
                continue;
            };

            let safety_brake_trips = top.temporal_signal < 0.20 && top.max_semantic_signal < 0.50;
            if top.ranking_score < 0.65 || safety_brake_trips {
                continue;
            }

            let Some(pr) = window_candidates.iter().find(|p| p.number == top.pr_number) else { continue };
            let final_confidence = (0.50 + 0.35 * top.ranking_score).min(0.85);
            let link = IssuePRLink {
                repo_id: issue.repo_id,
                issue_number: issue.number,
                pr_number: pr.number,
                detection_method: DetectionMethod::DeepLinkFinder,
                confidence: ConfidenceBreakdown { base: final_confidence, ..Default::default() },
                evidence_sources: vec!["deep_link_ranking".into()],
                rationale: format!("ranking_score={:.2}", top.ranking_score),
            };

            ctx.staging.upsert_issue_pr_link(&link).await?;
            ctx.graph.write_issue_pr_link_edge(&link).await?;
            linked_pr_numbers.insert(pr.number);
            metrics.units_processed += 1;
        }

        let cache_data = bincode::serialize(&S3CacheData {
            links_emitted: metrics.units_processed,
            adaptive_tolerance_secs: tolerance.num_seconds(),
        })?;
        Ok(StageOutput { cache_data, metrics })
    }
}

/// §4.3 Phase 1: "bounded comment excerpts: first 1000 + last 500 characters if >2000".
fn excerpt(body: &str) -> String {
    if body.len() <= 2000 {
        return body.to_string();
    }
    let head: String = body.chars().take(1000).collect();
    let tail: String = body.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pr(number: u64, created_offset_secs: i64, lead_secs: i64) -> PullRequest {
        let created = Utc::now() - Duration::seconds(created_offset_secs);
        PullRequest {
            repo_id: 1,
            number,
            title: "fix".into(),
            body: "fixes bug".into(),
            author: "a".into(),
            created_at: created,
            merged_at: Some(created + Duration::seconds(lead_secs)),
            merge_commit_sha: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn small_sample_falls_back_to_fixed_three_days() {
        let prs: Vec<PullRequest> = (0..5).map(|i| pr(i, 100_000, 3600)).collect();
        let tolerance = S3LinkHandler::adaptive_tolerance(&prs);
        assert_eq!(tolerance, Duration::days(3));
    }

    #[test]
    fn median_lead_time_drives_tolerance_when_sample_large_enough() {
        let prs: Vec<PullRequest> = (0..12).map(|i| pr(i, 100_000, 48 * 3600)).collect();
        let tolerance = S3LinkHandler::adaptive_tolerance(&prs);
        // 0.75 * 48h = 36h, which is exactly the floor.
        assert_eq!(tolerance, Duration::hours(36));
    }

    #[test]
    fn negative_signal_detected_in_issue_body() {
        assert!(S3LinkHandler::has_negative_signal("still broken after merge"));
        assert!(!S3LinkHandler::has_negative_signal("all good now"));
    }

    #[test]
    fn long_body_is_truncated_to_head_and_tail() {
        let body = "a".repeat(3000);
        let result = excerpt(&body);
        assert!(result.len() < body.len());
        assert!(result.contains("..."));
    }
}
