use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    GithubTimelineVerified,
    ExplicitBidirectional,
    ExplicitOneway,
    DeepLinkFinder,
}

impl DetectionMethod {
    /// Base confidence per method, as fixed by §4.3.
    pub fn base_confidence(&self) -> f64 {
        match self {
            DetectionMethod::GithubTimelineVerified => 0.95,
            DetectionMethod::ExplicitBidirectional => 0.90,
            DetectionMethod::ExplicitOneway => 0.85,
            DetectionMethod::DeepLinkFinder => 0.70,
        }
    }

    /// Only these three are eligible for FIXED_BY edges (§4.3 "Detection methods").
    pub fn eligible_for_fixed_by(&self) -> bool {
        !matches!(self, DetectionMethod::DeepLinkFinder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    High,
    Medium,
    Low,
}

impl LinkQuality {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.85 {
            LinkQuality::High
        } else if confidence >= 0.70 {
            LinkQuality::Medium
        } else {
            LinkQuality::Low
        }
    }
}

/// Additive boosts/penalties that compose the final confidence (§4.3 Phase 2a/2b).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    pub bidirectional_boost: f64,
    pub semantic_boost: f64,
    pub temporal_boost: f64,
    pub file_context_boost: f64,
    pub negative_penalty: f64,
}

impl ConfidenceBreakdown {
    /// Sum of base + boosts − penalties, capped at 0.98 (§4.3 Phase 2a).
    pub fn final_confidence(&self) -> f64 {
        let raw = self.base
            + self.bidirectional_boost
            + self.semantic_boost
            + self.temporal_boost
            + self.file_context_boost
            - self.negative_penalty;
        raw.clamp(0.0, 0.98)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuePRLink {
    pub repo_id: i64,
    pub issue_number: u64,
    pub pr_number: u64,
    pub detection_method: DetectionMethod,
    pub confidence: ConfidenceBreakdown,
    pub evidence_sources: Vec<String>,
    pub rationale: String,
}

impl IssuePRLink {
    pub fn final_confidence(&self) -> f64 {
        self.confidence.final_confidence()
    }

    pub fn link_quality(&self) -> LinkQuality {
        LinkQuality::from_confidence(self.final_confidence())
    }

    /// The four criteria of §4.3 / invariant 4 that together gate a FIXED_BY
    /// edge, as opposed to the weaker ASSOCIATED_WITH tier.
    pub fn qualifies_for_fixed_by(&self) -> bool {
        let method_ok = self.detection_method.eligible_for_fixed_by();
        let base_ok = self.confidence.base >= 0.85;
        let no_negative = self.confidence.negative_penalty == 0.0;
        let corroborated = self.confidence.temporal_boost >= 0.12
            || self.confidence.bidirectional_boost > 0.0
            || (self.confidence.semantic_boost >= 0.10 && self.has_explicit_fixes_keyword());

        method_ok && base_ok && no_negative && corroborated
    }

    fn has_explicit_fixes_keyword(&self) -> bool {
        matches!(
            self.detection_method,
            DetectionMethod::ExplicitBidirectional | DetectionMethod::ExplicitOneway
        )
    }

    /// Graph edge classification per §4.3 "Classification for graph".
    pub fn classify(&self) -> LinkClassification {
        if self.qualifies_for_fixed_by() {
            LinkClassification::FixedBy
        } else if self.final_confidence() >= 0.70 {
            LinkClassification::AssociatedWith
        } else {
            LinkClassification::NoLink {
                reason: "below_association_threshold".to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkClassification {
    FixedBy,
    AssociatedWith,
    NoLink { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_bidirectional_immediate_close_hits_cap() {
        // End-to-end scenario 4 from §8: base 0.90 + 0.10 + 0.15 = 1.15 -> capped 0.98
        let link = IssuePRLink {
            repo_id: 1,
            issue_number: 42,
            pr_number: 7,
            detection_method: DetectionMethod::ExplicitBidirectional,
            confidence: ConfidenceBreakdown {
                base: 0.90,
                bidirectional_boost: 0.10,
                temporal_boost: 0.15,
                ..Default::default()
            },
            evidence_sources: vec!["pr_body".into(), "issue_body".into()],
            rationale: "fixes keyword + mutual reference + fast close".into(),
        };

        assert_eq!(link.final_confidence(), 0.98);
        assert_eq!(link.link_quality(), LinkQuality::High);
        assert_eq!(link.classify(), LinkClassification::FixedBy);
    }

    #[test]
    fn temporal_coincidence_is_rejected() {
        // End-to-end scenario 5: deep-link finder, weak signals -> no link.
        let link = IssuePRLink {
            repo_id: 1,
            issue_number: 99,
            pr_number: 100,
            detection_method: DetectionMethod::DeepLinkFinder,
            confidence: ConfidenceBreakdown {
                base: 0.50,
                ..Default::default()
            },
            evidence_sources: vec![],
            rationale: "temporal_coincidence_rejected".into(),
        };

        assert!(!link.qualifies_for_fixed_by());
        assert_eq!(
            link.classify(),
            LinkClassification::NoLink {
                reason: "below_association_threshold".into()
            }
        );
    }

    #[test]
    fn deep_link_finder_never_yields_fixed_by_even_at_high_confidence() {
        let link = IssuePRLink {
            repo_id: 1,
            issue_number: 1,
            pr_number: 1,
            detection_method: DetectionMethod::DeepLinkFinder,
            confidence: ConfidenceBreakdown {
                base: 0.85,
                temporal_boost: 0.13,
                ..Default::default()
            },
            evidence_sources: vec![],
            rationale: "ranked top candidate".into(),
        };

        assert!(!link.qualifies_for_fixed_by());
        assert_eq!(link.classify(), LinkClassification::AssociatedWith);
    }
}
