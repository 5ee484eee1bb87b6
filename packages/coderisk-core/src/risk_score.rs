//! Composite risk scoring (§4.7).
//!
//! `f` is a bounded saturating transform. We use `x / (x + k)`, the
//! Michaelis-Menten / hyperbolic-saturation curve: it is monotonic, maps
//! `0 -> 0`, asymptotes to `1` as `x -> inf`, and its half-saturation point
//! `k` is a single tunable per input with an intuitive meaning ("the value
//! at which this factor is already half as risky as it can get"). This is
//! the transform documented as required by the contract; a different choice
//! (e.g. `1 - e^-x`) would also satisfy "bounded saturating" but would need
//! its own half-life constant per factor instead of one shared shape.

use serde::{Deserialize, Serialize};

fn saturating(x: f64, k: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    x / (x + k)
}

/// Half-saturation constants, one per input factor. Distinct from the
/// combination weights below: a weight says how much a factor matters once
/// normalized, a half-saturation constant says what "a lot" of that factor
/// looks like in its own units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SaturationConstants {
    pub incident_count_k: f64,
    pub avg_coupling_rate_k: f64,
    pub staleness_days_k: f64,
    pub familiarity_concentration_k: f64,
}

impl Default for SaturationConstants {
    fn default() -> Self {
        Self {
            incident_count_k: 3.0,
            avg_coupling_rate_k: 0.5,
            staleness_days_k: 180.0,
            familiarity_concentration_k: 0.6,
        }
    }
}

/// Combination weights (§4.7 defaults: 0.40, 0.25, 0.20, 0.15).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    pub incident: f64,
    pub coupling: f64,
    pub staleness: f64,
    pub ownership: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self { incident: 0.40, coupling: 0.25, staleness: 0.20, ownership: 0.15 }
    }
}

/// Fraction of a block's edit history attributable to its single most
/// frequent author (§3.1 familiarity_map): high concentration means only
/// one person can safely touch this code, which is itself a risk factor.
pub fn familiarity_concentration(familiarity_map: &std::collections::HashMap<String, u32>) -> f64 {
    let total: u32 = familiarity_map.values().sum();
    if total == 0 {
        return 0.0;
    }
    let max = familiarity_map.values().copied().max().unwrap_or(0);
    max as f64 / total as f64
}

pub fn composite_risk_score(
    incident_count: u32,
    avg_coupling_rate: f64,
    staleness_days: Option<i64>,
    familiarity_map: &std::collections::HashMap<String, u32>,
    weights: &RiskWeights,
    k: &SaturationConstants,
) -> f64 {
    let staleness = staleness_days.unwrap_or(0).max(0) as f64;
    let concentration = familiarity_concentration(familiarity_map);

    let score = weights.incident * saturating(incident_count as f64, k.incident_count_k)
        + weights.coupling * saturating(avg_coupling_rate, k.avg_coupling_rate_k)
        + weights.staleness * saturating(staleness, k.staleness_days_k)
        + weights.ownership * saturating(concentration, k.familiarity_concentration_k);

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_inputs_yield_zero_score() {
        let map = std::collections::HashMap::new();
        let score = composite_risk_score(0, 0.0, None, &map, &RiskWeights::default(), &SaturationConstants::default());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_is_monotonic_in_incident_count() {
        let map = std::collections::HashMap::new();
        let weights = RiskWeights::default();
        let k = SaturationConstants::default();
        let low = composite_risk_score(1, 0.0, None, &map, &weights, &k);
        let high = composite_risk_score(10, 0.0, None, &map, &weights, &k);
        assert!(high > low);
    }

    #[test]
    fn score_never_exceeds_one() {
        let mut map = std::collections::HashMap::new();
        map.insert("alice".to_string(), 1000u32);
        let score = composite_risk_score(
            10_000,
            1.0,
            Some(100_000),
            &map,
            &RiskWeights::default(),
            &SaturationConstants::default(),
        );
        assert!(score <= 1.0);
    }

    #[test]
    fn sole_author_yields_full_concentration() {
        let mut map = std::collections::HashMap::new();
        map.insert("alice".to_string(), 5);
        assert_eq!(familiarity_concentration(&map), 1.0);
    }

    #[test]
    fn even_split_yields_half_concentration() {
        let mut map = std::collections::HashMap::new();
        map.insert("alice".to_string(), 5);
        map.insert("bob".to_string(), 5);
        assert_eq!(familiarity_concentration(&map), 0.5);
    }
}
