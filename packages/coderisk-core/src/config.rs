//! Tiered configuration (§6).
//!
//! Every option is supplied via environment variable, with an optional TOML
//! blob providing the same keys for local runs and tests. Env always wins
//! over the file, matching the precedence the orchestrator CLI documents.
//! This keeps the teacher's config *shape* — a typed struct assembled from a
//! preset of defaults with explicit per-field overrides, validated once at
//! load time — without carrying over its IR-specific content.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHostConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub primary_model: String,
    pub prefilter_model: Option<String>,
    pub prefilter_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub staging_dsn: String,
    pub graph_uri: String,
    pub graph_user: Option<String>,
    pub graph_password: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub floor_remaining: u32,
    pub ceiling_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { floor_remaining: 100, ceiling_per_hour: 5000 }
    }
}

/// Worker-pool sizes per stage (§5 defaults: S1=4, S2=2, S3=8, S4=4, S5-S7=2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSizes {
    pub s1_stage: usize,
    pub s2_ingest: usize,
    pub s3_link: usize,
    pub s4_atomize: usize,
    pub s5_index_incident: usize,
    pub s6_index_ownership: usize,
    pub s7_index_coupling: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            s1_stage: 4,
            s2_ingest: 2,
            s3_link: 8,
            s4_atomize: 4,
            s5_index_incident: 2,
            s6_index_ownership: 2,
            s7_index_coupling: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompositeScoreWeights {
    pub incident: f64,
    pub coupling: f64,
    pub staleness: f64,
    pub ownership: f64,
}

impl Default for CompositeScoreWeights {
    fn default() -> Self {
        Self { incident: 0.40, coupling: 0.25, staleness: 0.20, ownership: 0.15 }
    }
}

impl From<CompositeScoreWeights> for crate::risk_score::RiskWeights {
    fn from(w: CompositeScoreWeights) -> Self {
        crate::risk_score::RiskWeights {
            incident: w.incident,
            coupling: w.coupling,
            staleness: w.staleness,
            ownership: w.ownership,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source_host: SourceHostConfig,
    pub llm: LlmConfig,
    pub store: StoreConfig,
    #[serde(default = "default_days_window")]
    pub days_window: u32,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pool_sizes: PoolSizes,
    #[serde(default = "default_chunk_budget_bytes")]
    pub chunk_budget_bytes: usize,
    #[serde(default)]
    pub composite_score_weights: CompositeScoreWeights,
}

fn default_days_window() -> u32 {
    90
}

fn default_chunk_budget_bytes() -> usize {
    100 * 1024
}

impl PipelineConfig {
    /// Loads required fields from `vars` (normally `std::env::vars()` collected
    /// into a map, or a parsed TOML table merged under the same keys), applying
    /// the §6 defaults for anything optional.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self> {
        let require = |key: &str| -> Result<String> {
            vars.get(key)
                .cloned()
                .ok_or_else(|| CoreError::config(format!("missing required config key: {key}")))
        };

        let source_host = SourceHostConfig {
            base_url: require("CODERISK_SOURCE_HOST_BASE_URL")?,
            token: require("CODERISK_SOURCE_HOST_TOKEN")?,
        };

        let llm = LlmConfig {
            endpoint: require("CODERISK_LLM_ENDPOINT")?,
            api_key: require("CODERISK_LLM_API_KEY")?,
            primary_model: require("CODERISK_LLM_PRIMARY_MODEL")?,
            prefilter_model: vars.get("CODERISK_LLM_PREFILTER_MODEL").cloned(),
            prefilter_enabled: vars
                .get("CODERISK_LLM_PREFILTER_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        let store = StoreConfig {
            staging_dsn: require("CODERISK_STAGING_DSN")?,
            graph_uri: require("CODERISK_GRAPH_URI")?,
            graph_user: vars.get("CODERISK_GRAPH_USER").cloned(),
            graph_password: vars.get("CODERISK_GRAPH_PASSWORD").cloned(),
        };

        let days_window = vars
            .get("CODERISK_DAYS_WINDOW")
            .map(|v| v.parse::<u32>().map_err(CoreError::parse))
            .transpose()?
            .unwrap_or_else(default_days_window);

        let chunk_budget_bytes = vars
            .get("CODERISK_CHUNK_BUDGET_BYTES")
            .map(|v| v.parse::<usize>().map_err(CoreError::parse))
            .transpose()?
            .unwrap_or_else(default_chunk_budget_bytes);

        let rate_limit = RateLimitConfig {
            floor_remaining: vars
                .get("CODERISK_RATE_LIMIT_FLOOR")
                .map(|v| v.parse().map_err(CoreError::parse))
                .transpose()?
                .unwrap_or(RateLimitConfig::default().floor_remaining),
            ceiling_per_hour: vars
                .get("CODERISK_RATE_LIMIT_CEILING")
                .map(|v| v.parse().map_err(CoreError::parse))
                .transpose()?
                .unwrap_or(RateLimitConfig::default().ceiling_per_hour),
        };

        let config = PipelineConfig {
            source_host,
            llm,
            store,
            days_window,
            rate_limit,
            pool_sizes: PoolSizes::default(),
            chunk_budget_bytes,
            composite_score_weights: CompositeScoreWeights::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.days_window == 0 {
            return Err(CoreError::config("days_window must be > 0"));
        }
        if self.chunk_budget_bytes == 0 {
            return Err(CoreError::config("chunk_budget_bytes must be > 0"));
        }
        let w = &self.composite_score_weights;
        let total = w.incident + w.coupling + w.staleness + w.ownership;
        if (total - 1.0).abs() > 0.01 {
            return Err(CoreError::config(format!(
                "composite_score_weights must sum to ~1.0, got {total}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("CODERISK_SOURCE_HOST_BASE_URL".into(), "https://api.github.com".into());
        m.insert("CODERISK_SOURCE_HOST_TOKEN".into(), "ghp_xxx".into());
        m.insert("CODERISK_LLM_ENDPOINT".into(), "https://llm.example.com".into());
        m.insert("CODERISK_LLM_API_KEY".into(), "sk-xxx".into());
        m.insert("CODERISK_LLM_PRIMARY_MODEL".into(), "gpt-5".into());
        m.insert("CODERISK_STAGING_DSN".into(), "postgres://localhost/coderisk".into());
        m.insert("CODERISK_GRAPH_URI".into(), "bolt://localhost:7687".into());
        m
    }

    #[test]
    fn defaults_applied_when_optional_keys_absent() {
        let config = PipelineConfig::from_env_map(&base_vars()).unwrap();
        assert_eq!(config.days_window, 90);
        assert_eq!(config.chunk_budget_bytes, 100 * 1024);
        assert_eq!(config.pool_sizes.s3_link, 8);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let mut vars = base_vars();
        vars.remove("CODERISK_LLM_API_KEY");
        assert!(PipelineConfig::from_env_map(&vars).is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut vars = base_vars();
        let config = PipelineConfig::from_env_map(&vars).unwrap();
        assert!((config.composite_score_weights.incident
            + config.composite_score_weights.coupling
            + config.composite_score_weights.staleness
            + config.composite_score_weights.ownership
            - 1.0)
            .abs()
            < 0.001);
        vars.insert("CODERISK_DAYS_WINDOW".into(), "0".into());
        assert!(PipelineConfig::from_env_map(&vars).is_err());
    }
}
