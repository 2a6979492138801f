use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classify::QueryTemplate;
use crate::error::EngineError;
use crate::types::QueryType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub query: QueryConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub analysis: AnalysisConfig,
    pub gateway: GatewayConfig,
    pub fallback: FallbackConfig,
    /// External query template registry: ordered `(pattern, type, priority)`
    /// entries that seed/extend the classifier's pattern groups. Treated as
    /// configuration, not logic.
    #[serde(default)]
    pub templates: Vec<QueryTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Shared deadline for the whole parallel strategy region, cache-miss path.
    pub total_budget_ms: u64,
    /// Individual strategy budget within the shared deadline.
    pub strategy_timeout_ms: u64,
    /// Fused answers whose best raw strategy score falls below this trigger
    /// the fallback coordinator.
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    /// RRF damping constant. 60 avoids over-weighting rank-1 of a short list.
    pub rrf_k: usize,
    pub weights: StrategyWeights,
}

/// Per-strategy fusion weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyWeights {
    pub metadata: f32,
    pub semantic: f32,
    pub hybrid: f32,
    pub summary: f32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            metadata: 1.0,
            semantic: 1.0,
            hybrid: 1.0,
            summary: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_secs: i64,
    /// Longer TTL for answers about static structure (counts, navigation).
    pub metadata_ttl_secs: i64,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl_for(&self, query_type: QueryType) -> i64 {
        match query_type {
            QueryType::Metadata | QueryType::Navigation => self.metadata_ttl_secs,
            _ => self.default_ttl_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Articles longer than this are split into sub-chunks.
    pub max_chunk_chars: usize,
    pub subchunk_overlap_chars: usize,
    /// Analyses older than this are considered stale by the fallback
    /// coordinator and force a re-run.
    pub staleness_secs: i64,
    pub summary_key_points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub embed_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub max_rephrasings: usize,
    /// Cap on literal keyword matches collected by the exhaustive scan.
    pub scan_match_limit: usize,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.query.total_budget_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "query.total_budget_ms must be > 0".into(),
            ));
        }
        if self.query.strategy_timeout_ms > self.query.total_budget_ms {
            return Err(EngineError::InvalidConfig(
                "query.strategy_timeout_ms must not exceed total_budget_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.query.min_confidence) {
            return Err(EngineError::InvalidConfig(
                "query.min_confidence must be in [0.0, 1.0]".into(),
            ));
        }
        if self.search.default_k == 0 {
            return Err(EngineError::InvalidConfig(
                "search.default_k must be > 0".into(),
            ));
        }
        if self.search.rrf_k == 0 {
            return Err(EngineError::InvalidConfig("search.rrf_k must be > 0".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(EngineError::InvalidConfig(
                "cache.max_entries must be > 0".into(),
            ));
        }
        if self.analysis.max_chunk_chars < 100 {
            return Err(EngineError::InvalidConfig(
                "analysis.max_chunk_chars must be >= 100".into(),
            ));
        }
        if self.analysis.subchunk_overlap_chars >= self.analysis.max_chunk_chars {
            return Err(EngineError::InvalidConfig(
                "analysis.subchunk_overlap_chars must be < max_chunk_chars".into(),
            ));
        }
        if self.gateway.embed_cache_size == 0 {
            return Err(EngineError::InvalidConfig(
                "gateway.embed_cache_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query: QueryConfig {
                total_budget_ms: 5_000,
                strategy_timeout_ms: 2_000,
                min_confidence: 0.15,
            },
            search: SearchConfig {
                default_k: 10,
                rrf_k: 60,
                weights: StrategyWeights::default(),
            },
            cache: CacheConfig {
                default_ttl_secs: 24 * 3600,
                // The corpus is static legal text; structural answers can
                // live considerably longer.
                metadata_ttl_secs: 7 * 24 * 3600,
                max_entries: 10_000,
            },
            analysis: AnalysisConfig {
                max_chunk_chars: 1_750,
                subchunk_overlap_chars: 200,
                staleness_secs: 30 * 24 * 3600,
                summary_key_points: 3,
            },
            gateway: GatewayConfig {
                timeout_ms: 10_000,
                retries: 2,
                embed_cache_size: 1_000,
            },
            fallback: FallbackConfig {
                max_rephrasings: 3,
                scan_match_limit: 20,
            },
            templates: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_budget() {
        let mut config = EngineConfig::default();
        config.query.total_budget_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_strategy_timeout_over_budget() {
        let mut config = EngineConfig::default();
        config.query.strategy_timeout_ms = config.query.total_budget_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metadata_answers_get_longer_ttl() {
        let config = EngineConfig::default();
        assert!(config.cache.ttl_for(QueryType::Metadata) > config.cache.ttl_for(QueryType::Content));
    }
}
