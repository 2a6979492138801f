//! Fallback Coordinator.
//!
//! Escalates when the primary strategies return nothing usable, through an
//! explicit state machine: re-analysis of stale scopes, query expansion via
//! gateway rephrasing, then a bounded literal scan of raw document text.
//! Each step runs at most once per query; the coordinator never loops.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyze::StructureAnalyzer;
use crate::classify::normalize_query;
use crate::config::FallbackConfig;
use crate::engine::Dispatcher;
use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::strategies::StrategyId;
use crate::types::{Document, RankedCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    PrimaryFailed,
    ReanalyzeAttempted,
    ExpansionAttempted,
    ExhaustiveScan,
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// Deepest stage reached before producing a result (or giving up).
    pub stage: FallbackStage,
    pub candidates: Vec<RankedCandidate>,
    pub strategies_used: Vec<StrategyId>,
}

pub struct FallbackCoordinator {
    dispatcher: Arc<Dispatcher>,
    analyzer: Arc<StructureAnalyzer>,
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayClient>,
    config: FallbackConfig,
    staleness: ChronoDuration,
    min_confidence: f32,
}

impl FallbackCoordinator {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        analyzer: Arc<StructureAnalyzer>,
        storage: Arc<dyn Storage>,
        gateway: Arc<GatewayClient>,
        config: FallbackConfig,
        staleness_secs: i64,
        min_confidence: f32,
    ) -> Self {
        Self {
            dispatcher,
            analyzer,
            storage,
            gateway,
            config,
            staleness: ChronoDuration::seconds(staleness_secs),
            min_confidence,
        }
    }

    pub async fn run(&self, query_text: &str, scope_id: &str) -> FallbackOutcome {
        let mut stage = FallbackStage::PrimaryFailed;
        let documents = self
            .storage
            .documents_in_scope(scope_id)
            .await
            .unwrap_or_default();

        // Step 1: force a fresh analysis when the existing one predates the
        // staleness bound, then retry classification + strategies once.
        let stale: Vec<&Document> = documents.iter().filter(|d| self.is_stale(d)).collect();
        if !stale.is_empty() {
            stage = FallbackStage::ReanalyzeAttempted;
            for document in &stale {
                match self.analyzer.analyze(document.id).await {
                    Ok(result) => {
                        tracing::info!(
                            document_id = %document.id,
                            version = result.version,
                            "fallback re-analysis complete"
                        );
                    }
                    // Coalesced into the in-flight run; not a failure.
                    Err(EngineError::AnalysisAlreadyRunning(_)) => {}
                    Err(e) => {
                        tracing::warn!(document_id = %document.id, error = %e, "fallback re-analysis failed");
                    }
                }
            }

            let run = self.dispatcher.run(query_text, scope_id).await;
            if self.usable(&run.candidates, run.best_raw) {
                let strategies_used = run.completed_strategies();
                return FallbackOutcome {
                    stage,
                    candidates: run.candidates,
                    strategies_used,
                };
            }
        }

        // Step 2: gateway-produced alternative phrasings, first non-empty
        // fused result wins.
        stage = FallbackStage::ExpansionAttempted;
        match self.gateway.rephrase(query_text).await {
            Ok(alternatives) => {
                for alternative in alternatives.iter().take(self.config.max_rephrasings) {
                    if normalize_query(alternative) == normalize_query(query_text) {
                        continue;
                    }
                    let run = self.dispatcher.run(alternative, scope_id).await;
                    if self.usable(&run.candidates, run.best_raw) {
                        tracing::info!(alternative = %alternative, "rephrased query answered");
                        let strategies_used = run.completed_strategies();
                        return FallbackOutcome {
                            stage,
                            candidates: run.candidates,
                            strategies_used,
                        };
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "query expansion unavailable");
            }
        }

        // Step 3: bounded linear scan for literal keyword hits.
        stage = FallbackStage::ExhaustiveScan;
        let candidates = self.exhaustive_scan(query_text, &documents);
        if !candidates.is_empty() {
            return FallbackOutcome {
                stage,
                candidates,
                strategies_used: Vec::new(),
            };
        }

        FallbackOutcome {
            stage: FallbackStage::GaveUp,
            candidates: Vec::new(),
            strategies_used: Vec::new(),
        }
    }

    fn is_stale(&self, document: &Document) -> bool {
        match document.meta.last_analyzed_at {
            None => true,
            Some(at) => document.meta.analysis_version == 0 || at < Utc::now() - self.staleness,
        }
    }

    fn usable(&self, candidates: &[RankedCandidate], best_raw: f32) -> bool {
        !candidates.is_empty() && best_raw >= self.min_confidence
    }

    /// Last resort: line-oriented literal keyword scan over raw text, capped
    /// at a fixed match budget per query. One candidate per document, scored
    /// by hit count.
    fn exhaustive_scan(&self, query_text: &str, documents: &[Document]) -> Vec<RankedCandidate> {
        let normalized = normalize_query(query_text);
        let keywords: Vec<&str> = normalized
            .split_whitespace()
            .filter(|t| t.len() >= 4)
            .collect();
        if keywords.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut budget = self.config.scan_match_limit;

        for document in documents {
            if budget == 0 {
                break;
            }
            let mut hits = 0usize;
            let mut best_line: Option<&str> = None;

            for line in document.text.lines() {
                if budget == 0 {
                    break;
                }
                let line_normalized = normalize_query(line);
                if keywords.iter().any(|k| line_normalized.contains(k)) {
                    hits += 1;
                    budget -= 1;
                    if best_line.is_none() {
                        best_line = Some(line.trim());
                    }
                }
            }

            if let Some(line) = best_line {
                candidates.push(RankedCandidate {
                    candidate_id: document.id,
                    source_document_id: document.id,
                    score: 0.1 * hits as f32,
                    excerpt: line.to_string(),
                    voters: Vec::new(),
                    doc_timestamp: document.created_at.timestamp(),
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        candidates
    }
}

/// Scan helper exposed for the no-answer path: which documents a candidate
/// set draws from, for cache invalidation bookkeeping.
pub(crate) fn candidate_documents(candidates: &[RankedCandidate]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = candidates.iter().map(|c| c.source_document_id).collect();
    ids.sort();
    ids.dedup();
    ids
}
