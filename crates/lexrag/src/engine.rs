//! Query engine: the single entry point tying classification, dispatch,
//! fusion, caching and fallback together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analyze::StructureAnalyzer;
use crate::cache::{CachedAnswer, QueryCache};
use crate::classify::QueryClassifier;
use crate::config::{EngineConfig, StrategyWeights};
use crate::error::EngineError;
use crate::fallback::{candidate_documents, FallbackCoordinator, FallbackStage};
use crate::fusion::fuse;
use crate::gateway::{GatewayClient, LanguageGateway};
use crate::storage::Storage;
use crate::strategies::{StrategyId, StrategyOutcome, StrategySet, StrategyStatus};
use crate::types::{
    AnalysisResult, AnalysisTrigger, Document, DocumentId, QueryClassification, QueryResponse,
    RankedCandidate,
};

/// One classify-dispatch-fuse pass. Shared by the engine's primary path and
/// the fallback coordinator's retries so both rank identically.
pub(crate) struct Dispatcher {
    classifier: QueryClassifier,
    strategies: StrategySet,
    weights: StrategyWeights,
    rrf_k: usize,
    default_k: usize,
    total_budget: Duration,
}

pub(crate) struct DispatchRun {
    pub classification: QueryClassification,
    pub outcomes: Vec<StrategyOutcome>,
    pub candidates: Vec<RankedCandidate>,
    /// Best raw (pre-fusion) strategy score, the confidence signal the
    /// fallback trigger compares against.
    pub best_raw: f32,
}

impl DispatchRun {
    pub fn completed_strategies(&self) -> Vec<StrategyId> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StrategyStatus::Completed(_)))
            .map(|o| o.strategy)
            .collect()
    }
}

impl Dispatcher {
    fn new(classifier: QueryClassifier, strategies: StrategySet, config: &EngineConfig) -> Self {
        Self {
            classifier,
            strategies,
            weights: config.search.weights.clone(),
            rrf_k: config.search.rrf_k,
            default_k: config.search.default_k,
            total_budget: Duration::from_millis(config.query.total_budget_ms),
        }
    }

    pub(crate) async fn run(&self, query_text: &str, scope_id: &str) -> DispatchRun {
        let classification = self.classifier.classify(query_text, scope_id);
        if classification.needs_clarification {
            return DispatchRun {
                classification,
                outcomes: Vec::new(),
                candidates: Vec::new(),
                best_raw: 0.0,
            };
        }

        let deadline = Instant::now() + self.total_budget;
        let outcomes = self
            .strategies
            .dispatch(&classification, scope_id, self.default_k, deadline)
            .await;
        let candidates = fuse(&outcomes, &self.weights, self.rrf_k, self.default_k);
        let best_raw = outcomes
            .iter()
            .filter_map(|o| match &o.status {
                StrategyStatus::Completed(results) => results
                    .iter()
                    .map(|r| r.raw_score)
                    .fold(None, |best: Option<f32>, s| {
                        Some(best.map_or(s, |b| b.max(s)))
                    }),
                _ => None,
            })
            .fold(0.0f32, f32::max);

        DispatchRun {
            classification,
            outcomes,
            candidates,
            best_raw,
        }
    }
}

pub struct QueryEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    cache: Arc<QueryCache>,
    analyzer: Arc<StructureAnalyzer>,
    dispatcher: Arc<Dispatcher>,
    fallback: FallbackCoordinator,
}

impl QueryEngine {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        gateway: Arc<dyn LanguageGateway>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let gateway = Arc::new(GatewayClient::new(gateway, &config.gateway));
        let cache = Arc::new(QueryCache::new(config.cache.clone()));
        let analyzer = Arc::new(StructureAnalyzer::new(
            storage.clone(),
            gateway.clone(),
            cache.clone(),
            config.analysis.clone(),
        ));

        let classifier = if config.templates.is_empty() {
            QueryClassifier::new()
        } else {
            QueryClassifier::with_templates(&config.templates)?
        };
        let strategies = StrategySet::new(
            storage.clone(),
            gateway.clone(),
            Duration::from_millis(config.query.strategy_timeout_ms),
        );
        let dispatcher = Arc::new(Dispatcher::new(classifier, strategies, &config));

        let fallback = FallbackCoordinator::new(
            dispatcher.clone(),
            analyzer.clone(),
            storage.clone(),
            gateway,
            config.fallback.clone(),
            config.analysis.staleness_secs,
            config.query.min_confidence,
        );

        Ok(Self {
            config,
            storage,
            cache,
            analyzer,
            dispatcher,
            fallback,
        })
    }

    /// Store a document's raw text. Analysis is triggered separately so
    /// callers control when the embedding cost is paid.
    pub async fn ingest_document(
        &self,
        title: &str,
        text: &str,
        scope_id: &str,
    ) -> Result<DocumentId, EngineError> {
        let document = Document::new(title, text, scope_id);
        let id = document.id;
        self.storage.insert_document(document).await?;
        tracing::info!(document_id = %id, scope = scope_id, "document ingested");
        Ok(id)
    }

    /// Fire-and-forget analysis trigger. Idempotent while a run is in flight:
    /// concurrent triggers coalesce into the one execution.
    pub fn trigger_analysis(&self, document_id: DocumentId) -> AnalysisTrigger {
        if self.analyzer.is_running(document_id) {
            return AnalysisTrigger::AlreadyRunning;
        }
        let analyzer = self.analyzer.clone();
        tokio::spawn(async move {
            match analyzer.analyze(document_id).await {
                Ok(_) | Err(EngineError::AnalysisAlreadyRunning(_)) => {}
                Err(e) => {
                    tracing::error!(document_id = %document_id, error = %e, "background analysis failed");
                }
            }
        });
        AnalysisTrigger::Accepted
    }

    /// Run analysis inline and wait for the version flip.
    pub async fn analyze_now(&self, document_id: DocumentId) -> Result<AnalysisResult, EngineError> {
        self.analyzer.analyze(document_id).await
    }

    pub async fn query(&self, query_text: &str, scope_id: &str) -> Result<QueryResponse, EngineError> {
        if let Some(hit) = self.cache.get(query_text, scope_id) {
            return Ok(QueryResponse {
                answered: !hit.candidates.is_empty(),
                candidates: hit.candidates,
                classification: hit.classification,
                from_cache: true,
                strategies_used: hit.strategies_used,
                fallback_stage: None,
                needs_clarification: false,
            });
        }

        let run = self.dispatcher.run(query_text, scope_id).await;
        if run.classification.needs_clarification {
            return Ok(QueryResponse {
                candidates: Vec::new(),
                classification: run.classification,
                from_cache: false,
                strategies_used: Vec::new(),
                fallback_stage: None,
                answered: false,
                needs_clarification: true,
            });
        }

        let usable =
            !run.candidates.is_empty() && run.best_raw >= self.config.query.min_confidence;
        if usable {
            let strategies_used = run.completed_strategies();
            self.cache_answer(query_text, scope_id, &run.classification, &run.candidates, &strategies_used);
            return Ok(QueryResponse {
                candidates: run.candidates,
                classification: run.classification,
                from_cache: false,
                strategies_used,
                fallback_stage: None,
                answered: true,
                needs_clarification: false,
            });
        }

        tracing::info!(
            scope = scope_id,
            best_raw = run.best_raw,
            candidates = run.candidates.len(),
            "primary strategies came up short, escalating"
        );
        let outcome = self.fallback.run(query_text, scope_id).await;
        let answered = !outcome.candidates.is_empty();
        if answered {
            self.cache_answer(
                query_text,
                scope_id,
                &run.classification,
                &outcome.candidates,
                &outcome.strategies_used,
            );
        }

        // GaveUp is a no-answer response, never an error.
        let stage = if answered { outcome.stage } else { FallbackStage::GaveUp };
        Ok(QueryResponse {
            candidates: outcome.candidates,
            classification: run.classification,
            from_cache: false,
            strategies_used: outcome.strategies_used,
            fallback_stage: Some(stage),
            answered,
            needs_clarification: false,
        })
    }

    fn cache_answer(
        &self,
        query_text: &str,
        scope_id: &str,
        classification: &QueryClassification,
        candidates: &[RankedCandidate],
        strategies_used: &[StrategyId],
    ) {
        let payload = CachedAnswer {
            candidates: candidates.to_vec(),
            classification: classification.clone(),
            strategies_used: strategies_used.to_vec(),
        };
        self.cache.put(
            query_text,
            scope_id,
            payload,
            self.config.cache.ttl_for(classification.query_type),
            candidate_documents(candidates),
        );
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;

    struct NullGateway;

    #[async_trait]
    impl LanguageGateway for NullGateway {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn generate(&self, _p: &str, _c: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn rephrase(&self, _q: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(
            EngineConfig::default(),
            Arc::new(InMemoryStorage::new()),
            Arc::new(NullGateway),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_query_short_circuits_with_clarification() {
        let engine = engine();
        let response = engine.query("   ¿?  ", "mx").await.unwrap();
        assert!(response.needs_clarification);
        assert!(!response.answered);
        assert!(response.candidates.is_empty());
        // Clarify responses are never cached.
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.search.default_k = 0;
        let result = QueryEngine::new(
            config,
            Arc::new(InMemoryStorage::new()),
            Arc::new(NullGateway),
        );
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
