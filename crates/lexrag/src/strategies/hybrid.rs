//! Hybrid strategy: lexical matching over raw article content, blended with
//! the embedding score when the gateway is reachable.
//!
//! Exact lexical hits (an article whose number matches an extracted
//! reference) must outrank looser semantic matches, which is why navigation
//! queries route here. Degrades to lexical-only when the gateway is down.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::types::{NodeType, QueryClassification, StrategyResult};

use super::semantic::cosine_similarity;
use super::{RetrievalStrategy, StrategyId};

const EXACT_SCORE: f32 = 1.0;
const LEXICAL_WEIGHT: f32 = 0.6;
const EMBEDDING_WEIGHT: f32 = 0.4;
const EXCERPT_CHARS: usize = 400;

pub struct HybridStrategy {
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayClient>,
}

impl HybridStrategy {
    pub fn new(storage: Arc<dyn Storage>, gateway: Arc<GatewayClient>) -> Self {
        Self { storage, gateway }
    }
}

#[async_trait]
impl RetrievalStrategy for HybridStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Hybrid
    }

    async fn search(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>, EngineError> {
        // Embedding blend is best-effort: a degraded gateway leaves the
        // lexical signal intact.
        let query_vector = match self
            .gateway
            .embed(&classification.normalized_query)
            .await
        {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::debug!(error = %e, "hybrid degrading to lexical-only");
                None
            }
        };

        let keywords: HashSet<&str> = classification
            .entities
            .keywords
            .iter()
            .map(String::as_str)
            .collect();

        let documents = self.storage.documents_in_scope(scope_id).await?;
        let mut results = Vec::new();

        for document in &documents {
            let nodes = self
                .storage
                .nodes(document.id, document.meta.analysis_version)
                .await?;
            let records = self
                .storage
                .embeddings(
                    document.id,
                    document.meta.analysis_version,
                    &[crate::types::OwnerKind::Article],
                )
                .await?;

            for node in nodes.iter().filter(|n| n.node_type == NodeType::Article) {
                let exact = classification
                    .entities
                    .article_refs
                    .iter()
                    .any(|r| *r == node.number);

                let score = if exact {
                    EXACT_SCORE
                } else {
                    let overlap = token_overlap(&keywords, &node.content);
                    if overlap <= 0.0 {
                        continue;
                    }
                    let embedding = query_vector
                        .as_deref()
                        .zip(records.iter().find(|r| r.owner_id == node.id))
                        .map(|(qv, record)| cosine_similarity(qv, &record.vector))
                        .unwrap_or(0.0);
                    if embedding > 0.0 {
                        LEXICAL_WEIGHT * overlap + EMBEDDING_WEIGHT * embedding
                    } else {
                        LEXICAL_WEIGHT * overlap
                    }
                };

                results.push(StrategyResult {
                    strategy: StrategyId::Hybrid,
                    candidate_id: node.id,
                    raw_score: score,
                    excerpt: truncate(&node.content, EXCERPT_CHARS),
                    source_document_id: document.id,
                    position: node.offset,
                    doc_timestamp: document.created_at.timestamp(),
                });
            }
        }

        results.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });
        results.truncate(limit);
        Ok(results)
    }
}

/// Share of query keywords appearing in the content, after the same
/// normalization the classifier applies.
fn token_overlap(keywords: &HashSet<&str>, content: &str) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let normalized = crate::classify::normalize_query(content);
    let content_tokens: HashSet<&str> = normalized.split_whitespace().collect();
    let matched = keywords
        .iter()
        .filter(|k| content_tokens.contains(**k))
        .count();
    matched as f32 / keywords.len() as f32
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::QueryClassifier;
    use crate::config::GatewayConfig;
    use crate::gateway::LanguageGateway;
    use crate::storage::InMemoryStorage;
    use crate::types::{DerivedMetadata, Document, StructureNode};
    use chrono::Utc;
    use uuid::Uuid;

    struct DownGateway;

    #[async_trait]
    impl LanguageGateway for DownGateway {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("provider offline")
        }
        async fn generate(&self, _p: &str, _c: &str) -> anyhow::Result<String> {
            anyhow::bail!("provider offline")
        }
        async fn rephrase(&self, _q: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("provider offline")
        }
    }

    fn article(document_id: Uuid, number: &str, content: &str, offset: usize) -> StructureNode {
        StructureNode {
            id: Uuid::new_v4(),
            document_id,
            node_type: NodeType::Article,
            number: number.into(),
            title: String::new(),
            content: content.into(),
            level: NodeType::Article.level(),
            display_order: offset as u32,
            parent_id: None,
            offset,
            version: 1,
        }
    }

    async fn seeded() -> (Arc<InMemoryStorage>, Uuid) {
        let storage = Arc::new(InMemoryStorage::new());
        let mut document = Document::new("Ley", "texto", "mx");
        document.meta = DerivedMetadata {
            analysis_version: 1,
            last_analyzed_at: Some(Utc::now()),
            ..Default::default()
        };
        let id = document.id;
        storage.insert_document(document).await.unwrap();
        storage
            .insert_nodes(vec![
                article(id, "100", "Artículo 100. De la soberanía nacional.", 100),
                article(
                    id,
                    "101",
                    "Artículo 101. La libertad de expresión es inviolable.",
                    200,
                ),
            ])
            .await
            .unwrap();
        (storage, id)
    }

    fn down_gateway() -> Arc<GatewayClient> {
        Arc::new(GatewayClient::new(
            Arc::new(DownGateway),
            &GatewayConfig {
                timeout_ms: 100,
                retries: 0,
                embed_cache_size: 8,
            },
        ))
    }

    #[tokio::test]
    async fn exact_article_reference_scores_highest() {
        let (storage, _) = seeded().await;
        let strategy = HybridStrategy::new(storage, down_gateway());
        let c = QueryClassifier::new().classify("Artículo 100", "mx");

        let results = strategy.search(&c, "mx", 5).await.unwrap();
        assert!(!results.is_empty());
        assert!((results[0].raw_score - EXACT_SCORE).abs() < f32::EPSILON);
        assert!(results[0].excerpt.contains("soberanía"));
    }

    #[tokio::test]
    async fn keyword_overlap_matches_without_gateway() {
        let (storage, _) = seeded().await;
        let strategy = HybridStrategy::new(storage, down_gateway());
        let c = QueryClassifier::new().classify("qué dice sobre la libertad de expresión", "mx");

        let results = strategy.search(&c, "mx", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].excerpt.contains("libertad"));
        assert!(results[0].raw_score > 0.0);
        assert!(results[0].raw_score < EXACT_SCORE);
    }
}
