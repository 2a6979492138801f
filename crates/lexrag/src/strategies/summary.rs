//! Summary strategy: semantic search restricted to summary embeddings, at
//! the hierarchy level implied by the classification entities.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::types::{OwnerKind, QueryClassification, StrategyResult, Summary, SummaryLevel};

use super::semantic::cosine_similarity;
use super::{RetrievalStrategy, StrategyId};

const EXCERPT_CHARS: usize = 400;

pub struct SummaryStrategy {
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayClient>,
}

impl SummaryStrategy {
    pub fn new(storage: Arc<dyn Storage>, gateway: Arc<GatewayClient>) -> Self {
        Self { storage, gateway }
    }

    /// Levels implied by the entities: article references narrow to article
    /// summaries, chapter/section keywords narrow to those layers, anything
    /// else searches the chapter and document layers.
    fn levels_for(classification: &QueryClassification) -> Vec<SummaryLevel> {
        if !classification.entities.article_refs.is_empty() {
            return vec![SummaryLevel::Article];
        }
        let mentions = |needle: &str| {
            classification
                .entities
                .keywords
                .iter()
                .any(|k| k.starts_with(needle))
        };
        if mentions("capitulo") {
            vec![SummaryLevel::Chapter]
        } else if mentions("seccion") {
            vec![SummaryLevel::Section]
        } else {
            vec![SummaryLevel::Chapter, SummaryLevel::Document]
        }
    }
}

#[async_trait]
impl RetrievalStrategy for SummaryStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Summary
    }

    async fn search(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>, EngineError> {
        let query_vector = self
            .gateway
            .embed(&classification.normalized_query)
            .await?;

        let levels = Self::levels_for(classification);
        let documents = self.storage.documents_in_scope(scope_id).await?;
        let mut results = Vec::new();

        for document in &documents {
            let version = document.meta.analysis_version;
            let summaries: Vec<Summary> = self
                .storage
                .summaries(document.id, version)
                .await?
                .into_iter()
                .filter(|s| levels.contains(&s.level))
                .collect();
            let records = self
                .storage
                .embeddings(document.id, version, &[OwnerKind::Summary])
                .await?;

            for summary in &summaries {
                let Some(record) = records.iter().find(|r| r.owner_id == summary.id) else {
                    continue;
                };
                let score = cosine_similarity(&query_vector, &record.vector);
                if score <= 0.0 {
                    continue;
                }
                results.push(StrategyResult {
                    strategy: StrategyId::Summary,
                    candidate_id: summary.reference_id.unwrap_or(document.id),
                    raw_score: score,
                    excerpt: truncate(&summary.text, EXCERPT_CHARS),
                    source_document_id: document.id,
                    position: 0,
                    doc_timestamp: document.created_at.timestamp(),
                });
            }
        }

        results.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        results.truncate(limit);
        Ok(results)
    }
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

    #[test]
    fn article_refs_imply_article_level() {
        let c = QueryClassifier::new().classify("resumen del artículo 27", "mx");
        assert_eq!(
            SummaryStrategy::levels_for(&c),
            vec![SummaryLevel::Article]
        );
    }

    #[test]
    fn chapter_keyword_implies_chapter_level() {
        let c = QueryClassifier::new().classify("resumen de los capitulos", "mx");
        assert_eq!(
            SummaryStrategy::levels_for(&c),
            vec![SummaryLevel::Chapter]
        );
    }

    #[test]
    fn default_levels_are_chapter_and_document() {
        let c = QueryClassifier::new().classify("dame un resumen general", "mx");
        assert_eq!(
            SummaryStrategy::levels_for(&c),
            vec![SummaryLevel::Chapter, SummaryLevel::Document]
        );
    }
}
