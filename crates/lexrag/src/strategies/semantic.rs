//! Semantic strategy: cosine similarity over chunk embeddings.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::types::{OwnerKind, QueryClassification, StrategyResult};

use super::{RetrievalStrategy, StrategyId};

const EXCERPT_CHARS: usize = 400;

pub struct SemanticStrategy {
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayClient>,
}

impl SemanticStrategy {
    pub fn new(storage: Arc<dyn Storage>, gateway: Arc<GatewayClient>) -> Self {
        Self { storage, gateway }
    }
}

#[async_trait]
impl RetrievalStrategy for SemanticStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Semantic
    }

    async fn search(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>, EngineError> {
        // A gateway failure here propagates as degraded mode: the dispatcher
        // records this strategy as skipped, not the query as failed.
        let query_vector = self
            .gateway
            .embed(&classification.normalized_query)
            .await?;

        let documents = self.storage.documents_in_scope(scope_id).await?;
        let mut results = Vec::new();

        for document in &documents {
            let records = self
                .storage
                .embeddings(
                    document.id,
                    document.meta.analysis_version,
                    &[OwnerKind::Chunk, OwnerKind::Subchunk, OwnerKind::Article],
                )
                .await?;

            for record in records {
                let score = cosine_similarity(&query_vector, &record.vector);
                if score <= 0.0 {
                    continue;
                }
                results.push(StrategyResult {
                    strategy: StrategyId::Semantic,
                    candidate_id: record.owner_id,
                    raw_score: score,
                    excerpt: truncate(&record.text, EXCERPT_CHARS),
                    source_document_id: document.id,
                    position: record.position,
                    doc_timestamp: document.created_at.timestamp(),
                });
            }
        }

        // Score descending; ties broken by earlier document position.
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

/// Cosine similarity; 0.0 for mismatched or zero-norm vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
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

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, -0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn mismatched_or_zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
