//! Metadata strategy: direct lookups against derived structural metadata.
//!
//! Answers "how many / which" questions from counts and the table of
//! contents, and resolves extracted article references to their nodes.
//! O(1)/O(log n) storage lookups, no gateway calls. Returns a single
//! near-certain candidate when the referenced field or node exists, empty
//! otherwise.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::storage::Storage;
use crate::types::{Document, QueryClassification, QueryType, StrategyResult};

use super::{RetrievalStrategy, StrategyId};

const EXACT_SCORE: f32 = 1.0;
const EXCERPT_CHARS: usize = 400;

pub struct MetadataStrategy {
    storage: Arc<dyn Storage>,
}

impl MetadataStrategy {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn count_answer(document: &Document, keywords: &[String]) -> Option<String> {
        let meta = &document.meta;
        if meta.analysis_version == 0 {
            return None;
        }

        let mentions = |needle: &str| keywords.iter().any(|k| k.starts_with(needle));
        if mentions("articulo") {
            Some(format!(
                "{} tiene {} artículos.",
                document.title, meta.total_articles
            ))
        } else if mentions("capitulo") {
            Some(format!(
                "{} tiene {} capítulos.",
                document.title, meta.total_chapters
            ))
        } else if mentions("seccion") {
            Some(format!(
                "{} tiene {} secciones.",
                document.title, meta.total_sections
            ))
        } else {
            // Counting question without a named unit: report the full shape.
            Some(format!(
                "{} tiene {} artículos, {} capítulos y {} secciones.",
                document.title, meta.total_articles, meta.total_chapters, meta.total_sections
            ))
        }
    }
}

#[async_trait]
impl RetrievalStrategy for MetadataStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Metadata
    }

    async fn search(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>, EngineError> {
        let documents = self.storage.documents_in_scope(scope_id).await?;
        let mut results = Vec::new();

        for document in &documents {
            // Direct node lookup by extracted article reference.
            for reference in &classification.entities.article_refs {
                if let Some(node) = self
                    .storage
                    .article_by_number(document.id, reference)
                    .await?
                {
                    results.push(StrategyResult {
                        strategy: StrategyId::Metadata,
                        candidate_id: node.id,
                        raw_score: EXACT_SCORE,
                        excerpt: truncate(&node.content, EXCERPT_CHARS),
                        source_document_id: document.id,
                        position: node.offset,
                        doc_timestamp: document.created_at.timestamp(),
                    });
                }
            }

            // Derived-field lookup for counting questions.
            if classification.query_type == QueryType::Metadata {
                if let Some(answer) =
                    Self::count_answer(document, &classification.entities.keywords)
                {
                    results.push(StrategyResult {
                        strategy: StrategyId::Metadata,
                        candidate_id: document.id,
                        raw_score: EXACT_SCORE,
                        excerpt: answer,
                        source_document_id: document.id,
                        position: 0,
                        doc_timestamp: document.created_at.timestamp(),
                    });
                }
            }
        }

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
