//! Structure Analyzer: the background pipeline that keeps the structural
//! metadata the query router depends on.
//!
//! Runs asynchronously per document, at most once concurrently per document
//! id. Derived rows are written under a fresh analysis version and the
//! document pointer flips only after every row is persisted, so the query
//! path never observes a half-written version.

mod hierarchy;
mod summary;

pub use hierarchy::{extract, split_subchunks, ExtractedStructure};

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::config::AnalysisConfig;
use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::types::{
    AnalysisResult, DerivedMetadata, Document, DocumentId, EmbeddingRecord, NodeType, OwnerKind,
    StructureNode, Summary,
};

use summary::SummaryBuilder;

pub struct StructureAnalyzer {
    storage: Arc<dyn Storage>,
    gateway: Arc<GatewayClient>,
    cache: Arc<QueryCache>,
    config: AnalysisConfig,
    in_flight: DashMap<DocumentId, ()>,
}

impl StructureAnalyzer {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<GatewayClient>,
        cache: Arc<QueryCache>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            storage,
            gateway,
            cache,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn is_running(&self, document_id: DocumentId) -> bool {
        self.in_flight.contains_key(&document_id)
    }

    /// Analyze one document. A second call for the same document while one is
    /// in flight returns `AnalysisAlreadyRunning` and is coalesced by the
    /// caller — exactly one execution bumps the version.
    pub async fn analyze(&self, document_id: DocumentId) -> Result<AnalysisResult, EngineError> {
        match self.in_flight.entry(document_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::AnalysisAlreadyRunning(document_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let result = self.run(document_id).await;
        self.in_flight.remove(&document_id);
        result
    }

    async fn run(&self, document_id: DocumentId) -> Result<AnalysisResult, EngineError> {
        let document = self
            .storage
            .document(document_id)
            .await?
            .ok_or(EngineError::DocumentNotFound(document_id))?;

        let old_version = document.meta.analysis_version;
        let new_version = old_version + 1;

        let extracted = hierarchy::extract(&document, new_version);
        let shell = extracted.total_articles == 0;
        if shell {
            // Empty extraction is recoverable: produce a shell analysis
            // (whole-document chunks) so fallback scanning still has
            // something to search.
            tracing::warn!(
                document_id = %document_id,
                "no articles extracted, producing shell analysis"
            );
        }

        let embeddings = if shell {
            self.shell_chunks(&document, new_version).await
        } else {
            self.article_chunks(&document, &extracted.nodes, new_version)
                .await
        };

        let summaries = if shell {
            Vec::new()
        } else {
            SummaryBuilder::new(&self.gateway, &self.config)
                .build(&document, &extracted.nodes, new_version)
                .await
        };
        let summary_embeddings = self.summary_chunks(&document, &summaries, new_version).await;

        // A prior run may have failed between insert and publish, leaving
        // orphaned rows at this version; clear them so a retry stays
        // idempotent. Then persist all derived rows before the pointer flip.
        self.storage.purge_version(document_id, new_version).await?;
        self.storage.insert_nodes(extracted.nodes).await?;
        self.storage.insert_summaries(summaries).await?;
        self.storage.insert_embeddings(embeddings).await?;
        self.storage.insert_embeddings(summary_embeddings).await?;

        let meta = DerivedMetadata {
            total_articles: extracted.total_articles,
            total_sections: extracted.total_sections,
            total_chapters: extracted.total_chapters,
            table_of_contents: extracted.toc,
            last_analyzed_at: Some(Utc::now()),
            analysis_version: new_version,
        };
        self.storage
            .publish_metadata(document_id, meta, old_version)
            .await?;

        // Old-version rows were valid until the flip; purge them now and drop
        // any cached answers that referenced this document.
        if old_version > 0 {
            let purged = self.storage.purge_version(document_id, old_version).await?;
            tracing::debug!(document_id = %document_id, purged = purged, "purged stale version rows");
        }
        self.cache.invalidate_document(document_id);

        tracing::info!(
            document_id = %document_id,
            version = new_version,
            articles = extracted.total_articles,
            chapters = extracted.total_chapters,
            sections = extracted.total_sections,
            shell = shell,
            "document analysis complete"
        );

        Ok(AnalysisResult {
            document_id,
            version: new_version,
            total_articles: extracted.total_articles,
            total_sections: extracted.total_sections,
            total_chapters: extracted.total_chapters,
            shell,
        })
    }

    /// One embedding record per article, plus sub-chunks for long articles.
    /// A failed embed call drops that record and logs — the analysis itself
    /// proceeds (degraded mode).
    async fn article_chunks(
        &self,
        document: &Document,
        nodes: &[StructureNode],
        version: u64,
    ) -> Vec<EmbeddingRecord> {
        let mut records = Vec::new();
        for node in nodes.iter().filter(|n| n.node_type == NodeType::Article) {
            match self.gateway.embed(&node.content).await {
                Ok(vector) => records.push(EmbeddingRecord {
                    id: Uuid::new_v4(),
                    document_id: document.id,
                    owner_id: node.id,
                    owner_kind: OwnerKind::Article,
                    vector,
                    text: node.content.clone(),
                    position: node.offset,
                    version,
                }),
                Err(e) => {
                    tracing::warn!(node = %node.number, error = %e, "article embed failed, skipping record");
                    continue;
                }
            }

            if node.content.chars().count() > self.config.max_chunk_chars {
                for (rel_offset, text) in hierarchy::split_subchunks(
                    &node.content,
                    self.config.max_chunk_chars,
                    self.config.subchunk_overlap_chars,
                ) {
                    match self.gateway.embed(&text).await {
                        Ok(vector) => records.push(EmbeddingRecord {
                            id: Uuid::new_v4(),
                            document_id: document.id,
                            owner_id: node.id,
                            owner_kind: OwnerKind::Subchunk,
                            vector,
                            text,
                            position: node.offset + rel_offset,
                            version,
                        }),
                        Err(e) => {
                            tracing::warn!(node = %node.number, error = %e, "subchunk embed failed");
                        }
                    }
                }
            }
        }
        records
    }

    /// Shell analysis: whole-document sliding chunks with no structure.
    async fn shell_chunks(&self, document: &Document, version: u64) -> Vec<EmbeddingRecord> {
        let mut records = Vec::new();
        for (offset, text) in hierarchy::split_subchunks(
            &document.text,
            self.config.max_chunk_chars,
            self.config.subchunk_overlap_chars,
        ) {
            match self.gateway.embed(&text).await {
                Ok(vector) => records.push(EmbeddingRecord {
                    id: Uuid::new_v4(),
                    document_id: document.id,
                    owner_id: document.id,
                    owner_kind: OwnerKind::Chunk,
                    vector,
                    text,
                    position: offset,
                    version,
                }),
                Err(e) => {
                    tracing::warn!(document_id = %document.id, error = %e, "shell chunk embed failed");
                }
            }
        }
        records
    }

    async fn summary_chunks(
        &self,
        document: &Document,
        summaries: &[Summary],
        version: u64,
    ) -> Vec<EmbeddingRecord> {
        let mut records = Vec::new();
        for summary in summaries {
            match self.gateway.embed(&summary.text).await {
                Ok(vector) => records.push(EmbeddingRecord {
                    id: Uuid::new_v4(),
                    document_id: document.id,
                    owner_id: summary.id,
                    owner_kind: OwnerKind::Summary,
                    vector,
                    text: summary.text.clone(),
                    position: 0,
                    version,
                }),
                Err(e) => {
                    tracing::warn!(level = ?summary.level, error = %e, "summary embed failed");
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, GatewayConfig};
    use crate::gateway::LanguageGateway;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;

    struct EchoGateway;

    #[async_trait]
    impl LanguageGateway for EchoGateway {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn generate(&self, _prompt: &str, context: &str) -> anyhow::Result<String> {
            Ok(format!("Resumen: {}", context.chars().take(40).collect::<String>()))
        }
        async fn rephrase(&self, _query: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn analyzer(storage: Arc<InMemoryStorage>) -> StructureAnalyzer {
        let gateway = Arc::new(crate::gateway::GatewayClient::new(
            Arc::new(EchoGateway),
            &GatewayConfig {
                timeout_ms: 1_000,
                retries: 0,
                embed_cache_size: 8,
            },
        ));
        let cache = Arc::new(QueryCache::new(CacheConfig {
            default_ttl_secs: 3_600,
            metadata_ttl_secs: 3_600,
            max_entries: 16,
        }));
        StructureAnalyzer::new(
            storage,
            gateway,
            cache,
            AnalysisConfig {
                max_chunk_chars: 1_750,
                subchunk_overlap_chars: 200,
                staleness_secs: 3_600,
                summary_key_points: 3,
            },
        )
    }

    #[tokio::test]
    async fn retry_after_partial_failure_leaves_no_orphaned_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        let document = Document::new(
            "Ley",
            "Artículo 1. Primero.\nArtículo 2. Segundo.\n",
            "mx",
        );
        let id = document.id;
        storage.insert_document(document).await.unwrap();

        // Rows a previous run persisted before failing to publish version 1.
        storage
            .insert_nodes(vec![StructureNode {
                id: Uuid::new_v4(),
                document_id: id,
                node_type: NodeType::Article,
                number: "1".into(),
                title: String::new(),
                content: "fila huérfana".into(),
                level: NodeType::Article.level(),
                display_order: 0,
                parent_id: None,
                offset: 0,
                version: 1,
            }])
            .await
            .unwrap();

        let analyzer = analyzer(storage.clone());
        let result = analyzer.analyze(id).await.unwrap();
        assert_eq!(result.version, 1);

        // The retry replaced the orphaned rows instead of duplicating them.
        let nodes = storage.nodes(id, 1).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.content != "fila huérfana"));
    }
}
