//! In-memory reference implementation of the storage boundary.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::EngineError;
use crate::types::{
    DerivedMetadata, Document, DocumentId, EmbeddingRecord, OwnerKind, StructureNode, Summary,
};

use super::Storage;

#[derive(Default)]
pub struct InMemoryStorage {
    documents: DashMap<DocumentId, RwLock<Document>>,
    nodes: DashMap<DocumentId, Vec<StructureNode>>,
    summaries: DashMap<DocumentId, Vec<Summary>>,
    embeddings: DashMap<DocumentId, Vec<EmbeddingRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_document(&self, document: Document) -> Result<(), EngineError> {
        self.documents.insert(document.id, RwLock::new(document));
        Ok(())
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, EngineError> {
        Ok(self.documents.get(&id).map(|d| d.read().clone()))
    }

    async fn documents_in_scope(&self, scope_id: &str) -> Result<Vec<Document>, EngineError> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .map(|entry| entry.value().read().clone())
            .filter(|d| d.scope_id == scope_id || d.id.to_string() == scope_id)
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn publish_metadata(
        &self,
        id: DocumentId,
        meta: DerivedMetadata,
        expected_version: u64,
    ) -> Result<(), EngineError> {
        let entry = self
            .documents
            .get(&id)
            .ok_or(EngineError::DocumentNotFound(id))?;
        let mut doc = entry.write();
        if doc.meta.analysis_version != expected_version {
            return Err(EngineError::VersionConflict {
                document_id: id,
                expected: expected_version,
                found: doc.meta.analysis_version,
            });
        }
        doc.meta = meta;
        Ok(())
    }

    async fn insert_nodes(&self, nodes: Vec<StructureNode>) -> Result<(), EngineError> {
        for node in nodes {
            self.nodes.entry(node.document_id).or_default().push(node);
        }
        Ok(())
    }

    async fn nodes(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<Vec<StructureNode>, EngineError> {
        let mut rows: Vec<StructureNode> = self
            .nodes
            .get(&document_id)
            .map(|v| v.iter().filter(|n| n.version == version).cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|n| n.display_order);
        Ok(rows)
    }

    async fn article_by_number(
        &self,
        document_id: DocumentId,
        number: &str,
    ) -> Result<Option<StructureNode>, EngineError> {
        let version = match self.document(document_id).await? {
            Some(doc) => doc.meta.analysis_version,
            None => return Ok(None),
        };
        Ok(self.nodes.get(&document_id).and_then(|rows| {
            rows.iter()
                .find(|n| {
                    n.version == version
                        && n.node_type == crate::types::NodeType::Article
                        && n.number == number
                })
                .cloned()
        }))
    }

    async fn insert_summaries(&self, summaries: Vec<Summary>) -> Result<(), EngineError> {
        for summary in summaries {
            self.summaries
                .entry(summary.document_id)
                .or_default()
                .push(summary);
        }
        Ok(())
    }

    async fn summaries(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<Vec<Summary>, EngineError> {
        Ok(self
            .summaries
            .get(&document_id)
            .map(|v| v.iter().filter(|s| s.version == version).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<(), EngineError> {
        for record in records {
            self.embeddings
                .entry(record.document_id)
                .or_default()
                .push(record);
        }
        Ok(())
    }

    async fn embeddings(
        &self,
        document_id: DocumentId,
        version: u64,
        kinds: &[OwnerKind],
    ) -> Result<Vec<EmbeddingRecord>, EngineError> {
        Ok(self
            .embeddings
            .get(&document_id)
            .map(|v| {
                v.iter()
                    .filter(|r| r.version == version && kinds.contains(&r.owner_kind))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_version(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<usize, EngineError> {
        let mut removed = 0;
        if let Some(mut rows) = self.nodes.get_mut(&document_id) {
            let before = rows.len();
            rows.retain(|n| n.version != version);
            removed += before - rows.len();
        }
        if let Some(mut rows) = self.summaries.get_mut(&document_id) {
            let before = rows.len();
            rows.retain(|s| s.version != version);
            removed += before - rows.len();
        }
        if let Some(mut rows) = self.embeddings.get_mut(&document_id) {
            let before = rows.len();
            rows.retain(|r| r.version != version);
            removed += before - rows.len();
        }
        Ok(removed)
    }
}
