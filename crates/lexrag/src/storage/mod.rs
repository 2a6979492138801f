//! Persistence boundary.
//!
//! The engine only needs point lookup by id, scoped scan by document/scope,
//! and upsert with optimistic versioning on `Document.analysis_version`. No
//! wire format is mandated; the in-memory implementation is the reference.

mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::{
    DerivedMetadata, Document, DocumentId, EmbeddingRecord, OwnerKind, StructureNode, Summary,
};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_document(&self, document: Document) -> Result<(), EngineError>;

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, EngineError>;

    /// All documents whose scope matches. A scope id that equals a document
    /// id string selects that single document.
    async fn documents_in_scope(&self, scope_id: &str) -> Result<Vec<Document>, EngineError>;

    /// Atomic pointer flip: replaces derived metadata only if the current
    /// `analysis_version` equals `expected_version`. Publishing happens after
    /// all derived rows for the new version are persisted, so readers never
    /// observe a half-written version.
    async fn publish_metadata(
        &self,
        id: DocumentId,
        meta: DerivedMetadata,
        expected_version: u64,
    ) -> Result<(), EngineError>;

    async fn insert_nodes(&self, nodes: Vec<StructureNode>) -> Result<(), EngineError>;

    /// Structure nodes of one document at one analysis version, in display
    /// order.
    async fn nodes(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<Vec<StructureNode>, EngineError>;

    /// Article lookup by number text, at the document's published version.
    async fn article_by_number(
        &self,
        document_id: DocumentId,
        number: &str,
    ) -> Result<Option<StructureNode>, EngineError>;

    async fn insert_summaries(&self, summaries: Vec<Summary>) -> Result<(), EngineError>;

    async fn summaries(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<Vec<Summary>, EngineError>;

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<(), EngineError>;

    /// Embedding records of the given owner kinds at one version.
    async fn embeddings(
        &self,
        document_id: DocumentId,
        version: u64,
        kinds: &[OwnerKind],
    ) -> Result<Vec<EmbeddingRecord>, EngineError>;

    /// Remove all derived rows of a superseded version. Old-version rows stay
    /// valid until the pointer flip, so this runs only after publishing.
    async fn purge_version(
        &self,
        document_id: DocumentId,
        version: u64,
    ) -> Result<usize, EngineError>;
}
