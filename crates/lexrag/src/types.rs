use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategies::StrategyId;

pub type DocumentId = Uuid;
pub type NodeId = Uuid;

/// Node kinds of the legal-document hierarchy, ordered by depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Title,
    Chapter,
    Section,
    Article,
    Paragraph,
}

impl NodeType {
    /// Hierarchy depth. Containment is decided by level, not by declared
    /// numbering, since legal numbering is not always monotonic.
    pub fn level(&self) -> u8 {
        match self {
            NodeType::Title => 1,
            NodeType::Chapter => 2,
            NodeType::Section => 3,
            NodeType::Article => 4,
            NodeType::Paragraph => 5,
        }
    }
}

/// Immutable source text plus derived metadata owned by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub text: String,
    /// Scope label this document belongs to (single document or a named set).
    pub scope_id: String,
    pub created_at: DateTime<Utc>,
    pub meta: DerivedMetadata,
}

impl Document {
    pub fn new(title: impl Into<String>, text: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            text: text.into(),
            scope_id: scope_id.into(),
            created_at: Utc::now(),
            meta: DerivedMetadata::default(),
        }
    }
}

/// Derived structural metadata. The Structure Analyzer is the sole writer;
/// `analysis_version` strictly increases on every re-analysis (0 = never
/// analyzed).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedMetadata {
    pub total_articles: usize,
    pub total_sections: usize,
    pub total_chapters: usize,
    pub table_of_contents: Vec<TocEntry>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub analysis_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub node_type: NodeType,
    pub number: String,
    pub title: String,
    pub level: u8,
    pub display_order: u32,
}

/// A node in the per-document hierarchy tree. Articles are leaves with a
/// unique `(document_id, number)` key per analysis version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureNode {
    pub id: NodeId,
    pub document_id: DocumentId,
    pub node_type: NodeType,
    pub number: String,
    pub title: String,
    pub content: String,
    pub level: u8,
    pub display_order: u32,
    pub parent_id: Option<NodeId>,
    /// Byte offset of the heading in the source text; drives ordering and
    /// containment.
    pub offset: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    Document,
    Chapter,
    Section,
    Article,
}

/// Generated once per analysis version and replaced wholesale on re-analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub level: SummaryLevel,
    /// None only at document level.
    pub reference_id: Option<NodeId>,
    pub text: String,
    pub key_points: Vec<String>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Chunk,
    Subchunk,
    Article,
    Summary,
}

/// A stored vector plus the text it was computed from. Text and position are
/// carried inline so strategies can excerpt and tie-break by document
/// position without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub owner_id: Uuid,
    pub owner_kind: OwnerKind,
    pub vector: Vec<f32>,
    pub text: String,
    pub position: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Metadata,
    Navigation,
    Content,
    Comparison,
    Summary,
    Unknown,
}

/// Entities pulled out of the query, independent of the type decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    pub article_refs: Vec<String>,
    pub law_names: Vec<String>,
    pub keywords: Vec<String>,
    pub date_range: Option<(i32, i32)>,
}

/// Transient classification output, recomputed per query and never persisted
/// beyond the cache entry it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    pub query_type: QueryType,
    pub confidence: f32,
    pub entities: Entities,
    pub required_strategies: Vec<StrategyId>,
    pub normalized_query: String,
    /// Set when the query is empty after normalization; the caller may
    /// short-circuit with a clarify response instead of dispatching.
    pub needs_clarification: bool,
}

/// One scored candidate from one strategy. Ephemeral, per query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy: StrategyId,
    pub candidate_id: Uuid,
    pub raw_score: f32,
    pub excerpt: String,
    pub source_document_id: DocumentId,
    /// Byte position in the source document, for deterministic tie-breaks.
    pub position: usize,
    /// Source document creation timestamp, for recency tie-breaks in fusion.
    pub doc_timestamp: i64,
}

/// A fused candidate after reciprocal rank fusion across strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate_id: Uuid,
    pub source_document_id: DocumentId,
    pub score: f32,
    pub excerpt: String,
    /// Strategies that voted for this candidate.
    pub voters: Vec<StrategyId>,
    pub doc_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub candidates: Vec<RankedCandidate>,
    pub classification: QueryClassification,
    pub from_cache: bool,
    pub strategies_used: Vec<StrategyId>,
    /// Deepest fallback stage reached, when the primary path came up short.
    pub fallback_stage: Option<crate::fallback::FallbackStage>,
    /// False when nothing usable was found — a no-answer result, distinct
    /// from an error.
    pub answered: bool,
    pub needs_clarification: bool,
}

/// Result of one structure analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document_id: DocumentId,
    pub version: u64,
    pub total_articles: usize,
    pub total_sections: usize,
    pub total_chapters: usize,
    /// True when extraction found no articles and a whole-document shell
    /// chunk was produced instead.
    pub shell: bool,
}

/// Outcome of an idempotent analysis trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisTrigger {
    Accepted,
    AlreadyRunning,
}
