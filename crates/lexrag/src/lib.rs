//! Query routing and multi-strategy retrieval over hierarchically structured
//! legal documents.
//!
//! A query is classified into a type, dispatched to the strategies registered
//! for that type, and the per-strategy rankings are fused with weighted
//! reciprocal rank fusion. Structural metadata (article counts, hierarchy
//! trees, summaries) is derived asynchronously by the Structure Analyzer and
//! versioned so the query path never sees a half-written analysis.

pub mod analyze;
pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fusion;
pub mod gateway;
pub mod storage;
pub mod strategies;
pub mod types;

// Re-export primary types for convenience
pub use config::EngineConfig;
pub use engine::QueryEngine;
pub use error::EngineError;
pub use fallback::FallbackStage;
pub use gateway::{GatewayClient, HttpGateway, LanguageGateway};
pub use storage::{InMemoryStorage, Storage};
pub use strategies::StrategyId;
pub use types::{
    AnalysisResult, AnalysisTrigger, Document, DocumentId, QueryClassification, QueryResponse,
    QueryType, RankedCandidate,
};

pub use uuid::Uuid;
