//! Retrieval strategies.
//!
//! A closed set of strategy identifiers with a fixed dispatch table: adding a
//! strategy is an explicit, exhaustively-checked change, not a duck-typed
//! registration. All strategies share one contract and are side-effect-free;
//! each runs under its own slice of the query deadline and a failure or
//! timeout is contained, never fatal for the query.

mod hybrid;
mod metadata;
mod semantic;
mod summary;

pub use hybrid::HybridStrategy;
pub use metadata::MetadataStrategy;
pub use semantic::SemanticStrategy;
pub use summary::SummaryStrategy;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::storage::Storage;
use crate::types::{QueryClassification, StrategyResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    Metadata,
    Semantic,
    Hybrid,
    Summary,
}

impl StrategyId {
    pub const ALL: [StrategyId; 4] = [
        StrategyId::Metadata,
        StrategyId::Semantic,
        StrategyId::Hybrid,
        StrategyId::Summary,
    ];
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyId::Metadata => "metadata",
            StrategyId::Semantic => "semantic",
            StrategyId::Hybrid => "hybrid",
            StrategyId::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// Common strategy contract: `search(classification, scope, limit)` producing
/// scored candidates, independently callable.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    async fn search(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>, EngineError>;
}

/// Terminal state of one strategy within one query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrategyStatus {
    Completed(Vec<StrategyResult>),
    /// Exceeded its share of the query deadline; cancelled cooperatively.
    TimedOut,
    /// Errored; logged and excluded from fusion.
    Failed(String),
    /// Skipped in degraded mode (gateway unavailable).
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub strategy: StrategyId,
    pub status: StrategyStatus,
    pub elapsed_ms: u64,
}

/// The fixed dispatch table over the closed strategy set.
pub struct StrategySet {
    metadata: MetadataStrategy,
    semantic: SemanticStrategy,
    hybrid: HybridStrategy,
    summary: SummaryStrategy,
    strategy_timeout: Duration,
}

impl StrategySet {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<GatewayClient>,
        strategy_timeout: Duration,
    ) -> Self {
        Self {
            metadata: MetadataStrategy::new(storage.clone()),
            semantic: SemanticStrategy::new(storage.clone(), gateway.clone()),
            hybrid: HybridStrategy::new(storage.clone(), gateway.clone()),
            summary: SummaryStrategy::new(storage, gateway),
            strategy_timeout,
        }
    }

    fn get(&self, id: StrategyId) -> &dyn RetrievalStrategy {
        match id {
            StrategyId::Metadata => &self.metadata,
            StrategyId::Semantic => &self.semantic,
            StrategyId::Hybrid => &self.hybrid,
            StrategyId::Summary => &self.summary,
        }
    }

    /// Launch all required strategies concurrently under one shared deadline.
    /// Fusion-side callers wait for every non-timed-out strategy; there is no
    /// streaming partial fusion.
    pub async fn dispatch(
        &self,
        classification: &QueryClassification,
        scope_id: &str,
        limit: usize,
        deadline: Instant,
    ) -> Vec<StrategyOutcome> {
        let futures = classification.required_strategies.iter().map(|&id| {
            let strategy = self.get(id);
            async move {
                let started = Instant::now();
                let remaining = deadline
                    .saturating_duration_since(started)
                    .min(self.strategy_timeout);

                let status = match tokio::time::timeout(
                    remaining,
                    strategy.search(classification, scope_id, limit),
                )
                .await
                {
                    Ok(Ok(results)) => StrategyStatus::Completed(results),
                    Ok(Err(e)) if e.is_gateway_failure() => {
                        tracing::warn!(strategy = %id, error = %e, "strategy skipped, gateway degraded");
                        StrategyStatus::Skipped(e.to_string())
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(strategy = %id, error = %e, "strategy failed");
                        StrategyStatus::Failed(e.to_string())
                    }
                    Err(_) => {
                        tracing::warn!(strategy = %id, "strategy timed out");
                        StrategyStatus::TimedOut
                    }
                };

                StrategyOutcome {
                    strategy: id,
                    status,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        });

        join_all(futures).await
    }
}
