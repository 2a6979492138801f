//! Error taxonomy for the retrieval engine.
//!
//! Only failures the engine actually raises live here. Per-strategy timeouts
//! and errors are contained within a query execution and are carried by
//! `StrategyStatus`, not surfaced as errors; fallback exhaustion is a typed
//! no-answer response, not an error either.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A second analysis request arrived while one is in flight. Not an
    /// error in the failure sense — the request is coalesced.
    #[error("analysis already running for document {0}")]
    AnalysisAlreadyRunning(Uuid),

    #[error("language gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("language gateway call timed out after {0}ms")]
    GatewayTimeout(u64),

    #[error("document {0} not found")]
    DocumentNotFound(Uuid),

    /// Optimistic version check failed on publish. The analyzer treats this
    /// as a lost race and gives up rather than overwrite newer data.
    #[error("version conflict on document {document_id}: expected {expected}, found {found}")]
    VersionConflict {
        document_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid query pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl EngineError {
    /// Whether the gateway is the failing collaborator. Used to switch the
    /// query path into degraded mode (semantic/summary skipped).
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            EngineError::GatewayUnavailable(_) | EngineError::GatewayTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gateway_variants_trigger_degraded_mode() {
        assert!(EngineError::GatewayUnavailable("down".into()).is_gateway_failure());
        assert!(EngineError::GatewayTimeout(100).is_gateway_failure());
        assert!(!EngineError::DocumentNotFound(Uuid::nil()).is_gateway_failure());
        assert!(!EngineError::AnalysisAlreadyRunning(Uuid::nil()).is_gateway_failure());
        assert!(!EngineError::InvalidConfig("bad".into()).is_gateway_failure());
    }
}
