//! Content-addressed query cache.
//!
//! Keys are sha2 hashes of (normalized query, scope id), with the exact same
//! normalization the classifier uses, so cache keys and classification stay
//! consistent across runs. Expired entries are evicted lazily on the next
//! lookup; a changed answer is a new entry, not an update.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::normalize_query;
use crate::config::CacheConfig;
use crate::strategies::StrategyId;
use crate::types::{DocumentId, QueryClassification, RankedCandidate};

/// The payload stored per entry: everything needed to answer a repeat query
/// without re-running classification or strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub candidates: Vec<RankedCandidate>,
    pub classification: QueryClassification,
    pub strategies_used: Vec<StrategyId>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    query_text: String,
    payload: CachedAnswer,
    hit_count: u64,
    /// Monotonic insertion order, for deterministic capacity eviction when
    /// timestamps collide.
    seq: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    /// Documents the answer drew from, for invalidation on re-analysis.
    document_ids: Vec<DocumentId>,
}

pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    next_seq: std::sync::atomic::AtomicU64,
    config: CacheConfig,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
            config,
        }
    }

    /// Content hash of (normalized query, scope).
    pub fn key(query_text: &str, scope_id: &str) -> String {
        let normalized = normalize_query(query_text);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(scope_id.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, query_text: &str, scope_id: &str) -> Option<CachedAnswer> {
        let key = Self::key(query_text, scope_id);
        let now = Utc::now();
        let mut entries = self.entries.write();

        match entries.get_mut(&key) {
            Some(entry) if entry.expires_at > now => {
                // Hit accounting is advisory telemetry, not a correctness
                // input.
                entry.hit_count += 1;
                entry.last_accessed_at = now;
                tracing::debug!(key = %key, hits = entry.hit_count, "cache hit");
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(&key);
                tracing::debug!(key = %key, "cache entry expired, evicted lazily");
                None
            }
            None => None,
        }
    }

    pub fn put(
        &self,
        query_text: &str,
        scope_id: &str,
        payload: CachedAnswer,
        ttl_secs: i64,
        document_ids: Vec<DocumentId>,
    ) {
        let key = Self::key(query_text, scope_id);
        let now = Utc::now();
        let mut entries = self.entries.write();

        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            // Capacity bound: drop the oldest entry by creation time.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| (e.created_at, e.seq))
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                query_text: query_text.to_string(),
                payload,
                hit_count: 0,
                seq: self
                    .next_seq
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                created_at: now,
                expires_at: now + Duration::seconds(ttl_secs),
                last_accessed_at: now,
                document_ids,
            },
        );
    }

    /// Drop every entry whose answer drew from the given document. Called by
    /// the analyzer after a version flip so stale answers cannot outlive a
    /// structure change.
    pub fn invalidate_document(&self, document_id: DocumentId) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.document_ids.contains(&document_id));
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(document_id = %document_id, dropped = dropped, "cache invalidated on re-analysis");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Original query text recorded for an entry, for audit/debug surfaces.
    pub fn recorded_query(&self, query_text: &str, scope_id: &str) -> Option<String> {
        let key = Self::key(query_text, scope_id);
        self.entries.read().get(&key).map(|e| e.query_text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entities, QueryType};
    use uuid::Uuid;

    fn answer() -> CachedAnswer {
        CachedAnswer {
            candidates: vec![],
            classification: QueryClassification {
                query_type: QueryType::Metadata,
                confidence: 0.9,
                entities: Entities::default(),
                required_strategies: vec![StrategyId::Metadata],
                normalized_query: "cuantos articulos".into(),
                needs_clarification: false,
            },
            strategies_used: vec![StrategyId::Metadata],
        }
    }

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            default_ttl_secs: 3600,
            metadata_ttl_secs: 7200,
            max_entries,
        }
    }

    #[test]
    fn key_is_invariant_under_normalization() {
        // Case folding + accent folding + punctuation stripping make these
        // normalization-equivalent.
        assert_eq!(
            QueryCache::key("¿Cuántos artículos?", "mx"),
            QueryCache::key("cuantos articulos", "mx"),
        );
        assert_eq!(
            QueryCache::key("  Artículo   100. ", "mx"),
            QueryCache::key("articulo 100", "mx"),
        );
    }

    #[test]
    fn key_depends_on_scope() {
        assert_ne!(
            QueryCache::key("cuantos articulos", "mx"),
            QueryCache::key("cuantos articulos", "ar"),
        );
    }

    #[test]
    fn hit_after_put_miss_before() {
        let cache = QueryCache::new(config(10));
        assert!(cache.get("¿Cuántos artículos?", "mx").is_none());
        cache.put("¿Cuántos artículos?", "mx", answer(), 3600, vec![]);
        assert!(cache.get("cuantos articulos", "mx").is_some());
    }

    #[test]
    fn expired_entries_are_lazily_evicted() {
        let cache = QueryCache::new(config(10));
        cache.put("consulta", "mx", answer(), -1, vec![]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("consulta", "mx").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_created() {
        let cache = QueryCache::new(config(2));
        cache.put("primera", "mx", answer(), 3600, vec![]);
        cache.put("segunda", "mx", answer(), 3600, vec![]);
        cache.put("tercera", "mx", answer(), 3600, vec![]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("primera", "mx").is_none());
        assert!(cache.get("tercera", "mx").is_some());
    }

    #[test]
    fn invalidation_drops_entries_touching_the_document() {
        let cache = QueryCache::new(config(10));
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        cache.put("sobre a", "mx", answer(), 3600, vec![doc_a]);
        cache.put("sobre b", "mx", answer(), 3600, vec![doc_b]);

        cache.invalidate_document(doc_a);
        assert!(cache.get("sobre a", "mx").is_none());
        assert!(cache.get("sobre b", "mx").is_some());
    }
}
