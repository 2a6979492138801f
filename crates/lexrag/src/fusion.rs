//! Reciprocal Rank Fusion across heterogeneous strategy outputs.
//!
//! Each candidate contributes `weight / (rank + k)` per strategy list it
//! appears in, summed by candidate identity (source document + node/chunk
//! id). A strategy that returned nothing or errored simply contributes zero.
//! Contributions are summed in a fixed strategy order, so fusion is
//! commutative with respect to strategy execution order.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::StrategyWeights;
use crate::strategies::{StrategyId, StrategyOutcome, StrategyStatus};
use crate::types::{DocumentId, RankedCandidate};

impl StrategyWeights {
    pub fn get(&self, strategy: StrategyId) -> f32 {
        match strategy {
            StrategyId::Metadata => self.metadata,
            StrategyId::Semantic => self.semantic,
            StrategyId::Hybrid => self.hybrid,
            StrategyId::Summary => self.summary,
        }
    }
}

struct Accumulator {
    source_document_id: DocumentId,
    contributions: Vec<(StrategyId, f32)>,
    best_excerpt: String,
    best_raw: f32,
    doc_timestamp: i64,
}

/// Fuse per-strategy result lists into one ranked list of at most `limit`
/// candidates. Final order: summed score desc, then voting-strategy count,
/// then source document recency, then candidate id — fully deterministic.
pub fn fuse(
    outcomes: &[StrategyOutcome],
    weights: &StrategyWeights,
    rrf_k: usize,
    limit: usize,
) -> Vec<RankedCandidate> {
    let mut acc: HashMap<(DocumentId, Uuid), Accumulator> = HashMap::new();

    for outcome in outcomes {
        let results = match &outcome.status {
            StrategyStatus::Completed(results) => results,
            // Timeouts, errors and degraded skips contribute zero.
            _ => continue,
        };
        let weight = weights.get(outcome.strategy);

        for (rank, result) in results.iter().enumerate() {
            let contribution = weight / (rank as f32 + rrf_k as f32 + 1.0);
            let entry = acc
                .entry((result.source_document_id, result.candidate_id))
                .or_insert_with(|| Accumulator {
                    source_document_id: result.source_document_id,
                    contributions: Vec::new(),
                    best_excerpt: result.excerpt.clone(),
                    best_raw: result.raw_score,
                    doc_timestamp: result.doc_timestamp,
                });
            entry.contributions.push((outcome.strategy, contribution));
            if result.raw_score > entry.best_raw {
                entry.best_raw = result.raw_score;
                entry.best_excerpt = result.excerpt.clone();
            }
        }
    }

    let mut fused: Vec<RankedCandidate> = acc
        .into_iter()
        .map(|((_, candidate_id), mut entry)| {
            // Fixed summation order makes the total independent of strategy
            // arrival order.
            entry.contributions.sort_by_key(|(strategy, _)| *strategy);
            let score: f32 = entry.contributions.iter().map(|(_, c)| c).sum();
            let mut voters: Vec<StrategyId> =
                entry.contributions.iter().map(|(s, _)| *s).collect();
            voters.dedup();
            RankedCandidate {
                candidate_id,
                source_document_id: entry.source_document_id,
                score,
                excerpt: entry.best_excerpt,
                voters,
                doc_timestamp: entry.doc_timestamp,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.voters.len().cmp(&a.voters.len()))
            .then_with(|| b.doc_timestamp.cmp(&a.doc_timestamp))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategyResult;

    fn result(strategy: StrategyId, candidate: Uuid, doc: DocumentId, score: f32) -> StrategyResult {
        StrategyResult {
            strategy,
            candidate_id: candidate,
            raw_score: score,
            excerpt: format!("excerpt {}", score),
            source_document_id: doc,
            position: 0,
            doc_timestamp: 0,
        }
    }

    fn completed(strategy: StrategyId, results: Vec<StrategyResult>) -> StrategyOutcome {
        StrategyOutcome {
            strategy,
            status: StrategyStatus::Completed(results),
            elapsed_ms: 1,
        }
    }

    fn default_weights() -> StrategyWeights {
        StrategyWeights {
            metadata: 1.0,
            semantic: 1.0,
            hybrid: 1.0,
            summary: 1.0,
        }
    }

    #[test]
    fn candidate_voted_by_two_strategies_outranks_single_vote() {
        let doc = Uuid::new_v4();
        let shared = Uuid::new_v4();
        let lonely = Uuid::new_v4();

        let outcomes = vec![
            completed(
                StrategyId::Semantic,
                vec![
                    result(StrategyId::Semantic, lonely, doc, 0.9),
                    result(StrategyId::Semantic, shared, doc, 0.8),
                ],
            ),
            completed(
                StrategyId::Hybrid,
                vec![result(StrategyId::Hybrid, shared, doc, 0.7)],
            ),
        ];

        let fused = fuse(&outcomes, &default_weights(), 60, 10);
        assert_eq!(fused[0].candidate_id, shared);
        assert_eq!(fused[0].voters.len(), 2);
    }

    #[test]
    fn fusion_is_commutative_over_strategy_order() {
        let doc = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let semantic = completed(
            StrategyId::Semantic,
            vec![
                result(StrategyId::Semantic, a, doc, 0.9),
                result(StrategyId::Semantic, b, doc, 0.8),
            ],
        );
        let hybrid = completed(
            StrategyId::Hybrid,
            vec![
                result(StrategyId::Hybrid, b, doc, 0.95),
                result(StrategyId::Hybrid, c, doc, 0.5),
            ],
        );
        let summary = completed(
            StrategyId::Summary,
            vec![result(StrategyId::Summary, a, doc, 0.4)],
        );

        let forward = fuse(
            &[semantic.clone(), hybrid.clone(), summary.clone()],
            &default_weights(),
            60,
            10,
        );
        let reversed = fuse(&[summary, hybrid, semantic], &default_weights(), 60, 10);

        let ids = |v: &[RankedCandidate]| v.iter().map(|r| r.candidate_id).collect::<Vec<_>>();
        assert_eq!(ids(&forward), ids(&reversed));
        for (f, r) in forward.iter().zip(reversed.iter()) {
            assert_eq!(f.score, r.score);
        }
    }

    #[test]
    fn timed_out_strategy_does_not_change_relative_order() {
        let doc = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let semantic = completed(
            StrategyId::Semantic,
            vec![
                result(StrategyId::Semantic, a, doc, 0.9),
                result(StrategyId::Semantic, b, doc, 0.5),
            ],
        );
        let timed_out = StrategyOutcome {
            strategy: StrategyId::Hybrid,
            status: StrategyStatus::TimedOut,
            elapsed_ms: 2_000,
        };

        let without = fuse(&[semantic.clone()], &default_weights(), 60, 10);
        let with = fuse(&[semantic, timed_out], &default_weights(), 60, 10);

        assert_eq!(
            without.iter().map(|r| r.candidate_id).collect::<Vec<_>>(),
            with.iter().map(|r| r.candidate_id).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn empty_outcomes_fuse_to_empty() {
        assert!(fuse(&[], &default_weights(), 60, 10).is_empty());
    }

    #[test]
    fn weight_scales_contribution() {
        let doc = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut weights = default_weights();
        weights.metadata = 3.0;

        let outcomes = vec![
            completed(
                StrategyId::Metadata,
                vec![result(StrategyId::Metadata, a, doc, 1.0)],
            ),
            completed(
                StrategyId::Semantic,
                vec![result(StrategyId::Semantic, b, doc, 1.0)],
            ),
        ];
        let fused = fuse(&outcomes, &weights, 60, 10);
        assert_eq!(fused[0].candidate_id, a);
        assert!(fused[0].score > fused[1].score * 2.0);
    }

    #[test]
    fn recency_breaks_score_ties() {
        let doc_old = Uuid::new_v4();
        let doc_new = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut older = result(StrategyId::Semantic, a, doc_old, 0.5);
        older.doc_timestamp = 100;
        let mut newer = result(StrategyId::Semantic, b, doc_new, 0.5);
        newer.doc_timestamp = 200;

        // Same rank-1 score in two separate strategy lists, one voter each.
        let outcomes = vec![
            completed(StrategyId::Semantic, vec![older]),
            completed(StrategyId::Hybrid, vec![newer]),
        ];
        let fused = fuse(&outcomes, &default_weights(), 60, 10);
        assert_eq!(fused[0].candidate_id, b);
    }
}
