//! Query classification.
//!
//! Maps raw query text to a query type, confidence, extracted entities and
//! the set of strategies able to answer it. Pure and synchronous: the only
//! lookup tables are the local pattern groups.

mod patterns;

pub use patterns::{PatternGroup, QueryTemplate};

use std::sync::LazyLock;

use regex::Regex;

use crate::error::EngineError;
use crate::strategies::StrategyId;
use crate::types::{Entities, QueryClassification, QueryType};

static ARTICLE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:articulo|article|art|transitorio)\s*(\d+(?:\s+(?:bis|ter))?)\b")
        .expect("article reference regex is valid")
});
static LAW_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(constitucion(?:\s+politica)?|codigo(?:\s+\w+){0,2}|ley(?:\s+\w+){0,2}|reglamento(?:\s+\w+){0,2})\b")
        .expect("law name regex is valid")
});
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("year regex is valid"));

/// Stop words excluded from keyword extraction (Spanish + English).
const STOP_WORDS: &[&str] = &[
    "a", "al", "ante", "como", "con", "cual", "cuales", "de", "del", "donde", "el", "ella", "en",
    "entre", "es", "esta", "este", "esto", "hay", "la", "las", "lo", "los", "mas", "me", "mi",
    "nos", "o", "para", "pero", "por", "que", "se", "segun", "ser", "si", "sin", "sobre", "son",
    "su", "sus", "tiene", "tienen", "un", "una", "uno", "y", "yo", "and", "are", "at", "by",
    "does", "for", "from", "has", "have", "how", "in", "is", "it", "many", "of", "on", "or",
    "the", "there", "to", "what", "when", "where", "which", "who", "with",
];

/// Keyword cap: bounds downstream strategy fan-out.
const MAX_KEYWORDS: usize = 10;

const PATTERN_MATCH_CONFIDENCE: f32 = 0.9;
const UNKNOWN_CONFIDENCE: f32 = 0.5;

/// Normalize query text for both classification and cache keys. The two must
/// agree exactly so cache hits and classification are consistent across runs.
///
/// Rules: lowercase, fold Spanish diacritics (ñ preserved), strip everything
/// that is not alphanumeric/space, collapse whitespace, trim.
pub fn normalize_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        let folded = match ch {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            other => other,
        };
        if folded.is_alphanumeric() || folded == 'ñ' {
            out.push(folded);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Fixed lookup table: query type → strategies able to answer it. Unknown
/// routes to all strategies rather than none.
pub fn strategies_for(query_type: QueryType) -> Vec<StrategyId> {
    match query_type {
        QueryType::Metadata => vec![StrategyId::Metadata, StrategyId::Summary],
        QueryType::Navigation => vec![StrategyId::Metadata, StrategyId::Hybrid],
        QueryType::Content => vec![StrategyId::Semantic, StrategyId::Hybrid],
        QueryType::Comparison => vec![StrategyId::Semantic, StrategyId::Summary],
        QueryType::Summary => vec![StrategyId::Summary, StrategyId::Metadata],
        QueryType::Unknown => StrategyId::ALL.to_vec(),
    }
}

pub struct QueryClassifier {
    groups: Vec<PatternGroup>,
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self {
            groups: patterns::default_groups(),
        }
    }

    /// Build a classifier whose built-in groups are extended from the
    /// external template registry.
    pub fn with_templates(templates: &[QueryTemplate]) -> Result<Self, EngineError> {
        Ok(Self {
            groups: patterns::merge_templates(patterns::default_groups(), templates)?,
        })
    }

    /// Classify a query. `_scope_id` is part of the contract but does not
    /// influence the decision — classification is scope-independent.
    pub fn classify(&self, query_text: &str, _scope_id: &str) -> QueryClassification {
        let normalized = normalize_query(query_text);

        if normalized.is_empty() {
            return QueryClassification {
                query_type: QueryType::Unknown,
                confidence: UNKNOWN_CONFIDENCE,
                entities: Entities::default(),
                required_strategies: StrategyId::ALL.to_vec(),
                normalized_query: normalized,
                needs_clarification: true,
            };
        }

        // First matching group in priority order wins; later matches are
        // ignored by design so the tie-break stays reproducible.
        let (query_type, confidence) = self
            .groups
            .iter()
            .find(|g| g.matches(&normalized))
            .map(|g| (g.query_type, PATTERN_MATCH_CONFIDENCE))
            .unwrap_or((QueryType::Unknown, UNKNOWN_CONFIDENCE));

        let entities = extract_entities(&normalized);
        let required_strategies = strategies_for(query_type);

        tracing::debug!(
            query = query_text,
            normalized = %normalized,
            query_type = ?query_type,
            confidence = confidence,
            article_refs = ?entities.article_refs,
            "query classified"
        );

        QueryClassification {
            query_type,
            confidence,
            entities,
            required_strategies,
            normalized_query: normalized,
            needs_clarification: false,
        }
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity extraction runs independently of the type decision.
fn extract_entities(normalized: &str) -> Entities {
    let article_refs: Vec<String> = ARTICLE_REF_RE
        .captures_iter(normalized)
        .map(|c| c[1].to_string())
        .collect();

    let law_names: Vec<String> = LAW_NAME_RE
        .captures_iter(normalized)
        .map(|c| c[1].to_string())
        .collect();

    let years: Vec<i32> = YEAR_RE
        .captures_iter(normalized)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let date_range = match years.as_slice() {
        [] => None,
        [y] => Some((*y, *y)),
        many => {
            let min = *many.iter().min().expect("non-empty");
            let max = *many.iter().max().expect("non-empty");
            Some((min, max))
        }
    };

    let mut keywords: Vec<String> = Vec::new();
    for token in normalized.split_whitespace() {
        if keywords.len() >= MAX_KEYWORDS {
            break;
        }
        if token.len() < 3 || STOP_WORDS.contains(&token) {
            continue;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }

    Entities {
        article_refs,
        law_names,
        keywords,
        date_range,
    }
}
