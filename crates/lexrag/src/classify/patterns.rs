//! Classification pattern tables.
//!
//! Patterns are data, not code: each query type owns an ordered group of
//! regexes over the *normalized* query text, and an external template
//! registry can extend the built-in groups without touching control flow.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::QueryType;

/// One entry of the external query template registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub pattern: String,
    pub query_type: QueryType,
    pub priority: u8,
}

/// A compiled pattern group for one query type. Groups are evaluated in
/// ascending priority order; the first group with any matching pattern wins.
/// The priority order is the deliberate, documented tie-break — never
/// insertion order.
#[derive(Debug)]
pub struct PatternGroup {
    pub query_type: QueryType,
    pub priority: u8,
    pub patterns: Vec<Regex>,
}

impl PatternGroup {
    pub fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(normalized))
    }
}

/// Built-in pattern groups. All patterns assume normalized input: lowercase,
/// diacritics folded, punctuation stripped.
pub fn default_groups() -> Vec<PatternGroup> {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("built-in pattern is valid"))
            .collect()
    };

    vec![
        PatternGroup {
            query_type: QueryType::Metadata,
            priority: 0,
            patterns: compile(&[
                r"\bcuantos?\b",
                r"\bcuantas\b",
                r"\bhow many\b",
                r"\btotal de\b",
                r"\bnumero (?:total )?de (?:articulos|capitulos|secciones|titulos)\b",
                r"\bcantidad de\b",
            ]),
        },
        PatternGroup {
            query_type: QueryType::Navigation,
            priority: 1,
            patterns: compile(&[
                r"\barticulo\s+\d+",
                r"\bart\s+\d+",
                r"\barticle\s+\d+",
                r"\btransitorio\s+\d+",
                r"\bcapitulo\s+[\divxlc]+\b",
                r"^(?:ver|ir a|muestrame|show me|go to)\b",
            ]),
        },
        PatternGroup {
            query_type: QueryType::Content,
            priority: 2,
            patterns: compile(&[
                r"\bque (?:dice|establece|dispone|senala|regula)\b",
                r"\bwhat (?:does|do|is)\b",
                r"\bsobre\b",
                r"\bacerca de\b",
                r"\ben que (?:casos|situaciones)\b",
                r"\bcuando\b",
                r"\bdonde\b",
            ]),
        },
        PatternGroup {
            query_type: QueryType::Comparison,
            priority: 3,
            patterns: compile(&[
                r"\bdiferencias?\b",
                r"\bcomparar?\b",
                r"\bcompare\b",
                r"\bversus\b",
                r"\bvs\b",
                r"\bentre .+ y .+\b",
            ]),
        },
        PatternGroup {
            query_type: QueryType::Summary,
            priority: 4,
            patterns: compile(&[
                r"\bresumen\b",
                r"\bresume[n]?\b",
                r"\bresumir\b",
                r"\bsummar(?:y|ize|ise)\b",
                r"\bsintesis\b",
                r"\bde que trata\b",
                r"\bpuntos (?:clave|principales)\b",
            ]),
        },
    ]
}

/// Merge external templates into the built-in groups. Templates with the
/// priority of an existing group extend that group; new priorities create
/// new groups for their type. Groups stay sorted by priority.
pub fn merge_templates(
    mut groups: Vec<PatternGroup>,
    templates: &[QueryTemplate],
) -> Result<Vec<PatternGroup>, EngineError> {
    for template in templates {
        let re = Regex::new(&template.pattern).map_err(|source| EngineError::InvalidPattern {
            pattern: template.pattern.clone(),
            source,
        })?;

        match groups
            .iter_mut()
            .find(|g| g.query_type == template.query_type && g.priority == template.priority)
        {
            Some(group) => group.patterns.push(re),
            None => groups.push(PatternGroup {
                query_type: template.query_type,
                priority: template.priority,
                patterns: vec![re],
            }),
        }
    }
    groups.sort_by_key(|g| g.priority);
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_groups_are_priority_ordered() {
        let groups = default_groups();
        let priorities: Vec<u8> = groups.iter().map(|g| g.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn metadata_group_matches_count_questions() {
        let groups = default_groups();
        let metadata = &groups[0];
        assert_eq!(metadata.query_type, QueryType::Metadata);
        assert!(metadata.matches("cuantos articulos tiene la constitucion"));
        assert!(metadata.matches("how many chapters are there"));
        assert!(!metadata.matches("articulo 100"));
    }

    #[test]
    fn templates_extend_existing_group() {
        let groups = default_groups();
        let before: usize = groups[0].patterns.len();
        let merged = merge_templates(
            groups,
            &[QueryTemplate {
                pattern: r"\bconteo de\b".into(),
                query_type: QueryType::Metadata,
                priority: 0,
            }],
        )
        .unwrap();
        assert_eq!(merged[0].patterns.len(), before + 1);
        assert!(merged[0].matches("conteo de articulos"));
    }

    #[test]
    fn bad_template_pattern_is_rejected() {
        let err = merge_templates(
            default_groups(),
            &[QueryTemplate {
                pattern: "([unclosed".into(),
                query_type: QueryType::Content,
                priority: 2,
            }],
        );
        assert!(matches!(err, Err(EngineError::InvalidPattern { .. })));
    }
}
