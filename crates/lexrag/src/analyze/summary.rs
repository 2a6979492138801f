//! Bottom-up summary generation.
//!
//! Article summaries feed section summaries, sections feed chapters, and the
//! chapter layer feeds one document-level executive summary. Each generation
//! is a gateway call; a failed call degrades to an extractive excerpt so an
//! analysis never aborts on a flaky provider.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::gateway::GatewayClient;
use crate::types::{Document, NodeId, NodeType, StructureNode, Summary, SummaryLevel};

const EXCERPT_CHARS: usize = 240;

pub struct SummaryBuilder<'a> {
    gateway: &'a GatewayClient,
    config: &'a AnalysisConfig,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new(gateway: &'a GatewayClient, config: &'a AnalysisConfig) -> Self {
        Self { gateway, config }
    }

    pub async fn build(
        &self,
        document: &Document,
        nodes: &[StructureNode],
        version: u64,
    ) -> Vec<Summary> {
        let mut summaries: Vec<Summary> = Vec::new();
        // node id → summary text, for the aggregation layers.
        let mut by_node: HashMap<NodeId, String> = HashMap::new();

        for node in nodes.iter().filter(|n| n.node_type == NodeType::Article) {
            let text = self
                .generate_or_excerpt(
                    &format!(
                        "Resume en una o dos frases el artículo {} de {}.",
                        node.number, document.title
                    ),
                    &node.content,
                )
                .await;
            by_node.insert(node.id, text.clone());
            summaries.push(self.summary_row(document, SummaryLevel::Article, Some(node.id), text, version));
        }

        // Aggregate upward: each structural node summarizes its direct
        // children's summaries.
        for (node_type, level) in [
            (NodeType::Section, SummaryLevel::Section),
            (NodeType::Chapter, SummaryLevel::Chapter),
        ] {
            for node in nodes.iter().filter(|n| n.node_type == node_type) {
                let child_digest = join_child_summaries(nodes, &by_node, node.id);
                if child_digest.is_empty() {
                    continue;
                }
                let text = self
                    .generate_or_excerpt(
                        &format!(
                            "Resume brevemente el contenido de {} {} de {}.",
                            heading_word(node_type),
                            node.number,
                            document.title
                        ),
                        &child_digest,
                    )
                    .await;
                by_node.insert(node.id, text.clone());
                summaries.push(self.summary_row(document, level, Some(node.id), text, version));
            }
        }

        // Document-level executive summary from the highest populated layer.
        let top_digest = top_level_digest(nodes, &by_node);
        if !top_digest.is_empty() {
            let text = self
                .generate_or_excerpt(
                    &format!("Redacta un resumen ejecutivo de {}.", document.title),
                    &top_digest,
                )
                .await;
            summaries.push(self.summary_row(document, SummaryLevel::Document, None, text, version));
        }

        summaries
    }

    async fn generate_or_excerpt(&self, prompt: &str, context: &str) -> String {
        match self.gateway.generate(prompt, context).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => excerpt(context),
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed, using extractive excerpt");
                excerpt(context)
            }
        }
    }

    fn summary_row(
        &self,
        document: &Document,
        level: SummaryLevel,
        reference_id: Option<NodeId>,
        text: String,
        version: u64,
    ) -> Summary {
        let key_points = extract_key_points(&text, self.config.summary_key_points);
        Summary {
            id: Uuid::new_v4(),
            document_id: document.id,
            level,
            reference_id,
            text,
            key_points,
            version,
        }
    }
}

fn join_child_summaries(
    nodes: &[StructureNode],
    by_node: &HashMap<NodeId, String>,
    parent: NodeId,
) -> String {
    nodes
        .iter()
        .filter(|n| n.parent_id == Some(parent))
        .filter_map(|n| by_node.get(&n.id).map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Digest for the document level: summaries of nodes with no parent, falling
/// back to all article summaries for flat documents.
fn top_level_digest(nodes: &[StructureNode], by_node: &HashMap<NodeId, String>) -> String {
    let roots: Vec<&str> = nodes
        .iter()
        .filter(|n| n.parent_id.is_none())
        .filter_map(|n| by_node.get(&n.id).map(String::as_str))
        .collect();
    if !roots.is_empty() {
        return roots.join("\n");
    }
    nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Article)
        .filter_map(|n| by_node.get(&n.id).map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

fn heading_word(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Chapter => "el capítulo",
        NodeType::Section => "la sección",
        NodeType::Title => "el título",
        _ => "la parte",
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

fn extract_key_points(text: &str, max: usize) -> Vec<String> {
    text.split(['.', ';', '\n'])
        .map(str::trim)
        .filter(|s| s.split_whitespace().count() >= 3)
        .take(max)
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_caps_length() {
        let long = "palabra ".repeat(100);
        let e = excerpt(&long);
        assert!(e.chars().count() <= EXCERPT_CHARS + 1);
        assert!(e.ends_with('…'));
    }

    #[test]
    fn key_points_skip_trivial_fragments() {
        let points = extract_key_points(
            "La educación será obligatoria. Sí. El Estado la garantiza en todo el territorio.",
            3,
        );
        assert_eq!(points.len(), 2);
        assert!(points[0].contains("obligatoria"));
    }
}
