//! Hierarchy extraction over raw legal text.
//!
//! One pattern family per node type, matched with byte offsets. Containment
//! is decided by offset and level — a node's parent is the nearest preceding
//! higher-level node — never by declared numbering, since legal numbering is
//! not always monotonic (transitorios restart at 1).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::types::{Document, NodeType, StructureNode, TocEntry};

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*t[ií]tulo[ \t]+([a-záéíóú0-9]+)[^\n]*").expect("title pattern is valid")
});
static CHAPTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*cap[ií]tulo[ \t]+([a-záéíóú0-9]+)[^\n]*")
        .expect("chapter pattern is valid")
});
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*secci[oó]n[ \t]+([a-záéíóú0-9]+)[^\n]*")
        .expect("section pattern is valid")
});
static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*art(?:[ií]culo|\.)[ \t]*(\d+[ \t]*(?:bis|ter)?|[uú]nico)\b[^\n]*")
        .expect("article pattern is valid")
});
static TRANSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*transitorio[ \t]+(\d+|[a-záéíóú]+)\b[^\n]*")
        .expect("transitory pattern is valid")
});

pub struct ExtractedStructure {
    pub nodes: Vec<StructureNode>,
    pub toc: Vec<TocEntry>,
    pub total_articles: usize,
    pub total_sections: usize,
    pub total_chapters: usize,
}

struct RawMatch {
    node_type: NodeType,
    number: String,
    heading: String,
    offset: usize,
}

/// Extract the hierarchy of one document at the given analysis version.
/// A pattern family matching zero nodes is not an error — some documents
/// simply lack chapters.
pub fn extract(document: &Document, version: u64) -> ExtractedStructure {
    let text = document.text.as_str();
    let mut matches: Vec<RawMatch> = Vec::new();

    let families: [(&Regex, NodeType, bool); 5] = [
        (&TITLE_RE, NodeType::Title, false),
        (&CHAPTER_RE, NodeType::Chapter, false),
        (&SECTION_RE, NodeType::Section, false),
        (&ARTICLE_RE, NodeType::Article, false),
        (&TRANSITORY_RE, NodeType::Article, true),
    ];

    for (re, node_type, transitory) in families {
        for caps in re.captures_iter(text) {
            let whole = caps.get(0).expect("group 0 always present");
            let raw_number = normalize_number(&caps[1]);
            let number = if transitory {
                format!("transitorio {}", raw_number)
            } else {
                raw_number
            };
            matches.push(RawMatch {
                node_type,
                number,
                heading: whole.as_str().trim().to_string(),
                offset: whole.start(),
            });
        }
    }

    matches.sort_by_key(|m| m.offset);

    let mut nodes: Vec<StructureNode> = Vec::with_capacity(matches.len());
    let mut seen_articles: HashSet<String> = HashSet::new();
    // Last open node per level; parent = nearest preceding node with a
    // strictly smaller level.
    let mut open: Vec<(u8, Uuid)> = Vec::new();

    for (i, m) in matches.iter().enumerate() {
        let level = m.node_type.level();

        if m.node_type == NodeType::Article && !seen_articles.insert(m.number.clone()) {
            tracing::warn!(
                document_id = %document.id,
                number = %m.number,
                "duplicate article number, keeping first occurrence"
            );
            continue;
        }

        while open.last().is_some_and(|(l, _)| *l >= level) {
            open.pop();
        }
        let parent_id = open.last().map(|(_, id)| *id);

        let content = if m.node_type == NodeType::Article {
            let end = matches
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(text.len());
            text[m.offset..end].trim().to_string()
        } else {
            String::new()
        };

        let node = StructureNode {
            id: Uuid::new_v4(),
            document_id: document.id,
            node_type: m.node_type,
            number: m.number.clone(),
            title: heading_title(&m.heading),
            content,
            level,
            display_order: nodes.len() as u32,
            parent_id,
            offset: m.offset,
            version,
        };
        open.push((level, node.id));
        nodes.push(node);
    }

    let toc: Vec<TocEntry> = nodes
        .iter()
        .map(|n| TocEntry {
            node_type: n.node_type,
            number: n.number.clone(),
            title: n.title.clone(),
            level: n.level,
            display_order: n.display_order,
        })
        .collect();

    let count = |t: NodeType| nodes.iter().filter(|n| n.node_type == t).count();

    ExtractedStructure {
        total_articles: count(NodeType::Article),
        total_sections: count(NodeType::Section),
        total_chapters: count(NodeType::Chapter),
        nodes,
        toc,
    }
}

/// Sliding-window split for article bodies longer than the chunk budget.
/// The window size is measured in chars; each returned pair is `(relative
/// byte offset, text)` so callers can add it to a node's byte offset
/// directly. Boundaries respect UTF-8.
pub fn split_subchunks(text: &str, max_chars: usize, overlap: usize) -> Vec<(usize, String)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.len() <= max_chars {
        return vec![(0, text.to_string())];
    }

    let step = max_chars.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let byte_start = chars[start].0;
        let byte_end = if end == chars.len() {
            text.len()
        } else {
            chars[end].0
        };
        out.push((byte_start, text[byte_start..byte_end].to_string()));
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

fn normalize_number(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable remainder of a heading line, after the node marker.
fn heading_title(heading: &str) -> String {
    heading
        .split_once(['.', ':', '-', '—', '–'])
        .map(|(_, rest)| rest.trim().to_string())
        .filter(|rest| !rest.is_empty())
        .unwrap_or_else(|| heading.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    const SAMPLE: &str = "\
TÍTULO PRIMERO. De los Derechos
CAPÍTULO I. Garantías
Artículo 1. Todas las personas gozarán de los derechos humanos.
Artículo 2. La nación tiene una composición pluricultural.
SECCIÓN Primera. Del Trabajo
Artículo 3. La educación será obligatoria.
CAPÍTULO II. De los Ciudadanos
Artículo 4 bis. Disposición adicional.
TRANSITORIO 1. Esta ley entrará en vigor al día siguiente.
";

    fn doc() -> Document {
        Document::new("Constitución", SAMPLE, "mx")
    }

    #[test]
    fn counts_and_node_types() {
        let s = extract(&doc(), 1);
        assert_eq!(s.total_articles, 5);
        assert_eq!(s.total_chapters, 2);
        assert_eq!(s.total_sections, 1);
    }

    #[test]
    fn parent_is_nearest_preceding_higher_level() {
        let s = extract(&doc(), 1);
        let by_number = |n: &str| {
            s.nodes
                .iter()
                .find(|node| node.number == n)
                .unwrap()
                .clone()
        };
        let chapter_one = s
            .nodes
            .iter()
            .find(|n| n.node_type == NodeType::Chapter && n.number == "i")
            .unwrap();
        let section = s
            .nodes
            .iter()
            .find(|n| n.node_type == NodeType::Section)
            .unwrap();

        assert_eq!(by_number("1").parent_id, Some(chapter_one.id));
        // Article 3 follows the section heading, so the section is its parent.
        assert_eq!(by_number("3").parent_id, Some(section.id));
        // The section hangs off chapter I, not the title directly.
        assert_eq!(section.parent_id, Some(chapter_one.id));
    }

    #[test]
    fn article_content_runs_until_next_heading() {
        let s = extract(&doc(), 1);
        let article_one = s.nodes.iter().find(|n| n.number == "1").unwrap();
        assert!(article_one.content.contains("derechos humanos"));
        assert!(!article_one.content.contains("pluricultural"));
    }

    #[test]
    fn transitory_articles_keep_their_own_number_space() {
        let s = extract(&doc(), 1);
        assert!(s.nodes.iter().any(|n| n.number == "transitorio 1"));
        // "transitorio 1" does not collide with article "1".
        assert!(s.nodes.iter().any(|n| n.number == "1"));
    }

    #[test]
    fn bis_suffix_is_part_of_the_number() {
        let s = extract(&doc(), 1);
        assert!(s.nodes.iter().any(|n| n.number == "4 bis"));
    }

    #[test]
    fn duplicate_article_numbers_keep_first() {
        let text = "Artículo 1. Primero.\nArtículo 1. Duplicado.\n";
        let s = extract(&Document::new("Ley", text, "mx"), 1);
        assert_eq!(s.total_articles, 1);
        assert!(s.nodes[0].content.contains("Primero"));
    }

    #[test]
    fn toc_follows_document_order() {
        let s = extract(&doc(), 1);
        let orders: Vec<u32> = s.toc.iter().map(|e| e.display_order).collect();
        let mut sorted = orders.clone();
        sorted.sort();
        assert_eq!(orders, sorted);
        assert_eq!(s.toc.len(), s.nodes.len());
    }

    #[test]
    fn no_headings_extracts_nothing() {
        let s = extract(&Document::new("Nota", "texto plano sin estructura", "mx"), 1);
        assert!(s.nodes.is_empty());
        assert_eq!(s.total_articles, 0);
    }

    #[test]
    fn subchunks_overlap_and_cover_text() {
        let text = "abcdefghij".repeat(30);
        let chunks = split_subchunks(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].0, 0);
        // Consecutive chunks share the overlap region.
        assert_eq!(chunks[1].0, 80);
        let last = chunks.last().unwrap();
        assert_eq!(last.0 + last.1.len(), text.len());
    }

    #[test]
    fn subchunk_offsets_are_byte_offsets() {
        // Two bytes per char: the second window starts at char 80, byte 160.
        let text = "é".repeat(150);
        let chunks = split_subchunks(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[1].0, 160);
        let last = chunks.last().unwrap();
        assert_eq!(last.0 + last.1.len(), text.len());
    }

    #[test]
    fn short_text_is_a_single_subchunk() {
        let chunks = split_subchunks("corto", 100, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, "corto");
    }
}
