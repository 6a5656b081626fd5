//! Documentation catalogue: the hierarchical outline returned by the
//! catalogue-structuring capability.
//!
//! The expected wire shape is
//!
//! ```json
//! { "items": [ { "title": "overview", "name": "Overview", "prompt": "...",
//!                "children": [ ... ] } ] }
//! ```
//!
//! optionally wrapped in `<documentation_structure>` tags or a fenced code
//! block, as language models tend to do.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One section of the documentation outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueNode {
    /// Stable identifier of the section (used to build document paths).
    pub title: String,
    /// Human-readable section name.
    pub name: String,
    /// Generation prompt for this section.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub children: Vec<CatalogueNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    pub items: Vec<CatalogueNode>,
}

/// A node together with its position in the outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry<'a> {
    /// Slash-joined titles from the root to this node.
    pub path: String,
    pub depth: usize,
    pub node: &'a CatalogueNode,
}

impl Catalogue {
    /// Parse raw generator output into a catalogue.
    ///
    /// Accepts bare JSON, JSON inside `<documentation_structure>` tags, or a
    /// fenced ```` ```json ```` block. An outline without sections is an error.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let body = extract_json(raw).ok_or_else(|| {
            PipelineError::generation(None, "catalogue output contains no JSON object")
        })?;

        let catalogue: Catalogue = serde_json::from_str(body).map_err(|e| {
            PipelineError::generation(None, format!("catalogue output is not valid: {}", e))
        })?;

        if catalogue.items.is_empty() {
            return Err(PipelineError::generation(
                None,
                "catalogue contains no sections",
            ));
        }
        Ok(catalogue)
    }

    /// Depth-first, pre-order walk of the outline.
    pub fn entries(&self) -> Vec<CatalogueEntry<'_>> {
        let mut out = Vec::new();
        for node in &self.items {
            walk(node, "", 0, &mut out);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Indented plain-text rendering, handed to the synthesizer as context.
    pub fn outline(&self) -> String {
        self.entries()
            .iter()
            .map(|e| format!("{}- {} ({})", "  ".repeat(e.depth), e.node.name, e.path))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn walk<'a>(node: &'a CatalogueNode, prefix: &str, depth: usize, out: &mut Vec<CatalogueEntry<'a>>) {
    let path = if prefix.is_empty() {
        node.title.clone()
    } else {
        format!("{}/{}", prefix, node.title)
    };
    out.push(CatalogueEntry {
        path: path.clone(),
        depth,
        node,
    });
    for child in &node.children {
        walk(child, &path, depth + 1, out);
    }
}

fn extract_json(raw: &str) -> Option<&str> {
    let scoped = match (
        raw.find("<documentation_structure>"),
        raw.find("</documentation_structure>"),
    ) {
        (Some(start), Some(end)) if end > start => {
            &raw[start + "<documentation_structure>".len()..end]
        }
        _ => raw,
    };

    let start = scoped.find('{')?;
    let end = scoped.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&scoped[start..=end])
}
