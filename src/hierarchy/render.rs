use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::hierarchy::{HierarchyChild, HierarchyEntry};

/// Rendered hierarchy node.
///
/// Serializes as a bare string, or as `{ "name": [children...] }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationNode {
    Leaf(String),
    Group {
        name: String,
        children: Vec<PresentationNode>,
    },
}

impl PresentationNode {
    pub fn name(&self) -> &str {
        match self {
            PresentationNode::Leaf(name) => name,
            PresentationNode::Group { name, .. } => name,
        }
    }
}

impl Serialize for PresentationNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PresentationNode::Leaf(name) => serializer.serialize_str(name),
            PresentationNode::Group { name, children } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(name, children)?;
                map.end()
            }
        }
    }
}

fn render_entry(entry: &HierarchyEntry) -> PresentationNode {
    if entry.children.is_empty() {
        return PresentationNode::Leaf(entry.name.clone());
    }
    PresentationNode::Group {
        name: entry.name.clone(),
        children: entry
            .children
            .iter()
            .map(|child| match child {
                HierarchyChild::Leaf(name) => PresentationNode::Leaf(name.clone()),
                HierarchyChild::Entry(nested) => render_entry(nested),
            })
            .collect(),
    }
}

/// Entries with children become groups; everything else a bare name.
pub fn render(entries: &[HierarchyEntry]) -> Vec<PresentationNode> {
    entries.iter().map(render_entry).collect()
}
