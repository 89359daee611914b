//! Load a graph seed document (JSON or YAML) into the SQLite store.

use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::db::Db;
use crate::error::{Result, TxgraphError};
use crate::graph::{Node, NodeLabel, RelationType};

/// An edge as written in a seed file. Labels may be omitted when the name is
/// unambiguous among the known nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEdge {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<NodeLabel>,
    pub relation: RelationType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<NodeLabel>,
    #[serde(default)]
    pub weight: i64,
}

/// Contents of a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSeed {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<SeedEdge>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Parse a seed file, choosing the format from its extension.
pub fn parse_seed(path: &Path) -> Result<GraphSeed> {
    let text = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => serde_json::from_str(&text)
            .map_err(|e| TxgraphError::Parse(format!("{}: {}", path.display(), e))),
        Some("yaml") | Some("yml") => serde_yaml_ng::from_str(&text)
            .map_err(|e| TxgraphError::Parse(format!("{}: {}", path.display(), e))),
        other => Err(TxgraphError::InvalidInput(format!(
            "Unsupported seed format {:?} for {} (expected .json, .yaml or .yml)",
            other,
            path.display()
        ))),
    }
}

impl GraphSeed {
    /// Check node-level invariants that the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(TxgraphError::InvalidInput("Node with blank name".to_string()));
            }
            match (node.label, node.treatment_type) {
                (NodeLabel::Treatment, None) => {
                    return Err(TxgraphError::InvalidInput(format!(
                        "Treatment '{}' has no type",
                        node.name
                    )))
                }
                (label, Some(_)) if label != NodeLabel::Treatment => {
                    return Err(TxgraphError::InvalidInput(format!(
                        "Only treatments carry a type, but {} '{}' has one",
                        label, node.name
                    )))
                }
                _ => {}
            }
        }
        for edge in &self.edges {
            if edge.weight < 0 {
                return Err(TxgraphError::InvalidInput(format!(
                    "Edge {} -> {} has negative weight",
                    edge.source, edge.target
                )));
            }
        }
        Ok(())
    }
}

/// Resolve an edge endpoint label from the seed, falling back to the database.
fn resolve_label(
    tx: &Transaction<'_>,
    seed_labels: &HashMap<&str, Vec<NodeLabel>>,
    name: &str,
    explicit: Option<NodeLabel>,
) -> Result<NodeLabel> {
    if let Some(label) = explicit {
        return Ok(label);
    }

    let mut candidates: Vec<NodeLabel> = seed_labels.get(name).cloned().unwrap_or_default();
    if candidates.is_empty() {
        let mut stmt = tx.prepare("SELECT label FROM nodes WHERE name = ?1")?;
        for label in stmt.query_map(params![name], |row| row.get::<_, String>(0))? {
            candidates.push(label?.parse()?);
        }
    }
    candidates.sort();
    candidates.dedup();

    match candidates.as_slice() {
        [label] => Ok(*label),
        [] => Err(TxgraphError::InvalidInput(format!(
            "Edge endpoint '{}' is not a known node",
            name
        ))),
        _ => Err(TxgraphError::InvalidInput(format!(
            "Edge endpoint '{}' exists under several labels; set the label explicitly",
            name
        ))),
    }
}

/// Upsert every node and edge of `seed` in one transaction.
///
/// With `replace`, existing graph content is removed first.
pub async fn import_seed(db: &Db, seed: GraphSeed, replace: bool) -> Result<ImportStats> {
    seed.validate()?;

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        if replace {
            tx.execute("DELETE FROM edges", [])?;
            tx.execute("DELETE FROM nodes", [])?;
        }

        for node in &seed.nodes {
            tx.execute(
                "INSERT INTO nodes (name, label, treatment_type) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(name, label) DO UPDATE SET treatment_type = excluded.treatment_type",
                params![
                    node.name,
                    node.label.as_str(),
                    node.treatment_type.map(|t| t.as_str())
                ],
            )?;
        }

        let mut seed_labels: HashMap<&str, Vec<NodeLabel>> = HashMap::new();
        for node in &seed.nodes {
            seed_labels.entry(node.name.as_str()).or_default().push(node.label);
        }

        for edge in &seed.edges {
            let source_label = resolve_label(&tx, &seed_labels, &edge.source, edge.source_label)?;
            let target_label = resolve_label(&tx, &seed_labels, &edge.target, edge.target_label)?;
            tx.execute(
                "INSERT INTO edges (source_name, source_label, relation_type, target_name, target_label, weight) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(source_name, source_label, relation_type, target_name, target_label) \
                 DO UPDATE SET weight = excluded.weight",
                params![
                    edge.source,
                    source_label.as_str(),
                    edge.relation.as_str(),
                    edge.target,
                    target_label.as_str(),
                    edge.weight
                ],
            )
            .map_err(|e| {
                TxgraphError::InvalidInput(format!(
                    "Edge {} -[{}]-> {} rejected: {}",
                    edge.source, edge.relation, edge.target, e
                ))
            })?;
        }

        tx.commit()?;
        log::info!(
            "Imported {} nodes and {} edges{}",
            seed.nodes.len(),
            seed.edges.len(),
            if replace { " (replaced existing graph)" } else { "" }
        );

        Ok(ImportStats {
            nodes: seed.nodes.len(),
            edges: seed.edges.len(),
        })
    })
    .await
}
