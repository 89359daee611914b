//! Knowledge graph module: node/edge model, the `GraphStore` seam and its
//! SQLite implementation.
//!
//! Edges point child -> parent. Traversal therefore walks edges backwards
//! from a start node and reports, per parent, the children it found together
//! with classification flags the exploration loop uses to decide what to do
//! with each child.

mod import;
mod store;

pub use import::{import_seed, parse_seed, GraphSeed, ImportStats, SeedEdge};
pub use store::SqliteGraphStore;

#[cfg(test)]
pub(crate) use store::fixtures;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, TxgraphError};

/// Node label. Names are unique within a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeLabel {
    Consideration,
    Treatment,
    Category,
    Guideline,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Consideration => "CONSIDERATION",
            NodeLabel::Treatment => "TREATMENT",
            NodeLabel::Category => "CATEGORY",
            NodeLabel::Guideline => "GUIDELINE",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = TxgraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONSIDERATION" => Ok(NodeLabel::Consideration),
            "TREATMENT" => Ok(NodeLabel::Treatment),
            "CATEGORY" => Ok(NodeLabel::Category),
            "GUIDELINE" => Ok(NodeLabel::Guideline),
            _ => Err(TxgraphError::Parse(format!("Unknown node label: {}", s))),
        }
    }
}

/// Treatment partition used for grouping and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreatmentType {
    Surgical,
    Medical,
    Conservative,
}

impl TreatmentType {
    pub const ALL: [TreatmentType; 3] = [
        TreatmentType::Surgical,
        TreatmentType::Medical,
        TreatmentType::Conservative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentType::Surgical => "SURGICAL",
            TreatmentType::Medical => "MEDICAL",
            TreatmentType::Conservative => "CONSERVATIVE",
        }
    }
}

impl fmt::Display for TreatmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreatmentType {
    type Err = TxgraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SURGICAL" => Ok(TreatmentType::Surgical),
            "MEDICAL" => Ok(TreatmentType::Medical),
            "CONSERVATIVE" => Ok(TreatmentType::Conservative),
            _ => Err(TxgraphError::Parse(format!("Unknown treatment type: {}", s))),
        }
    }
}

/// Typed, directed relation (child -> parent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    /// child treatment -> parent treatment or category
    IsTypeOf,
    /// treatment -> consideration
    RecommendedFor,
    /// sub-consideration -> parent consideration
    ParentConsideration,
    /// guideline excerpt -> the entity it is about
    PrimaryEntity,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::IsTypeOf => "IS_TYPE_OF",
            RelationType::RecommendedFor => "RECOMMENDED_FOR",
            RelationType::ParentConsideration => "PARENT_CONSIDERATION",
            RelationType::PrimaryEntity => "PRIMARY_ENTITY",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = TxgraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IS_TYPE_OF" => Ok(RelationType::IsTypeOf),
            "RECOMMENDED_FOR" => Ok(RelationType::RecommendedFor),
            "PARENT_CONSIDERATION" => Ok(RelationType::ParentConsideration),
            "PRIMARY_ENTITY" => Ok(RelationType::PrimaryEntity),
            _ => Err(TxgraphError::Parse(format!("Unknown relation type: {}", s))),
        }
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub label: NodeLabel,
    /// Only treatments carry a type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub treatment_type: Option<TreatmentType>,
}

/// One child discovered by a traversal, with its classification flags.
///
/// A node can be both an exploration path (`has_children`) and a
/// recommendation-bearing leaf (`has_recommendations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub node: String,
    pub has_children: bool,
    pub has_recommendations: bool,
    pub has_excerpts: bool,
}

/// Parent name -> children found under it, both sorted by name.
pub type TraversalMap = BTreeMap<String, Vec<FrontierEntry>>;

/// Parameters of a `GraphStore::traverse` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraverseRequest {
    pub start: String,
    pub label: NodeLabel,
    /// `None` follows every relation type.
    pub relation: Option<RelationType>,
    pub depth: usize,
}

impl TraverseRequest {
    pub fn new(start: impl Into<String>, label: NodeLabel) -> Self {
        Self {
            start: start.into(),
            label,
            relation: None,
            depth: 1,
        }
    }

    pub fn relation(mut self, relation: RelationType) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

/// Direct `IS_TYPE_OF` neighbourhood of one treatment inside a name set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    /// Children that are themselves in the name set.
    pub children: Vec<String>,
    /// Parent, reported only when it lies outside the name set.
    pub parent: Option<String>,
}

/// Read-only query surface of the knowledge graph.
///
/// Implementations must be safe to call concurrently from many sessions and
/// must treat every name as an untrusted query parameter.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Walk up to `depth` hops of incoming edges from the start node.
    ///
    /// Fails with `NodeNotFound` when the start node does not exist under its
    /// label and with `GraphUnavailable` when the store cannot be queried.
    async fn traverse(&self, request: &TraverseRequest) -> Result<TraversalMap>;

    /// For every treatment of `treatment_type` among `names`, report its
    /// in-set children and its out-of-set parent.
    async fn group_by_relation(
        &self,
        names: &[String],
        treatment_type: TreatmentType,
    ) -> Result<Vec<GroupRecord>>;
}

#[async_trait]
impl<G: GraphStore + ?Sized> GraphStore for Arc<G> {
    async fn traverse(&self, request: &TraverseRequest) -> Result<TraversalMap> {
        (**self).traverse(request).await
    }

    async fn group_by_relation(
        &self,
        names: &[String],
        treatment_type: TreatmentType,
    ) -> Result<Vec<GroupRecord>> {
        (**self).group_by_relation(names, treatment_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip_through_str() {
        for label in [
            NodeLabel::Consideration,
            NodeLabel::Treatment,
            NodeLabel::Category,
            NodeLabel::Guideline,
        ] {
            assert_eq!(label.as_str().parse::<NodeLabel>().unwrap(), label);
        }
        assert!("SYMPTOM".parse::<NodeLabel>().is_err());
    }

    #[test]
    fn test_treatment_type_parse_is_case_insensitive() {
        assert_eq!("surgical".parse::<TreatmentType>().unwrap(), TreatmentType::Surgical);
        assert_eq!("Medical".parse::<TreatmentType>().unwrap(), TreatmentType::Medical);
        assert!("HERBAL".parse::<TreatmentType>().is_err());
    }

    #[test]
    fn test_node_serializes_type_field() {
        let node = Node {
            name: "TURP".to_string(),
            label: NodeLabel::Treatment,
            treatment_type: Some(TreatmentType::Surgical),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "SURGICAL");
        assert_eq!(json["label"], "TREATMENT");

        let consideration: Node =
            serde_json::from_str(r#"{"name": "SYMPTOM PROFILE", "label": "CONSIDERATION"}"#).unwrap();
        assert!(consideration.treatment_type.is_none());
    }

    #[test]
    fn test_traverse_request_builder() {
        let req = TraverseRequest::new("SYMPTOM PROFILE", NodeLabel::Consideration)
            .relation(RelationType::ParentConsideration)
            .depth(2);
        assert_eq!(req.relation, Some(RelationType::ParentConsideration));
        assert_eq!(req.depth, 2);
    }
}
