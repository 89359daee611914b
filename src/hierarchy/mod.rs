//! Presentation hierarchy for a flat set of treatment names.
//!
//! Treatments whose out-of-set parent is shared by several of them are folded
//! under a synthetic entry for that parent; everything else stays top level.

mod render;

pub use render::{render, PresentationNode};

use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::graph::{GraphStore, GroupRecord, TreatmentType};

/// A child in the hierarchy: either a bare name or a nested entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HierarchyChild {
    Leaf(String),
    Entry(HierarchyEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyEntry {
    pub name: String,
    pub children: Vec<HierarchyChild>,
    pub parent: Option<String>,
}

impl HierarchyEntry {
    fn from_record(record: GroupRecord) -> Self {
        Self {
            name: record.name,
            children: record.children.into_iter().map(HierarchyChild::Leaf).collect(),
            parent: record.parent,
        }
    }
}

/// Assembled hierarchy of one treatment type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypedHierarchy {
    #[serde(rename = "type")]
    pub treatment_type: TreatmentType,
    pub entries: Vec<HierarchyEntry>,
}

/// Fold grouping records into top-level entries.
///
/// Standalone entries come first in record order, followed by one group per
/// shared parent in order of the parent's first appearance. A record that is
/// some other record's child is left out of the top level; its parent already
/// lists it.
pub fn assemble_records(records: Vec<GroupRecord>) -> Vec<HierarchyEntry> {
    let mut frequency: HashMap<&str, usize> = HashMap::new();
    let mut parents_in_order: Vec<&str> = Vec::new();
    for parent in records.iter().filter_map(|r| r.parent.as_deref()) {
        let count = frequency.entry(parent).or_insert(0);
        if *count == 0 {
            parents_in_order.push(parent);
        }
        *count += 1;
    }

    let shared: Vec<String> = parents_in_order
        .into_iter()
        .filter(|parent| frequency[parent] > 1)
        .map(str::to_string)
        .collect();

    let child_set: HashSet<String> = records
        .iter()
        .flat_map(|r| r.children.iter().cloned())
        .collect();

    let mut standalone = Vec::new();
    let mut buckets: Vec<Vec<HierarchyChild>> = vec![Vec::new(); shared.len()];
    for record in records {
        if child_set.contains(&record.name) {
            continue;
        }
        let slot = record
            .parent
            .as_ref()
            .and_then(|parent| shared.iter().position(|s| s == parent));
        match slot {
            Some(i) => buckets[i].push(HierarchyChild::Entry(HierarchyEntry::from_record(record))),
            None => standalone.push(HierarchyEntry::from_record(record)),
        }
    }

    let groups = shared
        .into_iter()
        .zip(buckets)
        .map(|(name, children)| HierarchyEntry {
            name,
            children,
            parent: None,
        });

    standalone.extend(groups);
    standalone
}

/// Builds presentation hierarchies from the graph's `IS_TYPE_OF` structure.
pub struct HierarchyAssembler<G> {
    graph: G,
}

impl<G: GraphStore> HierarchyAssembler<G> {
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub async fn assemble(
        &self,
        names: &[String],
        treatment_type: TreatmentType,
    ) -> Result<Vec<HierarchyEntry>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.graph.group_by_relation(names, treatment_type).await?;
        Ok(assemble_records(records))
    }

    /// Assemble every treatment type concurrently, dropping empty partitions.
    pub async fn sort_by_type(&self, names: &[String]) -> Result<Vec<TypedHierarchy>> {
        let partitions = try_join_all(
            TreatmentType::ALL
                .iter()
                .map(|treatment_type| self.assemble(names, *treatment_type)),
        )
        .await?;

        Ok(TreatmentType::ALL
            .into_iter()
            .zip(partitions)
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(treatment_type, entries)| TypedHierarchy {
                treatment_type,
                entries,
            })
            .collect())
    }
}
