//! Per-consideration treatment report built from a resolution.

use futures_util::future::try_join_all;
use serde::Serialize;
use std::fmt::Write;

use crate::error::Result;
use crate::graph::{GraphStore, TreatmentType};
use crate::hierarchy::{render, HierarchyAssembler, PresentationNode};
use crate::traversal::Resolution;

pub const NO_CONSIDERATIONS: &str = "No considerations apply.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreatmentGroup {
    #[serde(rename = "type")]
    pub treatment_type: TreatmentType,
    pub treatments: Vec<PresentationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsiderationReport {
    pub consideration: String,
    pub groups: Vec<TreatmentGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecommendationReport {
    pub considerations: Vec<ConsiderationReport>,
}

/// Sort and render the treatments of every resolved consideration.
pub async fn build_report<G: GraphStore>(
    assembler: &HierarchyAssembler<G>,
    resolution: &Resolution,
) -> Result<RecommendationReport> {
    let typed = try_join_all(
        resolution
            .values()
            .map(|treatments| assembler.sort_by_type(treatments)),
    )
    .await?;

    let considerations = resolution
        .keys()
        .zip(typed)
        .map(|(consideration, partitions)| ConsiderationReport {
            consideration: consideration.clone(),
            groups: partitions
                .into_iter()
                .map(|partition| TreatmentGroup {
                    treatment_type: partition.treatment_type,
                    treatments: render(&partition.entries),
                })
                .collect(),
        })
        .collect();

    Ok(RecommendationReport { considerations })
}

fn type_heading(treatment_type: TreatmentType) -> &'static str {
    match treatment_type {
        TreatmentType::Surgical => "Surgical",
        TreatmentType::Medical => "Medical",
        TreatmentType::Conservative => "Conservative",
    }
}

fn write_tree(out: &mut String, nodes: &[PresentationNode], indent: usize) {
    for node in nodes {
        let _ = writeln!(out, "{:indent$}- {}", "", node.name(), indent = indent);
        if let PresentationNode::Group { children, .. } = node {
            write_tree(out, children, indent + 2);
        }
    }
}

impl RecommendationReport {
    pub fn is_empty(&self) -> bool {
        self.considerations.is_empty()
    }

    /// Numbered consideration blocks with indented bullet trees.
    pub fn render_text(&self) -> String {
        if self.is_empty() {
            return NO_CONSIDERATIONS.to_string();
        }

        let mut out = String::new();
        for (i, report) in self.considerations.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}. {}", i + 1, report.consideration);
            if report.groups.is_empty() {
                out.push_str("   No treatments on record.\n");
            }
            for group in &report.groups {
                let _ = writeln!(out, "   {}:", type_heading(group.treatment_type));
                write_tree(&mut out, &group.treatments, 5);
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::seeded_store;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_report_text() {
        assert_eq!(RecommendationReport::default().render_text(), NO_CONSIDERATIONS);
    }

    #[test]
    fn test_render_text_layout() {
        let report = RecommendationReport {
            considerations: vec![
                ConsiderationReport {
                    consideration: "prostate size larger than 80cc".to_string(),
                    groups: vec![TreatmentGroup {
                        treatment_type: TreatmentType::Surgical,
                        treatments: vec![
                            PresentationNode::Leaf("Simple Prostatectomy".to_string()),
                            PresentationNode::Group {
                                name: "Endoscopic Enucleation".to_string(),
                                children: vec![PresentationNode::Leaf("HoLEP".to_string())],
                            },
                        ],
                    }],
                },
                ConsiderationReport {
                    consideration: "Unlinked".to_string(),
                    groups: vec![],
                },
            ],
        };

        assert_eq!(
            report.render_text(),
            "1. prostate size larger than 80cc\n   Surgical:\n     - Simple Prostatectomy\n     - Endoscopic Enucleation\n       - HoLEP\n\n2. Unlinked\n   No treatments on record."
        );
    }

    #[tokio::test]
    async fn test_build_report_from_resolution() {
        let (store, _temp) = seeded_store().await;
        let assembler = HierarchyAssembler::new(store);

        let mut resolution = Resolution::new();
        resolution.insert(
            "Bothersome storage symptoms".to_string(),
            strings(&["Finasteride", "Tamsulosin"]),
        );
        resolution.insert("Nocturia".to_string(), strings(&["Fluid Management"]));

        let report = build_report(&assembler, &resolution).await.unwrap();
        assert_eq!(report.considerations.len(), 2);
        assert_eq!(report.considerations[0].consideration, "Bothersome storage symptoms");
        assert_eq!(
            report.considerations[0].groups,
            vec![TreatmentGroup {
                treatment_type: TreatmentType::Medical,
                treatments: vec![
                    PresentationNode::Leaf("Finasteride".to_string()),
                    PresentationNode::Leaf("Tamsulosin".to_string()),
                ],
            }]
        );
        assert_eq!(
            report.considerations[1].groups[0].treatment_type,
            TreatmentType::Conservative
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["considerations"][1]["groups"][0]["type"], "CONSERVATIVE");
    }

    #[tokio::test]
    async fn test_build_report_empty_resolution() {
        let (store, _temp) = seeded_store().await;
        let report = build_report(&HierarchyAssembler::new(store), &Resolution::new())
            .await
            .unwrap();
        assert!(report.is_empty());
    }
}
