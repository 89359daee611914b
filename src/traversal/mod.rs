//! Oracle-guided exploration of the consideration hierarchy.
//!
//! A session alternates between asking the oracle which frontier nodes to
//! expand, expanding them against the graph, and asking the oracle which of
//! the recommendation-bearing candidates found so far are relevant. When the
//! oracle is done, every picked consideration is mapped to the treatments
//! recommended for it.

mod engine;
mod session;

pub use engine::{TraversalEngine, EXPAND_ACTION};
pub use session::{goal_text, SessionState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category used for an expanded node that turned out to have no children.
pub const OTHER_CATEGORY: &str = "Other";

/// Picked consideration -> recommended treatments (sorted, deduplicated).
pub type Resolution = BTreeMap<String, Vec<String>>;

/// A recommendation-bearing candidate and the node it was found under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndEntry {
    pub category: String,
    pub node: String,
}

/// Diagnostics emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraversalEvent {
    /// The oracle answered an action-selection turn.
    Decided {
        turn: usize,
        message: Option<String>,
        targets: Vec<String>,
    },
    /// Nodes were expanded against the graph.
    Expanded {
        nodes: Vec<String>,
        path_frontier: Vec<String>,
        end_frontier: usize,
    },
    /// The oracle picked from the end frontier.
    Selected {
        candidates: usize,
        picked: Vec<String>,
    },
    /// Exploration ended and treatments were collected.
    Finished { considerations: Vec<String> },
}
