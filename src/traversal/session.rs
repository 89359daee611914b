use std::collections::HashSet;

use crate::error::{Result, TxgraphError};
use crate::graph::TraversalMap;
use crate::oracle::{DecideContext, SelectContext, TranscriptEntry};
use crate::traversal::{EndEntry, OTHER_CATEGORY};

/// Mutable state of one `resolve` call. Never shared between sessions.
#[derive(Debug, Clone)]
pub struct SessionState {
    goal: String,
    picked: Vec<String>,
    path_frontier: Vec<String>,
    end_frontier: Vec<EndEntry>,
    history: Vec<TranscriptEntry>,
    expanded: HashSet<String>,
}

impl SessionState {
    /// Start a session; the goal doubles as the opening user turn.
    pub fn new(considerations: &[String]) -> Self {
        let goal = goal_text(considerations);
        Self {
            history: vec![TranscriptEntry::User {
                content: goal.clone(),
            }],
            goal,
            picked: Vec::new(),
            path_frontier: Vec::new(),
            end_frontier: Vec::new(),
            expanded: HashSet::new(),
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn picked(&self) -> &[String] {
        &self.picked
    }

    pub fn path_frontier(&self) -> &[String] {
        &self.path_frontier
    }

    pub fn end_frontier(&self) -> &[EndEntry] {
        &self.end_frontier
    }

    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }

    pub fn is_expanded(&self, name: &str) -> bool {
        self.expanded.contains(name)
    }

    pub fn record(&mut self, entry: TranscriptEntry) {
        self.history.push(entry);
    }

    pub fn decide_context<'a>(&'a self, menu: &'a [String]) -> DecideContext<'a> {
        DecideContext {
            goal: &self.goal,
            picked: &self.picked,
            frontier: &self.path_frontier,
            menu,
            history: &self.history,
        }
    }

    pub fn select_context<'a>(&'a self, candidates: &'a [String]) -> SelectContext<'a> {
        SelectContext {
            goal: &self.goal,
            candidates,
            grouped: &self.end_frontier,
        }
    }

    /// End-frontier node names, first occurrence wins.
    pub fn candidates(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.end_frontier
            .iter()
            .filter(|entry| seen.insert(entry.node.as_str()))
            .map(|entry| entry.node.clone())
            .collect()
    }

    /// Merge the one-hop traversal of `name` into the frontiers.
    ///
    /// Children that can be explored further join the path frontier; children
    /// carrying recommendations join the end frontier under their parent. A
    /// node without any children is itself an end candidate under `Other`.
    pub fn absorb(&mut self, name: &str, traversal: &TraversalMap) {
        self.expanded.insert(name.to_string());
        self.path_frontier.retain(|n| n != name);

        if traversal.values().all(|children| children.is_empty()) {
            self.push_end(OTHER_CATEGORY, name);
            return;
        }

        for (parent, children) in traversal {
            for child in children {
                if child.has_children
                    && !self.expanded.contains(&child.node)
                    && !self.path_frontier.contains(&child.node)
                {
                    self.path_frontier.push(child.node.clone());
                }
                if child.has_recommendations {
                    self.push_end(parent, &child.node);
                }
            }
        }
    }

    fn push_end(&mut self, category: &str, node: &str) {
        let exists = self
            .end_frontier
            .iter()
            .any(|e| e.category == category && e.node == node);
        if !exists {
            self.end_frontier.push(EndEntry {
                category: category.to_string(),
                node: node.to_string(),
            });
        }
    }

    /// Apply a selection answer. Every item must be a verbatim candidate;
    /// otherwise nothing is picked. Returns the newly picked names.
    pub fn pick(&mut self, candidates: &[String], answer: Vec<String>) -> Result<Vec<String>> {
        if let Some(unknown) = answer.iter().find(|item| !candidates.contains(item)) {
            return Err(TxgraphError::OracleProtocol(format!(
                "Selected '{}' which was not offered as a candidate",
                unknown
            )));
        }

        let mut added = Vec::new();
        for item in answer {
            if !self.picked.contains(&item) {
                self.picked.push(item.clone());
                added.push(item);
            }
        }
        Ok(added)
    }
}

/// `"1. a\n2. b"`
pub fn goal_text(considerations: &[String]) -> String {
    considerations
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FrontierEntry;

    fn entry(node: &str, has_children: bool, has_recommendations: bool) -> FrontierEntry {
        FrontierEntry {
            node: node.to_string(),
            has_children,
            has_recommendations,
            has_excerpts: false,
        }
    }

    fn symptom_profile() -> TraversalMap {
        let mut map = TraversalMap::new();
        map.insert(
            "SYMPTOM PROFILE".to_string(),
            vec![
                entry("Bothersome storage symptoms", true, true),
                entry("Mild symptoms", false, true),
                entry("Unlinked note", false, false),
            ],
        );
        map
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_goal_is_numbered_list() {
        let state = SessionState::new(&strings(&["large prostate", "on anticoagulants"]));
        assert_eq!(state.goal(), "1. large prostate\n2. on anticoagulants");
        assert_eq!(
            state.history(),
            &[TranscriptEntry::User {
                content: "1. large prostate\n2. on anticoagulants".to_string()
            }]
        );
    }

    #[test]
    fn test_absorb_classifies_children() {
        let mut state = SessionState::new(&strings(&["nocturia"]));
        state.absorb("SYMPTOM PROFILE", &symptom_profile());

        assert_eq!(state.path_frontier(), &strings(&["Bothersome storage symptoms"]));
        let ends: Vec<(&str, &str)> = state
            .end_frontier()
            .iter()
            .map(|e| (e.category.as_str(), e.node.as_str()))
            .collect();
        assert_eq!(
            ends,
            vec![
                ("SYMPTOM PROFILE", "Bothersome storage symptoms"),
                ("SYMPTOM PROFILE", "Mild symptoms"),
            ]
        );
        assert!(state.is_expanded("SYMPTOM PROFILE"));
    }

    #[test]
    fn test_absorb_is_idempotent() {
        let mut state = SessionState::new(&strings(&["nocturia"]));
        state.absorb("SYMPTOM PROFILE", &symptom_profile());
        let path = state.path_frontier().to_vec();
        let ends = state.end_frontier().to_vec();

        state.absorb("SYMPTOM PROFILE", &symptom_profile());
        assert_eq!(state.path_frontier(), path.as_slice());
        assert_eq!(state.end_frontier(), ends.as_slice());
    }

    #[test]
    fn test_expanded_node_leaves_and_never_rejoins_path_frontier() {
        let mut state = SessionState::new(&strings(&["nocturia"]));
        state.absorb("SYMPTOM PROFILE", &symptom_profile());

        let mut storage = TraversalMap::new();
        storage.insert(
            "Bothersome storage symptoms".to_string(),
            vec![entry("Nocturia", false, true)],
        );
        state.absorb("Bothersome storage symptoms", &storage);
        assert!(state.path_frontier().is_empty());

        state.absorb("SYMPTOM PROFILE", &symptom_profile());
        assert!(state.path_frontier().is_empty());
    }

    #[test]
    fn test_childless_node_goes_to_other() {
        let mut state = SessionState::new(&strings(&["frail patient"]));
        state.absorb("MEDICAL COMPLEXITY / RISK", &TraversalMap::new());
        assert_eq!(
            state.end_frontier(),
            &[EndEntry {
                category: OTHER_CATEGORY.to_string(),
                node: "MEDICAL COMPLEXITY / RISK".to_string(),
            }]
        );
    }

    #[test]
    fn test_candidates_flatten_in_frontier_order() {
        let mut state = SessionState::new(&strings(&["x"]));
        state.push_end("A", "shared");
        state.push_end("B", "only-b");
        state.push_end("B", "shared");
        assert_eq!(state.candidates(), strings(&["shared", "only-b"]));
        assert_eq!(state.end_frontier().len(), 3);
    }

    #[test]
    fn test_pick_appends_new_names_in_answer_order() {
        let mut state = SessionState::new(&strings(&["x"]));
        let candidates = strings(&["a", "b", "c"]);

        let added = state.pick(&candidates, strings(&["c", "a", "c"])).unwrap();
        assert_eq!(added, strings(&["c", "a"]));

        let added = state.pick(&candidates, strings(&["a", "b"])).unwrap();
        assert_eq!(added, strings(&["b"]));
        assert_eq!(state.picked(), &strings(&["c", "a", "b"]));
    }

    #[test]
    fn test_invalid_pick_leaves_state_untouched() {
        let mut state = SessionState::new(&strings(&["x"]));
        let candidates = strings(&["a", "b"]);
        state.pick(&candidates, strings(&["a"])).unwrap();

        let err = state.pick(&candidates, strings(&["b", "z"])).unwrap_err();
        assert!(matches!(err, TxgraphError::OracleProtocol(_)));
        assert_eq!(state.picked(), &strings(&["a"]));
    }
}
