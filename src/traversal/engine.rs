use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::TraversalConfig;
use crate::error::{Result, TxgraphError};
use crate::graph::{GraphStore, NodeLabel, RelationType, TraverseRequest};
use crate::oracle::{ActionInvocation, ActionSpec, Decision, ReasoningOracle, TranscriptEntry};
use crate::traversal::{Resolution, SessionState, TraversalEvent};

/// Name of the single action offered to the oracle.
pub const EXPAND_ACTION: &str = "get_considerations";

const DEFAULT_MAX_TURNS: usize = 12;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpandArgs {
    target_node: String,
}

/// Bounded Decide -> Expand -> Select loop over a graph and an oracle.
///
/// The engine holds no per-session state, so one instance can serve many
/// concurrent `resolve` calls.
pub struct TraversalEngine<G, O> {
    graph: G,
    oracle: O,
    roots: Vec<String>,
    max_turns: usize,
    deadline: Option<Duration>,
}

impl<G: GraphStore, O: ReasoningOracle> TraversalEngine<G, O> {
    pub fn new(graph: G, oracle: O, roots: Vec<String>) -> Self {
        Self {
            graph,
            oracle,
            roots,
            max_turns: DEFAULT_MAX_TURNS,
            deadline: None,
        }
    }

    pub fn from_config(graph: G, oracle: O, config: &TraversalConfig) -> Self {
        let deadline = match config.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(graph, oracle, config.roots.clone())
            .with_max_turns(config.max_turns)
            .with_deadline(deadline)
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Map considerations to the treatments recommended for the relevant
    /// parts of the consideration hierarchy.
    pub async fn resolve(&self, considerations: &[String]) -> Result<Resolution> {
        let cancel = AtomicBool::new(false);
        self.resolve_with(considerations, &cancel, None).await
    }

    /// `resolve` with a cancellation flag and an optional diagnostics channel.
    ///
    /// Any failure discards everything picked so far.
    pub async fn resolve_with(
        &self,
        considerations: &[String],
        cancel: &AtomicBool,
        events: Option<&UnboundedSender<TraversalEvent>>,
    ) -> Result<Resolution> {
        let mut cleaned: Vec<String> = Vec::new();
        for consideration in considerations {
            let trimmed = consideration.trim();
            if !trimmed.is_empty() && !cleaned.iter().any(|c| c == trimmed) {
                cleaned.push(trimmed.to_string());
            }
        }
        if cleaned.is_empty() {
            return Ok(Resolution::new());
        }

        let session = Uuid::new_v4();
        log::info!(
            "[{}] Resolving {} considerations (max {} turns)",
            session,
            cleaned.len(),
            self.max_turns
        );

        let run = self.run(session, &cleaned, cancel, events);
        let outcome = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(TxgraphError::DeadlineExceeded(limit))),
            None => run.await,
        };

        if let Err(e) = &outcome {
            log::warn!("[{}] Resolve failed: {}", session, e);
        }
        outcome
    }

    async fn run(
        &self,
        session: Uuid,
        considerations: &[String],
        cancel: &AtomicBool,
        events: Option<&UnboundedSender<TraversalEvent>>,
    ) -> Result<Resolution> {
        let mut state = SessionState::new(considerations);
        let mut turn = 0;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(TxgraphError::Cancelled);
            }
            if turn >= self.max_turns {
                return Err(TxgraphError::TurnLimitExceeded(self.max_turns));
            }
            turn += 1;

            let menu = self.menu(&state);
            let actions = [expand_action(&menu)];
            let decision = self.oracle.decide(state.decide_context(&menu), &actions).await?;
            state.record(TranscriptEntry::from_decision(&decision));

            let (message, calls) = match decision {
                Decision::Invoke { message, calls } if !calls.is_empty() => (message, calls),
                Decision::Terminal { message } | Decision::Invoke { message, .. } => {
                    log::debug!("[{}] Turn {}: oracle finished exploring", session, turn);
                    emit(
                        events,
                        TraversalEvent::Decided {
                            turn,
                            message,
                            targets: Vec::new(),
                        },
                    );
                    break;
                }
            };

            let targets = validate_calls(&calls, &menu)?;
            emit(
                events,
                TraversalEvent::Decided {
                    turn,
                    message,
                    targets: targets.iter().map(|(_, target)| target.clone()).collect(),
                },
            );

            let expanded = self.expand(&mut state, &targets).await?;
            log::info!(
                "[{}] Turn {}: expanded {:?}; {} paths and {} candidates open",
                session,
                turn,
                expanded,
                state.path_frontier().len(),
                state.end_frontier().len()
            );
            emit(
                events,
                TraversalEvent::Expanded {
                    nodes: expanded,
                    path_frontier: state.path_frontier().to_vec(),
                    end_frontier: state.end_frontier().len(),
                },
            );

            if !state.end_frontier().is_empty() {
                let candidates = state.candidates();
                let answer = self.oracle.select(state.select_context(&candidates)).await?;
                let added = state.pick(&candidates, answer)?;
                log::debug!("[{}] Turn {}: picked {:?}", session, turn, added);
                emit(
                    events,
                    TraversalEvent::Selected {
                        candidates: candidates.len(),
                        picked: added,
                    },
                );
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(TxgraphError::Cancelled);
        }

        let resolution = self.collect(state.picked()).await?;
        log::info!(
            "[{}] Picked {} considerations in {} turns",
            session,
            resolution.len(),
            turn
        );
        emit(
            events,
            TraversalEvent::Finished {
                considerations: resolution.keys().cloned().collect(),
            },
        );
        Ok(resolution)
    }

    /// Roots first, then the unexpanded path frontier.
    fn menu(&self, state: &SessionState) -> Vec<String> {
        let mut menu = self.roots.clone();
        for name in state.path_frontier() {
            if !menu.contains(name) {
                menu.push(name.clone());
            }
        }
        menu
    }

    /// Traverse every requested node that has not been expanded yet, in name
    /// order, and answer each invocation in the transcript.
    async fn expand(&self, state: &mut SessionState, targets: &[(String, String)]) -> Result<Vec<String>> {
        let mut fresh: Vec<String> = targets
            .iter()
            .map(|(_, target)| target.clone())
            .filter(|target| !state.is_expanded(target))
            .collect();
        fresh.sort();
        fresh.dedup();

        let requests: Vec<TraverseRequest> = fresh
            .iter()
            .map(|name| {
                TraverseRequest::new(name.clone(), NodeLabel::Consideration)
                    .relation(RelationType::ParentConsideration)
            })
            .collect();
        let results = try_join_all(requests.iter().map(|r| self.graph.traverse(r))).await?;

        let mut outputs: HashMap<String, String> = HashMap::new();
        for (name, traversal) in fresh.iter().zip(&results) {
            state.absorb(name, traversal);
            let content = serde_json::to_string(traversal)
                .map_err(|e| TxgraphError::Parse(format!("Failed to encode traversal: {}", e)))?;
            outputs.insert(name.clone(), content);
        }

        for (call_id, target) in targets {
            let content = outputs
                .get(target)
                .cloned()
                .unwrap_or_else(|| format!("{} has already been expanded.", target));
            state.record(TranscriptEntry::ActionResult {
                call_id: call_id.clone(),
                content,
            });
        }

        Ok(fresh)
    }

    /// Treatments recommended for each picked consideration.
    async fn collect(&self, picked: &[String]) -> Result<Resolution> {
        let requests: Vec<TraverseRequest> = picked
            .iter()
            .map(|name| {
                TraverseRequest::new(name.clone(), NodeLabel::Consideration)
                    .relation(RelationType::RecommendedFor)
            })
            .collect();
        let results = try_join_all(requests.iter().map(|r| self.graph.traverse(r))).await?;

        let mut resolution = Resolution::new();
        for (name, traversal) in picked.iter().zip(results) {
            let mut treatments: Vec<String> = traversal
                .into_values()
                .flatten()
                .map(|entry| entry.node)
                .collect();
            treatments.sort();
            treatments.dedup();
            resolution.insert(name.clone(), treatments);
        }
        Ok(resolution)
    }
}

fn expand_action(menu: &[String]) -> ActionSpec {
    ActionSpec {
        name: EXPAND_ACTION.to_string(),
        description: "Expand a consideration node to list the considerations beneath it. \
                      Several nodes may be expanded at once with parallel calls."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "target_node": {
                    "type": "string",
                    "enum": menu,
                    "description": "Name of the consideration node to expand"
                }
            },
            "required": ["target_node"],
            "additionalProperties": false
        }),
    }
}

/// Check every invocation against the offered menu before anything runs.
/// Returns `(call id, target)` pairs in invocation order.
fn validate_calls(calls: &[ActionInvocation], menu: &[String]) -> Result<Vec<(String, String)>> {
    calls
        .iter()
        .map(|call| {
            if call.action != EXPAND_ACTION {
                return Err(TxgraphError::OracleProtocol(format!(
                    "Unknown action '{}'",
                    call.action
                )));
            }
            let args: ExpandArgs = serde_json::from_value(call.args.clone()).map_err(|e| {
                TxgraphError::OracleProtocol(format!("Malformed arguments for {}: {}", EXPAND_ACTION, e))
            })?;
            if !menu.contains(&args.target_node) {
                return Err(TxgraphError::OracleProtocol(format!(
                    "'{}' is not an expandable node",
                    args.target_node
                )));
            }
            Ok((call.id.clone(), args.target_node))
        })
        .collect()
}

fn emit(events: Option<&UnboundedSender<TraversalEvent>>, event: TraversalEvent) {
    if let Some(tx) = events {
        // The listener may have gone away; the session still completes.
        let _ = tx.send(event);
    }
}
