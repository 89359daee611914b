//! Reasoning oracle seam.
//!
//! The exploration loop talks to the oracle in two modes: *decide* picks the
//! next action from a menu (or signals that exploration is finished) and
//! *select* picks the relevant subset of a candidate list. The oracle is
//! stateless per call, so every `decide` receives the full transcript.

mod openai;
mod prompts;

pub use openai::OpenAIOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::traversal::EndEntry;

/// An operation the oracle may invoke, with a JSON-schema argument shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One operation call requested by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    /// Correlates the call with its result in the transcript.
    pub id: String,
    pub action: String,
    pub args: Value,
}

/// Outcome of an action-selection call.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No further exploration needed.
    Terminal { message: Option<String> },
    /// Run these operations, then ask again.
    Invoke {
        message: Option<String>,
        calls: Vec<ActionInvocation>,
    },
}

/// Transcript of one exploration session, replayed to the oracle each turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        calls: Vec<ActionInvocation>,
    },
    ActionResult {
        call_id: String,
        content: String,
    },
}

impl TranscriptEntry {
    /// Record an oracle decision as an assistant turn.
    pub fn from_decision(decision: &Decision) -> Self {
        match decision {
            Decision::Terminal { message } => TranscriptEntry::Assistant {
                content: message.clone(),
                calls: Vec::new(),
            },
            Decision::Invoke { message, calls } => TranscriptEntry::Assistant {
                content: message.clone(),
                calls: calls.clone(),
            },
        }
    }
}

/// Everything `decide` gets to see.
#[derive(Debug, Clone, Copy)]
pub struct DecideContext<'a> {
    pub goal: &'a str,
    pub picked: &'a [String],
    pub frontier: &'a [String],
    /// Nodes that may be expanded this turn: the roots, then the frontier.
    pub menu: &'a [String],
    pub history: &'a [TranscriptEntry],
}

/// Everything `select` gets to see.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    pub goal: &'a str,
    /// Flattened, de-duplicated node names; answers must be verbatim members.
    pub candidates: &'a [String],
    /// The same candidates with the category each was found under.
    pub grouped: &'a [EndEntry],
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Pick the next operation(s) from `actions`, or signal completion.
    async fn decide(&self, context: DecideContext<'_>, actions: &[ActionSpec]) -> Result<Decision>;

    /// Return the subset of `context.candidates` relevant to the goal.
    /// Order of the answer is not meaningful to the caller's validation.
    async fn select(&self, context: SelectContext<'_>) -> Result<Vec<String>>;
}

#[async_trait]
impl<O: ReasoningOracle + ?Sized> ReasoningOracle for Arc<O> {
    async fn decide(&self, context: DecideContext<'_>, actions: &[ActionSpec]) -> Result<Decision> {
        (**self).decide(context, actions).await
    }

    async fn select(&self, context: SelectContext<'_>) -> Result<Vec<String>> {
        (**self).select(context).await
    }
}
