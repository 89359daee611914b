use std::time::Duration;
use thiserror::Error;

/// Main error type for txgraph
#[derive(Error, Debug)]
pub enum TxgraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reasoning oracle transport or API errors
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// The oracle answered outside the offered menu or candidate list
    #[error("Oracle protocol error: {0}")]
    OracleProtocol(String),

    /// The graph service could not be reached or failed mid-query
    #[error("Graph unavailable: {0}")]
    GraphUnavailable(String),

    /// Traversal start node does not exist under the given label
    #[error("Node not found: {name} ({label})")]
    NodeNotFound { name: String, label: String },

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Exploration ran more oracle turns than allowed
    #[error("Turn limit exceeded: oracle did not finish within {0} turns")]
    TurnLimitExceeded(usize),

    /// Overall resolve deadline elapsed
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Caller cancelled the resolve session
    #[error("Resolve cancelled")]
    Cancelled,
}

impl TxgraphError {
    /// Re-label storage failures as graph connectivity failures.
    pub fn into_unavailable(self) -> Self {
        match self {
            TxgraphError::Database(e) => TxgraphError::GraphUnavailable(e.to_string()),
            TxgraphError::Io(e) => TxgraphError::GraphUnavailable(e.to_string()),
            other => other,
        }
    }
}

/// Convenient Result type using TxgraphError
pub type Result<T> = std::result::Result<T, TxgraphError>;
