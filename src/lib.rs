pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod oracle;
pub mod report;
pub mod server;
pub mod traversal;

pub use config::Config;
pub use error::{Result, TxgraphError};
pub use graph::{GraphStore, SqliteGraphStore};
pub use hierarchy::HierarchyAssembler;
pub use oracle::{OpenAIOracle, ReasoningOracle};
pub use traversal::{Resolution, TraversalEngine};
