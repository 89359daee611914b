//! Thin HTTP surface: one-shot resolve and a streamed variant.

pub mod events;
pub mod http;

pub use events::StreamEvent;
pub use http::{
    error_status, HttpServer, ResolveRequest, ResolveResponse, SharedEngine, SharedGraph,
    SharedOracle,
};
