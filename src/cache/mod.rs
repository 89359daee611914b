pub mod traversal_cache;

pub use traversal_cache::{CachedGraphStore, TraversalCache};
