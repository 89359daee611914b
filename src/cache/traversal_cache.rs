use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::graph::{GraphStore, GroupRecord, TraversalMap, TraverseRequest, TreatmentType};

/// Thread-safe LRU cache of traversal results
///
/// The graph is read-only from the engine's point of view, so a traversal
/// answer stays valid until the graph is re-imported.
pub struct TraversalCache {
    cache: Mutex<LruCache<TraverseRequest, TraversalMap>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TraversalCache {
    /// Create a cache holding up to `capacity` results (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<TraverseRequest, TraversalMap>> {
        // A panic while holding the lock cannot leave the LRU half-updated in a
        // way that matters for a cache, so keep serving.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, request: &TraverseRequest) -> Option<TraversalMap> {
        let found = self.lock().get(request).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, request: TraverseRequest, result: TraversalMap) {
        self.lock().put(request, result);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

/// `GraphStore` decorator that memoizes `traverse`.
///
/// Failed traversals are never cached; `group_by_relation` passes through.
pub struct CachedGraphStore<G> {
    inner: G,
    cache: TraversalCache,
}

impl<G: GraphStore> CachedGraphStore<G> {
    pub fn new(inner: G, capacity: usize) -> Self {
        Self {
            inner,
            cache: TraversalCache::new(capacity),
        }
    }

    pub fn cache(&self) -> &TraversalCache {
        &self.cache
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: GraphStore> GraphStore for CachedGraphStore<G> {
    async fn traverse(&self, request: &TraverseRequest) -> Result<TraversalMap> {
        if let Some(cached) = self.cache.get(request) {
            log::debug!("Traversal cache hit for {}", request.start);
            return Ok(cached);
        }
        let result = self.inner.traverse(request).await?;
        self.cache.put(request.clone(), result.clone());
        Ok(result)
    }

    async fn group_by_relation(
        &self,
        names: &[String],
        treatment_type: TreatmentType,
    ) -> Result<Vec<GroupRecord>> {
        self.inner.group_by_relation(names, treatment_type).await
    }
}
