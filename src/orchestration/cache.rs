//! Session-scoped context cache.
//!
//! Memoizes documentation lookups by `(topic, resource_id)`. Entries are
//! immutable once inserted and are evicted oldest-first past the capacity.
//! Misses from the lookup service are not cached.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::mlog_trace;
use crate::orchestration::handler::{ContextLookup, Document};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    topic: String,
    resource_id: String,
}

impl CacheKey {
    fn new(topic: &str, resource_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            resource_id: resource_id.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<Document>>,
    order: VecDeque<CacheKey>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct ContextCache {
    state: RwLock<CacheState>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContextCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, topic: &str, resource_id: &str) -> Option<Arc<Document>> {
        let state = self.state.read().await;
        let found = state.entries.get(&CacheKey::new(topic, resource_id)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert a document, returning the cached entry. An existing entry for
    /// the same key is kept.
    pub async fn insert(&self, document: Document) -> Arc<Document> {
        let key = CacheKey::new(&document.topic, &document.resource_id);
        let mut state = self.state.write().await;
        if let Some(existing) = state.entries.get(&key) {
            return Arc::clone(existing);
        }

        while state.entries.len() >= self.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            mlog_trace!("cache: evicted {}/{}", oldest.topic, oldest.resource_id);
        }

        let document = Arc::new(document);
        state.order.push_back(key.clone());
        state.entries.insert(key, Arc::clone(&document));
        document
    }

    /// Remove one entry. Returns whether it was present.
    pub async fn evict(&self, topic: &str, resource_id: &str) -> bool {
        let key = CacheKey::new(topic, resource_id);
        let mut state = self.state.write().await;
        state.order.retain(|k| k != &key);
        state.entries.remove(&key).is_some()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// A lookup service fronted by the session cache.
#[derive(Clone)]
pub struct CachedLookup {
    cache: Arc<ContextCache>,
    service: Arc<dyn ContextLookup>,
}

impl CachedLookup {
    pub fn new(cache: Arc<ContextCache>, service: Arc<dyn ContextLookup>) -> Self {
        Self { cache, service }
    }

    pub async fn lookup(&self, topic: &str, resource_id: &str) -> Result<Option<Arc<Document>>> {
        if let Some(hit) = self.cache.get(topic, resource_id).await {
            return Ok(Some(hit));
        }
        match self.service.lookup(topic, resource_id).await? {
            Some(document) => Ok(Some(self.cache.insert(document).await)),
            None => Ok(None),
        }
    }

    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }
}

impl std::fmt::Debug for CachedLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLookup")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
