// Text → embedding cache with LRU eviction and observable hit rate.
// Embedding calls are the engine's main I/O cost; intents repeat heavily
// within a session.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::Embedding;

#[derive(Debug)]
struct Entry {
    embedding: Embedding,
    last_used: u64,
}

/// Bounded cache keyed by exact text.
#[derive(Debug)]
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, text: &str) -> Option<Embedding> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        if let Some(entry) = inner.entries.get_mut(text) {
            entry.last_used = clock;
            let embedding = entry.embedding.clone();
            inner.hits += 1;
            Some(embedding)
        } else {
            inner.misses += 1;
            None
        }
    }

    pub fn put(&self, text: String, embedding: Embedding) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        inner.entries.insert(
            text,
            Entry {
                embedding,
                last_used: clock,
            },
        );
        if inner.entries.len() > self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of lookups served from cache; 0 before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        }
    }
}
