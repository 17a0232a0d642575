//! Statement caching for compiled SELECT shapes.
//!
//! Caches statement shapes keyed by a string that callers compose from the
//! query structure, so repeated selects only rebind parameter values.

use crate::select::SelectStatement;
use nodemap_core::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Default maximum number of cached shapes.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct CachedStatement {
    statement: Arc<SelectStatement>,
    /// Logical clock value of the last access.
    last_used: AtomicU64,
}

/// LRU-style cache for statement shapes.
///
/// Readers share the lock; a miss builds the statement outside the lock and
/// publishes it whole, so two threads racing on one key at worst build it
/// twice. The first published shape wins and both callers receive it. When
/// the cache exceeds its capacity, the least-recently-used entry is evicted.
///
/// # Example
///
/// ```
/// use nodemap_query::{SelectStatement, StatementCache};
///
/// let cache = StatementCache::new(100);
/// let (first, cached) = cache
///     .get_or_build("Book|Book", || Ok(SelectStatement::new("Book|Book", "book", "Book")))
///     .unwrap();
/// assert!(!cached);
///
/// let (second, cached) = cache
///     .get_or_build("Book|Book", || unreachable!())
///     .unwrap();
/// assert!(cached);
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug)]
pub struct StatementCache {
    cache: RwLock<HashMap<String, CachedStatement>>,
    max_size: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatementCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::with_capacity(max_size.min(256))),
            max_size,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything; every lookup builds afresh.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_size > 0
    }

    /// Look up a cached shape.
    pub fn get(&self, key: &str) -> Option<Arc<SelectStatement>> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(key).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.statement)
        })
    }

    /// Publish a shape under `key`.
    ///
    /// If another shape was published first, that one is kept and returned.
    pub fn insert(&self, key: &str, statement: Arc<SelectStatement>) -> Arc<SelectStatement> {
        if !self.is_enabled() {
            return statement;
        }
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.get(key) {
            return Arc::clone(&existing.statement);
        }
        if cache.len() >= self.max_size {
            Self::evict_lru(&mut cache);
        }
        cache.insert(
            key.to_string(),
            CachedStatement {
                statement: Arc::clone(&statement),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        statement
    }

    /// Get a cached shape or build and publish it.
    ///
    /// The `builder` closure is only called on cache miss. The flag tells
    /// whether the returned shape came from the cache.
    pub fn get_or_build(
        &self,
        key: &str,
        builder: impl FnOnce() -> Result<SelectStatement>,
    ) -> Result<(Arc<SelectStatement>, bool)> {
        if let Some(statement) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "Statement cache hit");
            return Ok((statement, true));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let built = Arc::new(builder()?);
        tracing::trace!(key, "Statement cache miss, built new shape");
        Ok((self.insert(key, built), false))
    }

    /// Check if a shape is cached.
    pub fn contains(&self, key: &str) -> bool {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that had to build.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Clear all cached shapes.
    pub fn clear(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_lru(cache: &mut HashMap<String, CachedStatement>) {
        let lru_key = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());
        if let Some(key) = lru_key {
            tracing::trace!(key = %key, "Evicting statement shape");
            cache.remove(&key);
        }
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
