//! Per-collection entity cache using moka
//!
//! Holds entity snapshots by id plus one whole-collection entry, bounded by
//! capacity and time to live. A collection larger than the capacity is never
//! held whole. Every write bumps a generation counter; a read
//! only populates the cache if no write happened since it started, so a
//! reader that raced a writer never reinstates pre-write data.

use crate::config::CacheConfig;
use moka::future::Cache;
use plandoc_model::Entity;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Approximate number of cached entities
    pub entry_count: u64,
    /// Writes observed so far
    pub generation: u64,
}

/// Cache for one entity collection
#[derive(Debug, Clone)]
pub struct EntityCache<T: Entity> {
    by_id: Cache<String, T>,
    all: Cache<(), Arc<Vec<T>>>,
    max_capacity: u64,
    generation: Arc<AtomicU64>,
    /// Orders populate against invalidate
    gate: Arc<Mutex<()>>,
}

impl<T: Entity> EntityCache<T> {
    /// Create cache with the configured bounds
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            by_id: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(config.ttl())
                .build(),
            all: Cache::builder()
                .max_capacity(1)
                .time_to_live(config.ttl())
                .build(),
            max_capacity: config.max_capacity,
            generation: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Current generation; pass it back to `populate*` after reading disk
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cached entity
    pub async fn get(&self, id: &str) -> Option<T> {
        self.by_id.get(id).await
    }

    /// Cached whole collection
    pub async fn get_all(&self) -> Option<Arc<Vec<T>>> {
        self.all.get(&()).await
    }

    /// Cache one entity read at `generation`
    pub async fn populate(&self, generation: u64, entity: T) {
        let _gate = self.gate.lock().await;
        if self.generation() == generation {
            self.by_id.insert(entity.id().to_string(), entity).await;
        }
    }

    /// Cache a whole collection read at `generation`
    ///
    /// Returns `false` when the read raced a write or the collection exceeds
    /// the capacity; nothing is cached then.
    pub async fn populate_all(&self, generation: u64, entities: Arc<Vec<T>>) -> bool {
        if u64::try_from(entities.len()).map_or(true, |len| len > self.max_capacity) {
            return false;
        }
        let _gate = self.gate.lock().await;
        if self.generation() != generation {
            return false;
        }
        for entity in entities.iter() {
            self.by_id.insert(entity.id().to_string(), entity.clone()).await;
        }
        self.all.insert((), entities).await;
        true
    }

    /// Drop everything; call after every write to the collection
    pub async fn invalidate(&self) {
        let _gate = self.gate.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_id.invalidate_all();
        self.all.invalidate_all();
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.by_id.entry_count(),
            generation: self.generation(),
        }
    }
}
