use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;

/// The last document fetched successfully from upstream.
///
/// Entries are immutable once built; refreshing the cache swaps in a new `Arc`.
#[derive(Debug)]
pub struct CacheEntry {
    pub data: Arc<Value>,
    pub fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Single-slot cache: holds at most one entry and never evicts it.
#[derive(Debug, Default)]
pub struct PriceCache {
    slot: RwLock<Option<Arc<CacheEntry>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry, only if it is younger than `ttl`.
    pub fn fresh(&self, ttl: Duration) -> Option<Arc<CacheEntry>> {
        self.slot
            .read()
            .as_ref()
            .filter(|entry| entry.is_fresh(ttl))
            .cloned()
    }

    /// The entry regardless of age.
    pub fn latest(&self) -> Option<Arc<CacheEntry>> {
        self.slot.read().clone()
    }

    /// Replaces whatever is cached with `data`, stamped now.
    pub fn store(&self, data: Value) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            data: Arc::new(data),
            fetched_at: Utc::now(),
            stored_at: Instant::now(),
        });
        *self.slot.write() = Some(entry.clone());
        entry
    }
}
