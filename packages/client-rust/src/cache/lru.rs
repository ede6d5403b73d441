//! LRU cache bounded by entry count, total bytes, and entry age.
//!
//! Backed by an insertion-ordered [`IndexMap`]: front = LRU, back = MRU.
//! `get` promotes to MRU; `put` evicts from the front until every cap holds.
//! Caps are re-read from an [`ArcSwap`] on every operation, so a
//! reconfiguration takes effect on the next `put` without a background
//! sweeper.

use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chorus_core::clock::ClockSource;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::CacheConfig;

/// Counter snapshot returned by [`BoundedCache::metrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_entries: usize,
    pub current_bytes: u64,
    /// `hits / (hits + misses)`, or 0 when no lookups have happened.
    pub hit_rate: f64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at_ms: u64,
    size: u64,
}

struct Inner<K, V> {
    entries: IndexMap<K, CacheEntry<V>>,
    current_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Thread-safe bounded LRU cache. All operations serialize on one mutex.
pub struct BoundedCache<K, V> {
    caps: Arc<ArcSwap<CacheConfig>>,
    clock: Arc<dyn ClockSource>,
    size_calc: Box<dyn Fn(&V) -> u64 + Send + Sync>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache reading its caps from `caps` on every operation.
    ///
    /// `size_calc` estimates the byte cost of a value; it is invoked once
    /// per `put`.
    pub fn new(
        caps: Arc<ArcSwap<CacheConfig>>,
        clock: Arc<dyn ClockSource>,
        size_calc: impl Fn(&V) -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            caps,
            clock,
            size_calc: Box::new(size_calc),
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                current_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Looks up `key`, promoting it to MRU on a hit.
    ///
    /// An entry whose age has reached the TTL counts as expired (inclusive
    /// at exactly `ttl_ms`): it is removed and the lookup is a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let caps = self.caps.load();
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let Some(index) = inner.entries.get_index_of(key) else {
            inner.misses += 1;
            return None;
        };

        let entry = &inner.entries[index];
        if caps.ttl_ms > 0 && now.saturating_sub(entry.inserted_at_ms) >= caps.ttl_ms {
            let size = entry.size;
            inner.entries.shift_remove_index(index);
            inner.current_bytes -= size;
            inner.misses += 1;
            inner.expirations += 1;
            return None;
        }

        let last = inner.entries.len() - 1;
        inner.entries.move_index(index, last);
        inner.hits += 1;
        Some(inner.entries[last].value.clone())
    }

    /// Inserts or replaces `key` at the MRU position, then evicts from the
    /// LRU end until the entry and byte caps hold. The key just inserted is
    /// never chosen for eviction.
    pub fn put(&self, key: K, value: V) {
        let caps = self.caps.load();
        let now = self.clock.now_ms();
        let size = (self.size_calc)(&value);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.shift_remove(&key) {
            inner.current_bytes -= old.size;
        }
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at_ms: now,
                size,
            },
        );
        inner.current_bytes += size;

        loop {
            let over_entries = caps.max_entries > 0 && inner.entries.len() > caps.max_entries;
            let over_bytes = caps.max_bytes > 0 && inner.current_bytes > caps.max_bytes;
            if !over_entries && !over_bytes {
                break;
            }
            match inner.entries.get_index(0) {
                // Only the freshly inserted entry remains; it survives even
                // if a cap is still violated.
                None => break,
                Some((victim, _)) if *victim == key => break,
                Some(_) => {}
            }
            if let Some((_, removed)) = inner.entries.shift_remove_index(0) {
                inner.current_bytes -= removed.size;
                inner.evictions += 1;
            }
        }
    }

    /// Whether `key` is present, without promoting it or touching counters.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Removes `key` if present.
    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.shift_remove(key) {
            inner.current_bytes -= entry.size;
        }
    }

    /// Drops all entries; counters are preserved.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_bytes = 0;
    }

    /// Snapshot of the counters and current occupancy.
    pub fn metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };
        CacheMetrics {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            current_entries: inner.entries.len(),
            current_bytes: inner.current_bytes,
            hit_rate,
        }
    }

    /// Zeros the counters; contents are untouched.
    pub fn reset_metrics(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }
}
