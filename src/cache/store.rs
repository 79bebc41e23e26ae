//! Directory Listing Store
//!
//! Key/value store of folder listings keyed by normalized path, backed by
//! Moka. Tracks hit/miss counters and warming usage alongside the entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::stats::{percent, CacheStats};
use crate::clock::{Clock, TokioClock};
use crate::listing::Footprint;
use crate::path;

/// Default bound on cached folders
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Default listing TTL (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Size and expiry policy for a [`CacheStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of entries; least recently used go first
    pub max_entries: Option<u64>,
    /// Time after insertion at which an entry expires
    pub time_to_live: Option<Duration>,
}

impl StoreConfig {
    /// No size bound and no expiry
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            time_to_live: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            time_to_live: Some(DEFAULT_TTL),
        }
    }
}

/// A cached value with its bookkeeping
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    /// When this entry was stored
    stored_at: Instant,
    /// Hits served by this entry, shared across Moka's clones
    hit_count: Arc<AtomicU64>,
    /// Written by background warming rather than a foreground load
    prefetched: bool,
}

/// Path-keyed listing store
pub struct CacheStore<V> {
    entries: Cache<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Hits on prefetched entries
    preload_hits: AtomicU64,
    /// Prefetched entries read at least once
    prefetch_used: AtomicU64,
    /// Writes made by warming
    prefetch_writes: AtomicU64,
    load_time_total_us: AtomicU64,
    load_samples: AtomicU64,
}

impl<V> CacheStore<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    /// Create a store reading time from tokio
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a store with an explicit clock
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let mut builder = Cache::builder()
            .name("directory_listing_cache")
            .eviction_policy(EvictionPolicy::lru());
        if let Some(max_entries) = config.max_entries {
            builder = builder.max_capacity(max_entries);
        }
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            preload_hits: AtomicU64::new(0),
            prefetch_used: AtomicU64::new(0),
            prefetch_writes: AtomicU64::new(0),
            load_time_total_us: AtomicU64::new(0),
            load_samples: AtomicU64::new(0),
        }
    }

    /// Get a listing from the cache
    ///
    /// Updates hit/miss counters and the entry's own hit count. Never
    /// fetches.
    pub fn get(&self, path: &str) -> Option<V> {
        let key = path::normalize(path);
        match self.entries.get(&key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let previous = entry.hit_count.fetch_add(1, Ordering::Relaxed);
                if entry.prefetched {
                    self.preload_hits.fetch_add(1, Ordering::Relaxed);
                    if previous == 0 {
                        self.prefetch_used.fetch_add(1, Ordering::Relaxed);
                    }
                }
                trace!(path = %key, prefetched = entry.prefetched, "Cache HIT for listing");
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(path = %key, "Cache MISS for listing");
                None
            }
        }
    }

    /// Whether a listing is cached, without touching any counter
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&path::normalize(path))
    }

    /// Insert or overwrite a listing
    pub fn set(&self, path: &str, value: V) {
        self.insert(path, value, false);
    }

    /// Insert a listing produced by background warming
    pub fn set_prefetched(&self, path: &str, value: V) {
        self.prefetch_writes.fetch_add(1, Ordering::Relaxed);
        self.insert(path, value, true);
    }

    fn insert(&self, path: &str, value: V, prefetched: bool) {
        let key = path::normalize(path);
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            hit_count: Arc::new(AtomicU64::new(0)),
            prefetched,
        };
        self.entries.insert(key.clone(), entry);
        debug!(path = %key, prefetched, "Cached listing");
    }

    /// Hits served by a single entry, without counting as a lookup
    pub fn hit_count(&self, path: &str) -> Option<u64> {
        self.entries
            .get(&path::normalize(path))
            .map(|entry| entry.hit_count.load(Ordering::Relaxed))
    }

    /// Age of a cached entry
    pub fn age(&self, path: &str) -> Option<Duration> {
        self.entries
            .get(&path::normalize(path))
            .map(|entry| self.clock.now().saturating_duration_since(entry.stored_at))
    }

    /// Record how long one fetch took
    pub fn record_load_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.load_time_total_us.fetch_add(micros, Ordering::Relaxed);
        self.load_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a single path
    pub fn invalidate(&self, path: &str) {
        let key = path::normalize(path);
        self.entries.invalidate(&key);
        debug!(path = %key, "Invalidated cached listing");
    }

    /// Drop every entry and reset all counters
    pub fn clear(&self) {
        self.entries.invalidate_all();
        for counter in [
            &self.hits,
            &self.misses,
            &self.preload_hits,
            &self.prefetch_used,
            &self.prefetch_writes,
            &self.load_time_total_us,
            &self.load_samples,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        debug!("Cleared listing cache");
    }

    /// Apply Moka's pending evictions and expirations
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }

    /// Compute statistics from the current entries and counters
    ///
    /// `navigation_pattern_accuracy` is left at 0; it belongs to the
    /// pattern tracker.
    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();

        let (entry_count, memory_usage) = self.entries.iter().fold(
            (0u64, 0u64),
            |(count, bytes), (key, entry)| {
                let size = key.len()
                    + entry.value.footprint()
                    + std::mem::size_of::<CacheEntry<V>>();
                (count + 1, bytes + size as u64)
            },
        );

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let prefetch_writes = self.prefetch_writes.load(Ordering::Relaxed);
        let samples = self.load_samples.load(Ordering::Relaxed);
        let average_load_time_ms = if samples == 0 {
            0.0
        } else {
            self.load_time_total_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
        };

        CacheStats {
            hit_rate: percent(hits, hits + misses),
            total_requests: hits + misses,
            total_hits: hits,
            total_misses: misses,
            memory_usage,
            entry_count,
            preload_hits: self.preload_hits.load(Ordering::Relaxed),
            background_prefetch_count: prefetch_writes,
            navigation_pattern_accuracy: 0.0,
            average_load_time_ms,
            cache_efficiency: percent(self.prefetch_used.load(Ordering::Relaxed), prefetch_writes),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.total_hits,
            misses = stats.total_misses,
            hit_rate = format!("{:.1}%", stats.hit_rate),
            entries = stats.entry_count,
            memory_bytes = stats.memory_usage,
            "Cache metrics"
        );
    }
}
