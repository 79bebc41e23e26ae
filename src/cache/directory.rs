//! Directory cache facade
//!
//! One listing store plus one navigation tracker sharing a path namespace
//! and a clock. This is the object the warming manager and the host UI
//! hold; there is no process-wide instance.

use std::sync::Arc;
use std::time::Duration;

use super::stats::CacheStats;
use super::store::{CacheStore, StoreConfig};
use crate::clock::{Clock, TokioClock};
use crate::listing::Footprint;
use crate::patterns::{NavigationPattern, NavigationPatternTracker};

pub struct DirectoryCache<V> {
    store: CacheStore<V>,
    patterns: NavigationPatternTracker,
    clock: Arc<dyn Clock>,
}

impl<V> DirectoryCache<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CacheStore::with_clock(config, Arc::clone(&clock)),
            patterns: NavigationPatternTracker::with_clock(Arc::clone(&clock)),
            clock,
        }
    }

    pub fn get(&self, path: &str) -> Option<V> {
        self.store.get(path)
    }

    pub fn set(&self, path: &str, value: V) {
        self.store.set(path, value);
    }

    pub fn get_navigation_patterns(&self, from_path: &str) -> Vec<NavigationPattern> {
        self.patterns.get_navigation_patterns(from_path)
    }

    pub fn get_preload_paths(&self, current_path: &str) -> Vec<String> {
        self.patterns.get_preload_paths(current_path)
    }

    pub fn record_transition(&self, from_path: &str, to_path: &str, elapsed: Duration) {
        self.patterns.record_transition(from_path, to_path, elapsed);
    }

    /// Store statistics combined with pattern accuracy
    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            navigation_pattern_accuracy: self.patterns.accuracy(),
            ..self.store.stats()
        }
    }

    pub fn store(&self) -> &CacheStore<V> {
        &self.store
    }

    pub fn patterns(&self) -> &NavigationPatternTracker {
        &self.patterns
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_stats_include_pattern_accuracy() {
        let cache: DirectoryCache<String> =
            DirectoryCache::with_clock(StoreConfig::unbounded(), Arc::new(ManualClock::new()));
        cache.record_transition("/a", "/b", Duration::ZERO);
        cache.record_transition("/a", "/b", Duration::ZERO);
        cache.set("/b", "listing".to_string());
        cache.get("/b");

        let stats = cache.get_stats();
        assert_eq!(stats.navigation_pattern_accuracy, 50.0);
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_separate_caches_are_isolated() {
        let first: DirectoryCache<String> = DirectoryCache::new(StoreConfig::unbounded());
        let second: DirectoryCache<String> = DirectoryCache::new(StoreConfig::unbounded());
        first.set("/a", "x".to_string());
        assert!(first.get("/a").is_some());
        assert!(second.get("/a").is_none());
    }
}
