//! Cache statistics projection

use serde::Serialize;

/// Read-only snapshot of cache behaviour
///
/// Every field is derived on demand from the store counters and the
/// navigation pattern aggregates; nothing here is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Hits as a percentage of lookups
    pub hit_rate: f64,
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Estimated bytes held by live entries
    pub memory_usage: u64,
    pub entry_count: u64,
    /// Hits served by entries that were written by warming
    pub preload_hits: u64,
    /// Entries written by warming
    pub background_prefetch_count: u64,
    /// Percentage of transitions that followed an already-known pattern
    pub navigation_pattern_accuracy: f64,
    /// Mean fetch duration in milliseconds
    pub average_load_time_ms: f64,
    /// Percentage of warmed entries that were read at least once
    pub cache_efficiency: f64,
}

/// `part / whole` as a percentage, 0 when `whole` is 0
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}
