//! Warming session state and reporting types

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheStats;

/// Lifecycle of a warming session
///
/// `Idle -> Warming -> (Draining | Cancelled) -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing queued or running
    Idle,
    /// Tasks are queued and being dispatched
    Warming,
    /// Every task is dispatched; waiting for fetches to settle
    Draining,
    /// Stopped; no new dispatch, running fetches finish
    Cancelled,
}

/// Snapshot returned by `get_warming_stats`
#[derive(Debug, Clone)]
pub struct WarmingStats {
    pub is_warming: bool,
    pub state: SessionState,
    pub last_activity: Instant,
    /// Time since the last recorded activity
    pub idle_time: Duration,
    /// Age of the current session, if one is open
    pub session_elapsed: Option<Duration>,
    pub queued: usize,
    pub in_flight: usize,
    /// Successful warming fetches since construction
    pub fetched_total: u64,
    /// Failed warming fetches since construction
    pub failed_total: u64,
    pub cache: CacheStats,
}

/// Outcome of one warming call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmingReport {
    /// Paths passed in
    pub requested: usize,
    /// Already cached, never fetched
    pub skipped_cached: usize,
    /// Already queued or in flight elsewhere
    pub skipped_duplicate: usize,
    /// Priority below the configured threshold
    pub below_threshold: usize,
    /// Enqueued by this call
    pub scheduled: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Discarded before dispatch by a stop or budget expiry
    pub dropped: usize,
}

/// Emitted by the idle monitor after a quiet period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEvent {
    /// How long the user had been idle when the event fired
    pub idle_for: Duration,
}
