//! Warming task priorities and queue ordering

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::fetch::Fetcher;

/// Why a path is being warmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmReason {
    /// Explicit request from the UI
    #[default]
    Manual,
    /// Learned navigation pattern
    Pattern,
    /// Folder next to the current one
    Sibling,
    /// Background work during a quiet period
    Idle,
}

impl WarmReason {
    /// Rank used for ordering, higher runs first
    pub fn rank(self) -> u8 {
        match self {
            WarmReason::Manual => 4,
            WarmReason::Pattern => 3,
            WarmReason::Sibling => 2,
            WarmReason::Idle => 1,
        }
    }
}

/// Scheduling priority: reason first, then pattern score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priority {
    pub reason: WarmReason,
    /// Normalized pattern strength in `[0, 1)`
    pub pattern_score: f64,
}

impl Priority {
    pub fn new(reason: WarmReason, pattern_score: f64) -> Self {
        let pattern_score = if pattern_score.is_finite() {
            pattern_score.clamp(0.0, 0.999)
        } else {
            0.0
        };
        Self {
            reason,
            pattern_score,
        }
    }

    /// Scalar score compared against the priority threshold
    ///
    /// The reason rank is the integer part, so reason ordering always wins
    /// over pattern strength.
    pub fn score(&self) -> f64 {
        f64::from(self.reason.rank()) + self.pattern_score
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.reason
            .rank()
            .cmp(&other.reason.rank())
            .then_with(|| self.pattern_score.total_cmp(&other.pattern_score))
    }
}

/// How a dispatched task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Fetched,
    Failed,
    /// Cached by someone else while it waited in the queue
    AlreadyCached,
    /// Fetched after a reset; the result was thrown away
    Discarded,
}

/// A path waiting for a free fetch slot
pub(crate) struct QueuedTask<V> {
    pub path: String,
    pub priority: Priority,
    /// Enqueue order, breaks priority ties
    pub seq: u64,
    /// Cache generation at enqueue time
    pub generation: u64,
    pub fetcher: Arc<dyn Fetcher<V>>,
    /// Dropped unsent when the task is discarded
    pub done: oneshot::Sender<TaskOutcome>,
}

impl<V> PartialEq for QueuedTask<V> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<V> Eq for QueuedTask<V> {}

impl<V> PartialOrd for QueuedTask<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for QueuedTask<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, then older seq
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn task(path: &str, priority: Priority, seq: u64) -> QueuedTask<String> {
        let fetcher: Arc<dyn Fetcher<String>> =
            Arc::new(|p: String| async move { Ok::<_, anyhow::Error>(p) });
        let (done, _) = oneshot::channel();
        QueuedTask {
            path: path.to_string(),
            priority,
            seq,
            generation: 0,
            fetcher,
            done,
        }
    }

    #[test]
    fn test_reason_ordering() {
        assert!(WarmReason::Manual.rank() > WarmReason::Pattern.rank());
        assert!(WarmReason::Pattern.rank() > WarmReason::Sibling.rank());
        assert!(WarmReason::Sibling.rank() > WarmReason::Idle.rank());
        assert_eq!(WarmReason::default(), WarmReason::Manual);
    }

    #[test]
    fn test_reason_beats_pattern_score() {
        let strong_idle = Priority::new(WarmReason::Idle, 0.99);
        let weak_manual = Priority::new(WarmReason::Manual, 0.0);
        assert!(weak_manual > strong_idle);
        assert!(weak_manual.score() > strong_idle.score());
    }

    #[test]
    fn test_pattern_score_is_clamped() {
        assert_eq!(Priority::new(WarmReason::Pattern, 5.0).pattern_score, 0.999);
        assert_eq!(Priority::new(WarmReason::Pattern, f64::NAN).pattern_score, 0.0);
    }

    #[test]
    fn test_heap_pops_priority_then_insertion_order() {
        let mut heap = BinaryHeap::new();
        heap.push(task("/idle", Priority::new(WarmReason::Idle, 0.0), 0));
        heap.push(task("/m1", Priority::new(WarmReason::Manual, 0.0), 1));
        heap.push(task("/m2", Priority::new(WarmReason::Manual, 0.0), 2));
        heap.push(task("/p", Priority::new(WarmReason::Pattern, 0.5), 3));

        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|t| t.path)).collect();
        assert_eq!(order, vec!["/m1", "/m2", "/p", "/idle"]);
    }

    #[test]
    fn test_reason_serde() {
        let reason: WarmReason = serde_json::from_str(r#""sibling""#).unwrap();
        assert_eq!(reason, WarmReason::Sibling);
    }
}
