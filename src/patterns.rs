//! Navigation Pattern Tracking
//!
//! Learns which folders users open after a given folder and proposes
//! candidates for warming.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::clock::{Clock, TokioClock};
use crate::path;

/// Age at which a pattern's recency weight halves
const RECENCY_SCALE: Duration = Duration::from_secs(600);

/// Learned statistic for one `from -> to` transition
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationPattern {
    pub from_path: String,
    pub to_path: String,
    /// Times this transition was observed
    pub frequency: u64,
    /// When it was last observed
    pub last_access: Instant,
    /// Running mean of the time spent before taking it
    pub average_time: Duration,
}

/// Ranking score for a pattern: frequency weighted by recency
///
/// A fresh pattern keeps its full frequency; one last seen
/// [`RECENCY_SCALE`] ago counts for half, so a frequent but stale pattern
/// can drop below a recent one.
pub fn pattern_score(pattern: &NavigationPattern, now: Instant) -> f64 {
    let age = now.saturating_duration_since(pattern.last_access).as_secs_f64();
    let recency = 1.0 / (1.0 + age / RECENCY_SCALE.as_secs_f64());
    pattern.frequency as f64 * recency
}

/// Target paths ordered by descending score, ties kept in input order
pub fn rank_patterns(patterns: &[NavigationPattern], now: Instant) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = patterns
        .iter()
        .map(|p| (p.to_path.clone(), pattern_score(p, now)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[derive(Default)]
struct TrackerState {
    /// Patterns per origin, in first-seen order
    by_origin: HashMap<String, Vec<NavigationPattern>>,
    /// Every folder path seen or registered
    known_paths: BTreeSet<String>,
    transitions: u64,
    /// Transitions whose target was already a pattern of the origin
    predicted: u64,
}

/// Records folder-to-folder transitions
pub struct NavigationPatternTracker {
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
}

impl NavigationPatternTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that the user went from `from_path` to `to_path` after `elapsed`
    pub fn record_transition(&self, from_path: &str, to_path: &str, elapsed: Duration) {
        let from = path::normalize(from_path);
        let to = path::normalize(to_path);
        if from == to {
            trace!(path = %from, "Ignoring self transition");
            return;
        }

        let now = self.clock.now();
        let mut state = self.state();
        state.transitions += 1;
        state.known_paths.insert(from.clone());
        state.known_paths.insert(to.clone());

        let patterns = state.by_origin.entry(from.clone()).or_default();
        let hit = match patterns.iter_mut().find(|p| p.to_path == to) {
            Some(pattern) => {
                pattern.frequency += 1;
                pattern.last_access = now;
                pattern.average_time =
                    running_mean(pattern.average_time, elapsed, pattern.frequency);
                true
            }
            None => {
                patterns.push(NavigationPattern {
                    from_path: from.clone(),
                    to_path: to.clone(),
                    frequency: 1,
                    last_access: now,
                    average_time: elapsed,
                });
                false
            }
        };
        if hit {
            state.predicted += 1;
        }
        trace!(from = %from, to = %to, predicted = hit, "Recorded transition");
    }

    /// All patterns leaving `from_path`, unranked
    pub fn get_navigation_patterns(&self, from_path: &str) -> Vec<NavigationPattern> {
        self.state()
            .by_origin
            .get(&path::normalize(from_path))
            .cloned()
            .unwrap_or_default()
    }

    /// Candidate paths worth preloading around `current_path`
    ///
    /// A superset: the parent, known folders next to the current one, and
    /// folders previously opened from it. Callers filter structurally.
    pub fn get_preload_paths(&self, current_path: &str) -> Vec<String> {
        let current = path::normalize(current_path);
        let parent = path::parent(&current);
        let state = self.state();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut push = |p: &str| {
            if p != current && seen.insert(p.to_string()) {
                candidates.push(p.to_string());
            }
        };

        if let Some(parent) = &parent {
            push(parent.as_str());
        }

        let depth = path::depth(&current);
        for known in &state.known_paths {
            if path::depth(known) == depth && path::parent(known) == parent {
                push(known.as_str());
            }
        }

        if let Some(patterns) = state.by_origin.get(&current) {
            for pattern in patterns {
                push(pattern.to_path.as_str());
            }
        }

        candidates
    }

    /// Register folders that exist, e.g. the subfolders of a fetched listing
    pub fn remember_paths<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for p in paths {
            state.known_paths.insert(path::normalize(p.as_ref()));
        }
    }

    /// Top `limit` target paths from `from_path`
    pub fn likely_next_paths(&self, from_path: &str, limit: usize) -> Vec<String> {
        let patterns = self.get_navigation_patterns(from_path);
        rank_patterns(&patterns, self.clock.now())
            .into_iter()
            .take(limit)
            .map(|(p, _)| p)
            .collect()
    }

    /// Percentage of transitions that followed an already-known pattern
    pub fn accuracy(&self) -> f64 {
        let state = self.state();
        crate::cache::stats::percent(state.predicted, state.transitions)
    }

    /// Number of distinct patterns
    pub fn pattern_count(&self) -> usize {
        self.state().by_origin.values().map(Vec::len).sum()
    }
}

impl Default for NavigationPatternTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn running_mean(average: Duration, sample: Duration, count: u64) -> Duration {
    let count = u128::from(count.max(1));
    let nanos = (average.as_nanos() * (count - 1) + sample.as_nanos()) / count;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
