//! Cache Warming Manager
//!
//! Prefetches folder listings ahead of navigation. Candidates are ranked by
//! reason and pattern strength, fetched with bounded concurrency, and
//! written to the shared [`DirectoryCache`]. Stopping (explicitly or when
//! the session budget runs out) discards queued work but lets running
//! fetches finish and cache their results. A reset also discards those
//! results.

use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::config::{ConfigError, WarmingConfig};
use super::fetch::Fetcher;
use super::session::{IdleEvent, SessionState, WarmingReport, WarmingStats};
use super::task::{Priority, QueuedTask, TaskOutcome, WarmReason};
use crate::cache::DirectoryCache;
use crate::listing::Footprint;
use crate::patterns::rank_patterns;
use crate::path;

/// Mutable scheduler state, only touched under the lock
struct SchedulerState<V> {
    session: SessionState,
    started_at: Option<Instant>,
    queue: BinaryHeap<QueuedTask<V>>,
    /// Paths currently in `queue`
    queued_paths: HashSet<String>,
    /// Paths with a running fetch
    in_flight: HashSet<String>,
    next_seq: u64,
    /// Bumped by `reset`; results from older generations are not cached
    generation: u64,
    session_fetched: u64,
    session_failed: u64,
    fetched_total: u64,
    failed_total: u64,
}

impl<V> SchedulerState<V> {
    fn new() -> Self {
        Self {
            session: SessionState::Idle,
            started_at: None,
            queue: BinaryHeap::new(),
            queued_paths: HashSet::new(),
            in_flight: HashSet::new(),
            next_seq: 0,
            generation: 0,
            session_fetched: 0,
            session_failed: 0,
            fetched_total: 0,
            failed_total: 0,
        }
    }

    /// Open a session if none is running
    fn begin(&mut self, now: Instant) {
        match self.session {
            SessionState::Idle | SessionState::Cancelled => {
                self.session = SessionState::Warming;
                self.started_at = Some(now);
                self.session_fetched = 0;
                self.session_failed = 0;
                info!("Warming session started");
            }
            SessionState::Draining => self.session = SessionState::Warming,
            SessionState::Warming => {}
        }
    }

    /// Discard every queued task; dropping them closes their channels
    fn cancel(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.queued_paths.clear();
        self.session = SessionState::Cancelled;
        dropped
    }

    /// Move to `Draining` or `Idle` once the queue empties
    fn settle(&mut self, now: Instant) {
        if !self.queue.is_empty() {
            return;
        }
        if self.in_flight.is_empty() {
            if self.session != SessionState::Idle {
                let elapsed = self
                    .started_at
                    .map(|start| now.saturating_duration_since(start))
                    .unwrap_or_default();
                info!(
                    fetched = self.session_fetched,
                    failed = self.session_failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Warming session finished"
                );
            }
            self.session = SessionState::Idle;
            self.started_at = None;
        } else if self.session == SessionState::Warming {
            self.session = SessionState::Draining;
        }
    }
}

struct Shared<V> {
    config: WarmingConfig,
    cache: Arc<DirectoryCache<V>>,
    state: Mutex<SchedulerState<V>>,
    /// Time of the last user activity
    activity: watch::Sender<Instant>,
    idle_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Shared<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    fn state(&self) -> MutexGuard<'_, SchedulerState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> Instant {
        self.cache.clock().now()
    }

    /// Start queued tasks until every slot is taken
    fn pump(self: &Arc<Self>) {
        let now = self.now();
        let store = self.cache.store();
        let mut state = self.state();

        if matches!(state.session, SessionState::Warming | SessionState::Draining) {
            let elapsed = state
                .started_at
                .map(|start| now.saturating_duration_since(start))
                .unwrap_or_default();
            if elapsed > self.config.max_warming_time {
                let dropped = state.cancel();
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    dropped = dropped,
                    "Warming budget exhausted, no new fetches will start"
                );
            }
        }

        while state.session == SessionState::Warming
            && state.in_flight.len() < self.config.max_concurrent_requests
        {
            let Some(task) = state.queue.pop() else {
                break;
            };
            state.queued_paths.remove(&task.path);
            if store.contains(&task.path) {
                trace!(path = %task.path, "Cached while queued, skipping");
                let _ = task.done.send(TaskOutcome::AlreadyCached);
                continue;
            }
            state.in_flight.insert(task.path.clone());
            debug!(
                path = %task.path,
                reason = ?task.priority.reason,
                in_flight = state.in_flight.len(),
                "Dispatching warming fetch"
            );
            self.spawn_fetch(task);
        }

        state.settle(now);
    }

    fn spawn_fetch(self: &Arc<Self>, task: QueuedTask<V>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let QueuedTask {
                path,
                priority,
                generation,
                fetcher,
                done,
                ..
            } = task;
            let mut slot = InFlight {
                shared: Arc::clone(&shared),
                path: path.clone(),
                outcome: None,
            };

            let started = shared.now();
            let outcome = match fetcher.fetch(&path).await {
                Ok(value) => {
                    let elapsed = shared.now().saturating_duration_since(started);
                    if shared.store_if_current(generation, &path, value, true) {
                        shared.cache.store().record_load_time(elapsed);
                        debug!(
                            path = %path,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Warmed listing"
                        );
                        TaskOutcome::Fetched
                    } else {
                        debug!(path = %path, "Discarding listing fetched before a reset");
                        TaskOutcome::Discarded
                    }
                }
                Err(e) => {
                    warn!(
                        path = %path,
                        reason = ?priority.reason,
                        error = %e,
                        "Warming fetch failed, skipping path"
                    );
                    TaskOutcome::Failed
                }
            };

            slot.outcome = Some(outcome);
            drop(slot);
            let _ = done.send(outcome);
        });
    }

    /// Release a fetch slot and start whatever is next
    fn finish(self: &Arc<Self>, path: &str, outcome: Option<TaskOutcome>) {
        {
            let mut state = self.state();
            state.in_flight.remove(path);
            match outcome {
                Some(TaskOutcome::Fetched) => {
                    state.session_fetched += 1;
                    state.fetched_total += 1;
                }
                Some(TaskOutcome::AlreadyCached) | Some(TaskOutcome::Discarded) => {}
                // A fetch that panicked counts as failed
                Some(TaskOutcome::Failed) | None => {
                    state.session_failed += 1;
                    state.failed_total += 1;
                }
            }
        }
        self.pump();
    }
}

impl<V> Shared<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    /// Write `value` unless the cache was reset since `generation`
    ///
    /// Checked under the scheduler lock, which `reset` also holds while it
    /// clears the store.
    fn store_if_current(&self, generation: u64, path: &str, value: V, prefetched: bool) -> bool {
        let state = self.state();
        if state.generation != generation {
            return false;
        }
        let store = self.cache.store();
        if prefetched {
            store.set_prefetched(path, value);
        } else {
            store.set(path, value);
        }
        true
    }
}

/// Runs `pump` when dropped, including when the enqueueing call is
/// cancelled before it dispatches
struct PumpOnDrop<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    shared: Arc<Shared<V>>,
}

impl<V> Drop for PumpOnDrop<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Spawning needs a runtime; none is left during shutdown
        if tokio::runtime::Handle::try_current().is_ok() {
            self.shared.pump();
        }
    }
}

/// Holds a path's in-flight slot until the fetch ends, even by panic
struct InFlight<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    shared: Arc<Shared<V>>,
    path: String,
    outcome: Option<TaskOutcome>,
}

impl<V> Drop for InFlight<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.finish(&self.path, self.outcome);
    }
}

/// Predictive warming scheduler
///
/// Cheap to clone; clones share one queue, one session and one cache.
/// Fetches run as tokio tasks, so warming calls must be made from within a
/// tokio runtime.
pub struct WarmingManager<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for WarmingManager<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> WarmingManager<V>
where
    V: Clone + Footprint + Send + Sync + 'static,
{
    /// Create a manager that warms into `cache`
    ///
    /// Time is read from the cache's clock.
    pub fn new(config: WarmingConfig, cache: Arc<DirectoryCache<V>>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (activity, _) = watch::channel(cache.clock().now());
        info!(
            max_concurrent = config.max_concurrent_requests,
            priority_threshold = config.priority_threshold,
            idle_ms = config.idle_time_required.as_millis() as u64,
            budget_ms = config.max_warming_time.as_millis() as u64,
            "Warming manager initialized"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                cache,
                state: Mutex::new(SchedulerState::new()),
                activity,
                idle_monitor: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.shared.config
    }

    pub fn cache(&self) -> &Arc<DirectoryCache<V>> {
        &self.shared.cache
    }

    /// Signal real user interaction; resets the idle clock
    pub fn record_activity(&self) {
        self.shared.activity.send_replace(self.shared.now());
        trace!("Recorded user activity");
    }

    /// Warm `paths`, skipping any already cached or already being warmed
    ///
    /// Resolves once every task this call enqueued has settled. Individual
    /// fetch failures are logged and counted, never returned.
    pub async fn warm_paths<I, S, F>(&self, paths: I, fetcher: F, reason: WarmReason) -> WarmingReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fetcher<V> + 'static,
    {
        let candidates: Vec<(String, f64)> = paths.into_iter().map(|p| (p.into(), 0.0)).collect();
        self.warm_candidates(candidates, Arc::new(fetcher), reason).await
    }

    /// Warm the targets of learned patterns from `from_path`, strongest first
    pub async fn warm_from_patterns<F>(&self, from_path: &str, fetcher: F) -> WarmingReport
    where
        F: Fetcher<V> + 'static,
    {
        let patterns = self.shared.cache.get_navigation_patterns(from_path);
        let candidates: Vec<(String, f64)> = rank_patterns(&patterns, self.shared.now())
            .into_iter()
            .map(|(p, score)| (p, score / (1.0 + score)))
            .collect();
        debug!(from = %from_path, candidates = candidates.len(), "Warming from patterns");
        self.warm_candidates(candidates, Arc::new(fetcher), WarmReason::Pattern)
            .await
    }

    /// Warm folders sharing `current_path`'s parent
    ///
    /// The current folder and its ancestors are never warmed here.
    pub async fn warm_siblings<F>(&self, current_path: &str, fetcher: F) -> WarmingReport
    where
        F: Fetcher<V> + 'static,
    {
        let current = path::normalize(current_path);
        let depth = path::depth(&current);
        let parent = path::parent(&current);
        let candidates: Vec<(String, f64)> = self
            .shared
            .cache
            .get_preload_paths(&current)
            .into_iter()
            .map(|p| path::normalize(&p))
            .filter(|p| {
                path::depth(p) == depth
                    && path::parent(p) == parent
                    && *p != current
                    && !path::is_ancestor(p, &current)
            })
            .map(|p| (p, 0.0))
            .collect();
        debug!(current = %current, candidates = candidates.len(), "Warming siblings");
        self.warm_candidates(candidates, Arc::new(fetcher), WarmReason::Sibling)
            .await
    }

    async fn warm_candidates(
        &self,
        candidates: Vec<(String, f64)>,
        fetcher: Arc<dyn Fetcher<V>>,
        reason: WarmReason,
    ) -> WarmingReport {
        let mut report = WarmingReport {
            requested: candidates.len(),
            ..WarmingReport::default()
        };
        let mut pending = Vec::new();

        {
            let now = self.shared.now();
            let store = self.shared.cache.store();
            let mut state = self.shared.state();

            for (raw, pattern_score) in candidates {
                let path = path::normalize(&raw);
                if store.contains(&path) {
                    trace!(path = %path, "Already cached, skipping");
                    report.skipped_cached += 1;
                    continue;
                }
                if state.in_flight.contains(&path) || state.queued_paths.contains(&path) {
                    trace!(path = %path, "Already being warmed, skipping");
                    report.skipped_duplicate += 1;
                    continue;
                }
                let priority = Priority::new(reason, pattern_score);
                if priority.score() < self.shared.config.priority_threshold {
                    report.below_threshold += 1;
                    continue;
                }

                state.begin(now);
                let (done, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queued_paths.insert(path.clone());
                let generation = state.generation;
                state.queue.push(QueuedTask {
                    path,
                    priority,
                    seq,
                    generation,
                    fetcher: Arc::clone(&fetcher),
                    done,
                });
                pending.push(rx);
            }
            report.scheduled = pending.len();
        }

        if pending.is_empty() {
            return report;
        }
        debug!(reason = ?reason, scheduled = report.scheduled, "Enqueued warming tasks");

        // Let calls issued alongside this one enqueue before the first
        // dispatch, so the best candidate takes the first free slot
        let dispatch = PumpOnDrop {
            shared: Arc::clone(&self.shared),
        };
        tokio::task::yield_now().await;
        drop(dispatch);

        for rx in pending {
            match rx.await {
                Ok(TaskOutcome::Fetched) => report.fetched += 1,
                Ok(TaskOutcome::Failed) => report.failed += 1,
                Ok(TaskOutcome::AlreadyCached) => report.skipped_cached += 1,
                Ok(TaskOutcome::Discarded) | Err(_) => report.dropped += 1,
            }
        }

        debug!(
            reason = ?reason,
            fetched = report.fetched,
            failed = report.failed,
            dropped = report.dropped,
            "Warming call settled"
        );
        report
    }

    /// Stop admitting work: queued tasks are dropped, running fetches finish
    pub fn stop_warming(&self) {
        let now = self.shared.now();
        let mut state = self.shared.state();
        if state.session == SessionState::Idle {
            return;
        }
        if state.session == SessionState::Cancelled && state.queue.is_empty() {
            return;
        }
        let dropped = state.cancel();
        info!(
            dropped = dropped,
            in_flight = state.in_flight.len(),
            "Warming stopped"
        );
        state.settle(now);
    }

    /// Stop warming and empty the cache
    ///
    /// Fetches still running finish, but their results are not cached.
    /// Used when the listing source changes.
    pub fn reset(&self) {
        let now = self.shared.now();
        let mut state = self.shared.state();
        let dropped = if state.session == SessionState::Idle {
            0
        } else {
            state.cancel()
        };
        state.generation += 1;
        self.shared.cache.store().clear();
        info!(
            generation = state.generation,
            dropped = dropped,
            in_flight = state.in_flight.len(),
            "Warming reset, cache cleared"
        );
        state.settle(now);
    }

    /// Current cache generation, for writes made outside the scheduler
    pub fn generation(&self) -> u64 {
        self.shared.state().generation
    }

    /// Cache a foreground load unless a `reset` happened since `generation`
    pub fn cache_if_current(&self, generation: u64, path: &str, value: V) -> bool {
        self.shared.store_if_current(generation, path, value, false)
    }

    /// Whether any task of the current session is queued or running
    pub fn is_warming_active(&self) -> bool {
        let state = self.shared.state();
        !state.queue.is_empty() || !state.in_flight.is_empty()
    }

    pub fn get_warming_stats(&self) -> WarmingStats {
        let now = self.shared.now();
        let last_activity = *self.shared.activity.borrow();
        let cache = self.shared.cache.get_stats();
        let state = self.shared.state();
        WarmingStats {
            is_warming: matches!(state.session, SessionState::Warming | SessionState::Draining),
            state: state.session,
            last_activity,
            idle_time: now.saturating_duration_since(last_activity),
            session_elapsed: state
                .started_at
                .map(|start| now.saturating_duration_since(start)),
            queued: state.queue.len(),
            in_flight: state.in_flight.len(),
            fetched_total: state.fetched_total,
            failed_total: state.failed_total,
            cache,
        }
    }

    /// Start the idle timer
    ///
    /// The returned channel receives one [`IdleEvent`] each time the user
    /// has been inactive for `idle_time_required`; `record_activity` re-arms
    /// it. What to warm on idle is up to the receiver. Calling this again
    /// replaces the previous timer. Uses tokio timers, so it should be paired
    /// with a tokio-backed clock.
    pub fn start_idle_monitor(&self) -> mpsc::Receiver<IdleEvent> {
        let (tx, rx) = mpsc::channel(1);
        let mut activity = self.shared.activity.subscribe();
        let idle_required = self.shared.config.idle_time_required;
        let cache = Arc::clone(&self.shared.cache);

        let handle = tokio::spawn(async move {
            loop {
                let last = *activity.borrow_and_update();
                let fired = tokio::select! {
                    _ = tokio::time::sleep_until(last + idle_required) => true,
                    changed = activity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        false
                    }
                };
                if !fired {
                    continue;
                }

                let idle_for = cache.clock().now().saturating_duration_since(last);
                debug!(idle_ms = idle_for.as_millis() as u64, "User idle");
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    tx.try_send(IdleEvent { idle_for })
                {
                    break;
                }
                // Fire once per quiet period
                if activity.changed().await.is_err() {
                    break;
                }
            }
            trace!("Idle monitor stopped");
        });

        let mut slot = self
            .shared
            .idle_monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        rx
    }

    /// Stop warming and release the idle timer
    pub fn destroy(&self) {
        self.stop_warming();
        let handle = self
            .shared
            .idle_monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        debug!("Warming manager destroyed");
    }

    /// How long the user has been idle
    pub fn idle_time(&self) -> Duration {
        let last = *self.shared.activity.borrow();
        self.shared.now().saturating_duration_since(last)
    }
}
