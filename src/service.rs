//! Prefetch Service - ties the listing cache, warming and a backend together
//!
//! Owns the directory cache and warming manager for one connected bucket.
//! Navigation reads through the cache, feeds the pattern tracker, and kicks
//! off background warming of likely next folders.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::b2::B2Client;
use crate::cache::{CacheStats, DirectoryCache};
use crate::config::DaemonConfig;
use crate::listing::DirectoryListing;
use crate::path;
use crate::warming::{
    ConfigError, Fetcher, IdleEvent, SessionState, WarmReason, WarmingConfig, WarmingManager,
    WarmingReport,
};

/// Listing source installed by `connect`
struct Backend {
    /// Bucket name, or a caller-chosen label
    label: String,
    fetcher: Arc<dyn Fetcher<DirectoryListing>>,
}

/// Where the user currently is
struct Position {
    path: String,
    since: Instant,
}

/// Status snapshot for the IPC `getStatus` command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub connected: Option<String>,
    pub current_path: Option<String>,
    pub is_warming: bool,
    pub state: SessionState,
    pub idle_ms: u64,
    pub queued: usize,
    pub in_flight: usize,
    pub fetched_total: u64,
    pub failed_total: u64,
    pub pattern_count: usize,
    pub cache: CacheStats,
}

pub struct PrefetchService {
    cache: Arc<DirectoryCache<DirectoryListing>>,
    warming: WarmingManager<DirectoryListing>,
    backend: RwLock<Option<Backend>>,
    position: Mutex<Option<Position>>,
    /// Paths warmed per idle event
    idle_preload_limit: usize,
}

impl PrefetchService {
    pub fn new(config: &DaemonConfig) -> Result<Self, ConfigError> {
        let cache = Arc::new(DirectoryCache::new(config.store));
        Self::with_cache(config.warming.clone(), cache, config.idle_preload_limit)
    }

    pub fn with_cache(
        warming: WarmingConfig,
        cache: Arc<DirectoryCache<DirectoryListing>>,
        idle_preload_limit: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            warming: WarmingManager::new(warming, Arc::clone(&cache))?,
            cache,
            backend: RwLock::new(None),
            position: Mutex::new(None),
            idle_preload_limit,
        })
    }

    pub fn cache(&self) -> &Arc<DirectoryCache<DirectoryListing>> {
        &self.cache
    }

    pub fn warming(&self) -> &WarmingManager<DirectoryListing> {
        &self.warming
    }

    /// Authorize against B2 and list from `bucket_name` from now on
    pub async fn connect(&self, bucket_name: &str, key_id: &str, key: &str) -> Result<()> {
        let client = B2Client::authorize(key_id, key, bucket_name).await?;
        let fetcher = move |folder: String| {
            let client = client.clone();
            async move { client.list_folder(&folder).await.map_err(anyhow::Error::from) }
        };
        self.attach(bucket_name, Arc::new(fetcher)).await;
        Ok(())
    }

    /// Install a listing source, replacing any previous one
    ///
    /// Warming is stopped and the cache emptied. Fetches from the old
    /// source that are still running are not cached when they finish.
    pub async fn attach(&self, label: &str, fetcher: Arc<dyn Fetcher<DirectoryListing>>) {
        let mut backend = self.backend.write().await;
        if let Some(previous) = backend.as_ref() {
            info!(previous = %previous.label, next = %label, "Switching listing backend");
            self.warming.reset();
        }
        *backend = Some(Backend {
            label: label.to_string(),
            fetcher,
        });
        *self.position() = None;
        info!(backend = %label, "Listing backend connected");
    }

    /// Fetcher over the current backend that also learns subfolder paths
    async fn fetcher(&self) -> Result<impl Fetcher<DirectoryListing> + Clone + 'static> {
        let backend = self
            .backend
            .read()
            .await
            .as_ref()
            .map(|b| Arc::clone(&b.fetcher))
            .ok_or_else(|| anyhow!("Not connected to a bucket"))?;
        let cache = Arc::clone(&self.cache);

        Ok(move |folder: String| {
            let backend = Arc::clone(&backend);
            let cache = Arc::clone(&cache);
            async move {
                let listing = backend.fetch(&folder).await?;
                cache.patterns().remember_paths(listing.folder_paths());
                Ok::<_, anyhow::Error>(listing)
            }
        })
    }

    fn position(&self) -> std::sync::MutexGuard<'_, Option<Position>> {
        self.position.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open `to_path`: cached listing if present, otherwise a backend fetch
    ///
    /// Records the move from `from_path` (or the previous position) and
    /// starts warming the folders likely to be opened next.
    pub async fn navigate(
        &self,
        from_path: Option<&str>,
        to_path: &str,
        elapsed: Option<Duration>,
    ) -> Result<DirectoryListing> {
        // Read before the backend so a concurrent switch is detected
        let generation = self.warming.generation();
        let fetcher = self.fetcher().await?;
        let to = path::normalize(to_path);
        let now = self.cache.clock().now();
        self.warming.record_activity();

        let previous = self.position().replace(Position {
            path: to.clone(),
            since: now,
        });
        let from = from_path
            .map(path::normalize)
            .or_else(|| previous.as_ref().map(|p| p.path.clone()));
        if let Some(from) = from.filter(|f| *f != to) {
            let elapsed = elapsed
                .or_else(|| previous.map(|p| now.saturating_duration_since(p.since)))
                .unwrap_or_default();
            self.cache.record_transition(&from, &to, elapsed);
        }

        let listing = match self.cache.get(&to) {
            Some(listing) => listing,
            None => {
                let started = self.cache.clock().now();
                let listing = fetcher.fetch(&to).await?;
                let store = self.cache.store();
                store.record_load_time(self.cache.clock().now().saturating_duration_since(started));
                if !self.warming.cache_if_current(generation, &to, listing.clone()) {
                    debug!(path = %to, "Backend changed during fetch, listing not cached");
                }
                listing
            }
        };

        let warming = self.warming.clone();
        tokio::spawn(async move {
            let (patterns, siblings) = tokio::join!(
                warming.warm_from_patterns(&to, fetcher.clone()),
                warming.warm_siblings(&to, fetcher),
            );
            debug!(
                path = %to,
                pattern_fetched = patterns.fetched,
                sibling_fetched = siblings.fetched,
                "Background warming after navigation settled"
            );
        });

        Ok(listing)
    }

    pub async fn warm_paths(&self, paths: Vec<String>, reason: WarmReason) -> Result<WarmingReport> {
        let fetcher = self.fetcher().await?;
        Ok(self.warming.warm_paths(paths, fetcher, reason).await)
    }

    pub async fn warm_from_patterns(&self, from_path: &str) -> Result<WarmingReport> {
        let fetcher = self.fetcher().await?;
        Ok(self.warming.warm_from_patterns(from_path, fetcher).await)
    }

    pub async fn warm_siblings(&self, current_path: &str) -> Result<WarmingReport> {
        let fetcher = self.fetcher().await?;
        Ok(self.warming.warm_siblings(current_path, fetcher).await)
    }

    pub fn record_activity(&self) {
        self.warming.record_activity();
    }

    pub fn stop_warming(&self) {
        self.warming.stop_warming();
    }

    pub fn invalidate(&self, path: &str) {
        self.cache.store().invalidate(path);
    }

    /// Warm the most likely next folders from the current position
    ///
    /// Returns `None` when there is nothing to warm.
    pub async fn handle_idle(&self, event: IdleEvent) -> Option<WarmingReport> {
        let current = self.position().as_ref().map(|p| p.path.clone())?;
        let paths = self
            .cache
            .patterns()
            .likely_next_paths(&current, self.idle_preload_limit);
        if paths.is_empty() {
            return None;
        }
        let fetcher = match self.fetcher().await {
            Ok(fetcher) => fetcher,
            Err(e) => {
                debug!(error = %e, "Skipping idle warming");
                return None;
            }
        };

        debug!(
            path = %current,
            idle_ms = event.idle_for.as_millis() as u64,
            candidates = paths.len(),
            "Idle warming"
        );
        Some(self.warming.warm_paths(paths, fetcher, WarmReason::Idle).await)
    }

    /// Start the idle timer and warm on every idle event
    ///
    /// The task ends once `shutdown` releases the timer.
    pub fn spawn_idle_warming(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.warming.start_idle_monitor();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(report) = service.handle_idle(event).await {
                    if report.failed > 0 {
                        warn!(failed = report.failed, "Some idle warming fetches failed");
                    }
                }
            }
            debug!("Idle warming loop stopped");
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        let connected = self.backend.read().await.as_ref().map(|b| b.label.clone());
        let stats = self.warming.get_warming_stats();
        ServiceStatus {
            connected,
            current_path: self.position().as_ref().map(|p| p.path.clone()),
            is_warming: stats.is_warming,
            state: stats.state,
            idle_ms: stats.idle_time.as_millis() as u64,
            queued: stats.queued,
            in_flight: stats.in_flight,
            fetched_total: stats.fetched_total,
            failed_total: stats.failed_total,
            pattern_count: self.cache.patterns().pattern_count(),
            cache: stats.cache,
        }
    }

    /// Stop warming, release the idle timer and log final cache metrics
    pub fn shutdown(&self) {
        self.warming.destroy();
        self.cache.store().log_metrics();
        info!("Prefetch service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoreConfig;
    use crate::listing::{EntryKind, ListingEntry};
    use std::collections::HashMap;

    fn folder_entry(name: &str) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            kind: EntryKind::Folder,
            size: 0,
            modified_ms: 0,
        }
    }

    /// In-memory bucket: folder path to subfolder names, plus fetch counts
    struct FakeBucket {
        tree: HashMap<String, Vec<&'static str>>,
        fetches: Mutex<Vec<String>>,
    }

    impl FakeBucket {
        fn fetch_count(&self, path: &str) -> usize {
            self.fetches.lock().unwrap().iter().filter(|p| *p == path).count()
        }
    }

    fn fake_fetcher(bucket: Arc<FakeBucket>) -> Arc<dyn Fetcher<DirectoryListing>> {
        Arc::new(move |folder: String| {
            let bucket = Arc::clone(&bucket);
            async move {
                bucket.fetches.lock().unwrap().push(folder.clone());
                let children = bucket
                    .tree
                    .get(&folder)
                    .ok_or_else(|| anyhow!("no such folder: {}", folder))?;
                let entries = children.iter().map(|c| folder_entry(c)).collect();
                Ok::<_, anyhow::Error>(DirectoryListing::new(folder.clone(), entries))
            }
        })
    }

    /// Lists every folder as a single subfolder named `label`, after `delay`
    fn labelled_fetcher(label: &'static str, delay: Duration) -> Arc<dyn Fetcher<DirectoryListing>> {
        Arc::new(move |folder: String| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(DirectoryListing::new(folder, vec![folder_entry(label)]))
        })
    }

    fn bucket() -> Arc<FakeBucket> {
        let mut tree = HashMap::new();
        tree.insert("/".to_string(), vec!["a", "b"]);
        tree.insert("/a".to_string(), vec!["x"]);
        tree.insert("/b".to_string(), vec![]);
        tree.insert("/a/x".to_string(), vec![]);
        Arc::new(FakeBucket {
            tree,
            fetches: Mutex::new(Vec::new()),
        })
    }

    fn service() -> PrefetchService {
        let config = WarmingConfig {
            max_concurrent_requests: 2,
            priority_threshold: 0.0,
            idle_time_required: Duration::from_millis(100),
            max_warming_time: Duration::from_secs(5),
        };
        let cache = Arc::new(DirectoryCache::new(StoreConfig::default()));
        PrefetchService::with_cache(config, cache, 3).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_requires_backend() {
        let service = service();
        let err = service.navigate(None, "/a", None).await.unwrap_err();
        assert!(err.to_string().contains("Not connected"));
        assert!(service.warm_siblings("/a").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_reads_through_cache() {
        let service = service();
        let bucket = bucket();
        service.attach("test", fake_fetcher(Arc::clone(&bucket))).await;

        let listing = service.navigate(None, "/a", None).await.unwrap();
        assert_eq!(listing.folder_paths(), vec!["/a/x"]);
        settle().await;

        let again = service.navigate(None, "/a/", None).await.unwrap();
        assert_eq!(again, listing);
        assert_eq!(bucket.fetch_count("/a"), 1);

        let stats = service.cache().get_stats();
        assert!(stats.total_hits >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_records_transitions() {
        let service = service();
        service.attach("test", fake_fetcher(bucket())).await;

        service.navigate(None, "/", None).await.unwrap();
        service.navigate(None, "/a", None).await.unwrap();
        service
            .navigate(Some("/a"), "/a/x", Some(Duration::from_millis(40)))
            .await
            .unwrap();

        let from_root = service.cache().get_navigation_patterns("/");
        assert_eq!(from_root.len(), 1);
        assert_eq!(from_root[0].to_path, "/a");

        let from_a = service.cache().get_navigation_patterns("/a");
        assert_eq!(from_a[0].to_path, "/a/x");
        assert_eq!(from_a[0].average_time, Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_warms_siblings_in_background() {
        let service = service();
        let bucket = bucket();
        service.attach("test", fake_fetcher(Arc::clone(&bucket))).await;

        // Listing the root teaches the tracker that /a and /b exist
        service.navigate(None, "/", None).await.unwrap();
        settle().await;
        service.navigate(None, "/a", None).await.unwrap();
        settle().await;

        assert!(service.cache().store().contains("/b"));
        assert_eq!(bucket.fetch_count("/b"), 1);

        service.navigate(None, "/b", None).await.unwrap();
        assert_eq!(bucket.fetch_count("/b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_warms_likely_next_paths() {
        let service = service();
        let bucket = bucket();
        service.attach("test", fake_fetcher(Arc::clone(&bucket))).await;

        service.navigate(None, "/a", None).await.unwrap();
        service.navigate(None, "/a/x", None).await.unwrap();
        service.navigate(None, "/a", None).await.unwrap();
        settle().await;
        service.invalidate("/a/x");

        let report = service
            .handle_idle(IdleEvent {
                idle_for: Duration::from_millis(100),
            })
            .await
            .unwrap();
        assert_eq!(report.fetched, 1);
        assert!(service.cache().store().contains("/a/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_without_position_is_a_no_op() {
        let service = service();
        service.attach("test", fake_fetcher(bucket())).await;
        let event = IdleEvent {
            idle_for: Duration::from_millis(100),
        };
        assert!(service.handle_idle(event).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_replaces_backend_and_clears_cache() {
        let service = service();
        service.attach("first", fake_fetcher(bucket())).await;
        service.navigate(None, "/a", None).await.unwrap();
        settle().await;
        assert!(service.cache().store().contains("/a"));

        service.attach("second", fake_fetcher(bucket())).await;
        assert!(!service.cache().store().contains("/a"));

        let status = service.status().await;
        assert_eq!(status.connected.as_deref(), Some("second"));
        assert_eq!(status.current_path, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_listings_from_old_backend() {
        let service = Arc::new(service());
        service
            .attach("old", labelled_fetcher("old", Duration::from_millis(50)))
            .await;
        let warming = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .warm_paths(vec!["/a".to_string()], WarmReason::Manual)
                    .await
            })
        };
        settle().await;

        service
            .attach("new", labelled_fetcher("new", Duration::from_millis(5)))
            .await;
        let listing = service.navigate(None, "/a", None).await.unwrap();
        assert_eq!(listing.entries[0].name, "new");

        // The old fetch finishes after the switch and is thrown away
        let report = warming.await.unwrap().unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.dropped, 1);
        let cached = service.cache().store().get("/a").unwrap();
        assert_eq!(cached.entries[0].name, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_returned() {
        let service = service();
        service.attach("test", fake_fetcher(bucket())).await;
        let err = service.navigate(None, "/missing", None).await.unwrap_err();
        assert!(err.to_string().contains("no such folder"));
        assert!(!service.cache().store().contains("/missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_position_and_cache() {
        let service = service();
        service.attach("bucket", fake_fetcher(bucket())).await;
        service.navigate(None, "/a", None).await.unwrap();
        settle().await;

        let status = service.status().await;
        assert_eq!(status.current_path.as_deref(), Some("/a"));
        assert!(!status.is_warming);
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.cache.entry_count >= 1);
    }
}
