//! CloudMount prefetch - directory listing cache with predictive warming
//!
//! Caches folder listings from a B2 bucket, learns how the user moves
//! between folders, and warms likely destinations in the background under
//! a concurrency limit and a time budget.

pub mod b2;
pub mod cache;
pub mod clock;
pub mod config;
pub mod ipc;
pub mod listing;
pub mod path;
pub mod patterns;
pub mod service;
pub mod warming;

pub use cache::{CacheStats, CacheStore, DirectoryCache, StoreConfig};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::DaemonConfig;
pub use listing::{DirectoryListing, EntryKind, Footprint, ListingEntry};
pub use patterns::{NavigationPattern, NavigationPatternTracker};
pub use service::PrefetchService;
pub use warming::{
    ConfigError, Fetcher, IdleEvent, Priority, SessionState, WarmReason, WarmingConfig,
    WarmingManager, WarmingReport, WarmingStats,
};
