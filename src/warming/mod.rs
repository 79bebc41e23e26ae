//! Predictive cache warming
//!
//! Bounded-concurrency, priority-ordered prefetching of folder listings.

pub mod config;
pub mod fetch;
pub mod manager;
pub mod session;
pub mod task;

pub use config::{ConfigError, WarmingConfig};
pub use fetch::{FetchFuture, Fetcher};
pub use manager::WarmingManager;
pub use session::{IdleEvent, SessionState, WarmingReport, WarmingStats};
pub use task::{Priority, WarmReason};
