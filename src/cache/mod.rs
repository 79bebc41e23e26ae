//! Directory listing cache
//!
//! Listing store with hit/miss accounting, the statistics projection, and
//! the facade that pairs the store with navigation pattern tracking.

pub mod directory;
pub mod stats;
pub mod store;

pub use directory::DirectoryCache;
pub use stats::CacheStats;
pub use store::{CacheStore, StoreConfig};
