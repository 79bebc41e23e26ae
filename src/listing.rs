//! Directory listing values held by the cache

use serde::{Deserialize, Serialize};

/// Rough in-memory size of a cached value, in bytes
///
/// Feeds the `memory_usage` estimate in cache statistics. It does not need
/// to be exact, only proportional.
pub trait Footprint {
    fn footprint(&self) -> usize;
}

impl Footprint for String {
    fn footprint(&self) -> usize {
        std::mem::size_of::<String>() + self.capacity()
    }
}

impl<T: Footprint> Footprint for Vec<T> {
    fn footprint(&self) -> usize {
        std::mem::size_of::<Vec<T>>() + self.iter().map(Footprint::footprint).sum::<usize>()
    }
}

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    Folder,
    File,
}

/// One child of a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    /// Base name (no slashes)
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes (0 for folders)
    pub size: u64,
    /// Upload timestamp in milliseconds since epoch (0 if unknown)
    pub modified_ms: u64,
}

/// Contents of one folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    /// Folder path the listing belongs to
    pub path: String,
    pub entries: Vec<ListingEntry>,
}

impl DirectoryListing {
    pub fn new(path: impl Into<String>, entries: Vec<ListingEntry>) -> Self {
        Self {
            path: path.into(),
            entries,
        }
    }

    /// Full paths of the subfolders in this listing
    pub fn folder_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Folder)
            .map(|e| crate::path::join(&self.path, &e.name))
            .collect()
    }
}

impl Footprint for ListingEntry {
    fn footprint(&self) -> usize {
        std::mem::size_of::<ListingEntry>() + self.name.capacity()
    }
}

impl Footprint for DirectoryListing {
    fn footprint(&self) -> usize {
        self.path.footprint() + self.entries.footprint()
    }
}
