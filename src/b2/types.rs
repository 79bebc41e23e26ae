//! B2 API types and listing conversion

use std::collections::HashSet;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::listing::{DirectoryListing, EntryKind, ListingEntry};
use crate::path;

/// B2 returns some numeric fields as strings, and null for folder entries
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(0),
        Some(NumberOrText::Number(n)) => Ok(n),
        Some(NumberOrText::Text(s)) => s.parse().map_err(de::Error::custom),
    }
}

/// B2 file/folder information from `b2_list_file_names`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Full file path within the bucket
    pub file_name: String,
    /// File size in bytes (0 for folders)
    #[serde(default, deserialize_with = "flexible_u64")]
    pub content_length: u64,
    /// Upload timestamp in milliseconds since epoch
    #[serde(default, deserialize_with = "flexible_u64")]
    pub upload_timestamp: u64,
    /// Action type: "upload", "folder", "hide", "start"
    pub action: String,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.action == "folder" || self.file_name.ends_with('/')
    }

    /// Last component of the path
    pub fn base_name(&self) -> &str {
        let name = self.file_name.trim_end_matches('/');
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// Response from `b2_list_file_names`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub files: Vec<FileInfo>,
    /// Next file name for pagination (None if no more files)
    pub next_file_name: Option<String>,
}

/// Request body for `b2_list_file_names`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileNamesRequest<'a> {
    pub bucket_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<&'a str>,
    pub delimiter: &'a str,
    pub max_file_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_name: Option<&'a str>,
}

/// B2 name prefix for a folder path, `None` for the bucket root
pub fn folder_prefix(folder: &str) -> Option<String> {
    let joined = path::segments(folder).collect::<Vec<_>>().join("/");
    if joined.is_empty() {
        None
    } else {
        Some(format!("{}/", joined))
    }
}

/// Build the listing for `folder` from one level of B2 names
///
/// Skips hidden files and the folder's own marker object.
pub fn to_listing(folder: &str, files: Vec<FileInfo>) -> DirectoryListing {
    let prefix = folder_prefix(folder).unwrap_or_default();
    let mut entries: Vec<ListingEntry> = Vec::with_capacity(files.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(files.len());

    for file in &files {
        if file.action == "hide" || file.file_name == prefix {
            continue;
        }
        let name = file.base_name();
        // Pages can repeat a folder
        if name.is_empty() || !seen.insert(name) {
            continue;
        }
        let kind = if file.is_directory() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        entries.push(ListingEntry {
            name: name.to_string(),
            kind,
            size: if kind == EntryKind::Folder { 0 } else { file.content_length },
            modified_ms: file.upload_timestamp,
        });
    }

    DirectoryListing::new(path::normalize(folder), entries)
}
