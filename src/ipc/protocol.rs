//! IPC protocol definitions for UI-daemon communication
//!
//! Newline-delimited JSON over a Unix domain socket. Each command gets
//! exactly one response line.

use serde::{Deserialize, Serialize};

use crate::listing::DirectoryListing;
use crate::service::ServiceStatus;
use crate::warming::{WarmReason, WarmingReport};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from the UI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Authorize against a bucket and list from it
    #[serde(rename_all = "camelCase")]
    Connect {
        bucket_name: String,
        key_id: String,
        /// B2 application key
        key: String,
    },
    /// The user opened a folder
    #[serde(rename_all = "camelCase")]
    Navigate {
        /// Defaults to the previously opened folder
        #[serde(default)]
        from_path: Option<String>,
        to_path: String,
        /// Time spent before moving, in milliseconds
        #[serde(default)]
        elapsed_ms: Option<u64>,
    },
    /// Warm an explicit set of folders
    #[serde(rename_all = "camelCase")]
    WarmPaths {
        paths: Vec<String>,
        #[serde(default)]
        reason: WarmReason,
    },
    #[serde(rename_all = "camelCase")]
    WarmFromPatterns { from_path: String },
    #[serde(rename_all = "camelCase")]
    WarmSiblings { current_path: String },
    /// User interaction that is not a navigation (scroll, selection)
    RecordActivity,
    StopWarming,
    /// Drop a folder's cached listing, e.g. after a local change
    #[serde(rename_all = "camelCase")]
    Invalidate { path: String },
    /// Get daemon status, warming state and cache statistics
    GetStatus,
}

/// Responses sent from the daemon to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Success response
    #[serde(rename_all = "camelCase")]
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error {
        /// Error message
        error: String,
    },
    /// Folder contents for a `navigate`
    #[serde(rename_all = "camelCase")]
    Listing { listing: DirectoryListing },
    /// Outcome of a warming command
    #[serde(rename_all = "camelCase")]
    Report { report: WarmingReport },
    /// Status response with daemon state
    #[serde(rename_all = "camelCase")]
    Status {
        /// Protocol version
        version: u32,
        /// Whether daemon is healthy
        healthy: bool,
        status: ServiceStatus,
    },
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
