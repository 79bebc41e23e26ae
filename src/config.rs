//! Daemon configuration
//!
//! Read from a JSON file, then overridden by environment variables. The
//! warming limits are validated before the daemon starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::cache::StoreConfig;
use crate::warming::WarmingConfig;

/// Default socket path for IPC communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/cloudmount-prefetch.sock";

const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_IDLE_MS: u64 = 3_000;
const DEFAULT_MAX_WARMING_MS: u64 = 30_000;
const DEFAULT_IDLE_PRELOAD_LIMIT: usize = 5;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CLOUDMOUNT_PREFETCH_CONFIG";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub warming: WarmingConfig,
    pub store: StoreConfig,
    /// Paths warmed per idle event
    pub idle_preload_limit: usize,
}

/// On-disk shape; every field optional
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    max_concurrent_requests: Option<usize>,
    priority_threshold: Option<f64>,
    idle_time_required_ms: Option<u64>,
    max_warming_time_ms: Option<u64>,
    max_entries: Option<u64>,
    ttl_secs: Option<u64>,
    idle_preload_limit: Option<usize>,
}

impl DaemonConfig {
    /// Load from the config file (if any) and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .ok()
            .or_else(default_config_path);
        let file = match path {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_concurrent_requests = env_parse(&env, "CLOUDMOUNT_PREFETCH_MAX_CONCURRENT")?
            .or(file.max_concurrent_requests)
            .unwrap_or(DEFAULT_MAX_CONCURRENT);
        let idle_ms = env_parse(&env, "CLOUDMOUNT_PREFETCH_IDLE_MS")?
            .or(file.idle_time_required_ms)
            .unwrap_or(DEFAULT_IDLE_MS);
        let max_entries = env_parse(&env, "CLOUDMOUNT_PREFETCH_MAX_ENTRIES")?
            .or(file.max_entries)
            .unwrap_or(crate::cache::store::DEFAULT_MAX_ENTRIES);
        let socket_path = env("CLOUDMOUNT_PREFETCH_SOCKET")
            .map(PathBuf::from)
            .or(file.socket_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

        let warming = WarmingConfig {
            max_concurrent_requests,
            priority_threshold: file.priority_threshold.unwrap_or(0.0),
            idle_time_required: Duration::from_millis(idle_ms),
            max_warming_time: Duration::from_millis(
                file.max_warming_time_ms.unwrap_or(DEFAULT_MAX_WARMING_MS),
            ),
        };
        warming.validate().context("Invalid warming configuration")?;

        let store = StoreConfig {
            // 0 disables the bound
            max_entries: Some(max_entries).filter(|&n| n > 0),
            time_to_live: match file.ttl_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => Some(crate::cache::store::DEFAULT_TTL),
            },
        };

        Ok(Self {
            socket_path,
            warming,
            store,
            idle_preload_limit: file.idle_preload_limit.unwrap_or(DEFAULT_IDLE_PRELOAD_LIMIT),
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cloudmount").join("prefetch.json"))
}

/// A missing file means defaults; a malformed one is an error
fn read_file(path: &Path) -> Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            debug!(path = %path.display(), "Loading config file");
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read config file: {}", path.display()))
        }
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::resolve(FileConfig::default(), no_env).unwrap();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.warming.max_concurrent_requests, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.warming.idle_time_required, Duration::from_millis(DEFAULT_IDLE_MS));
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_file_values_and_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"maxConcurrentRequests": 2, "idleTimeRequiredMs": 100, "maxEntries": 0, "ttlSecs": 0}}"#
        )
        .unwrap();
        let parsed = read_file(file.path()).unwrap();

        let env: HashMap<&str, &str> = [("CLOUDMOUNT_PREFETCH_MAX_CONCURRENT", "8")].into();
        let config =
            DaemonConfig::resolve(parsed, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.warming.max_concurrent_requests, 8);
        assert_eq!(config.warming.idle_time_required, Duration::from_millis(100));
        assert_eq!(config.store, StoreConfig::unbounded());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = read_file(&dir.path().join("absent.json")).unwrap();
        assert!(parsed.max_concurrent_requests.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxConcurrentRequests": "lots"}}"#).unwrap();
        assert!(read_file(file.path()).is_err());
    }

    #[test]
    fn test_invalid_limits_are_rejected() {
        let env = |k: &str| (k == "CLOUDMOUNT_PREFETCH_MAX_CONCURRENT").then(|| "0".to_string());
        assert!(DaemonConfig::resolve(FileConfig::default(), env).is_err());

        let garbage = |k: &str| (k == "CLOUDMOUNT_PREFETCH_IDLE_MS").then(|| "soon".to_string());
        assert!(DaemonConfig::resolve(FileConfig::default(), garbage).is_err());
    }
}
