//! IPC Server - Unix socket server for UI communication
//!
//! Handles incoming connections from the UI and dispatches commands
//! to the PrefetchService.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::ipc::protocol::{parse_command, serialize_response, Command, Response, PROTOCOL_VERSION};
use crate::service::PrefetchService;

/// IPC Server that listens for commands from the UI
pub struct IpcServer {
    service: Arc<PrefetchService>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<AtomicU32>,
}

impl IpcServer {
    pub fn new(service: Arc<PrefetchService>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            service,
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path).context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let service = Arc::clone(&self.service);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    service: Arc<PrefetchService>,
    connection_count: Arc<AtomicU32>,
) -> Result<()> {
    let count = connection_count.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(count = count, "New connection");

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &service).await,
                    Err(e) => {
                        // Raw line may carry credentials
                        error!(error = %e, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    let count = connection_count.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    debug!(count = count, "Connection ended");

    Ok(())
}

fn report_or_error(result: Result<crate::warming::WarmingReport>) -> Response {
    match result {
        Ok(report) => Response::Report { report },
        Err(e) => Response::Error {
            error: format!("Warming failed: {}", e),
        },
    }
}

/// Process a command and return a response
async fn process_command(command: Command, service: &PrefetchService) -> Response {
    match command {
        Command::Connect {
            bucket_name,
            key_id,
            key,
        } => {
            info!(bucket = %bucket_name, "Processing connect command");
            match service.connect(&bucket_name, &key_id, &key).await {
                Ok(()) => Response::Success {
                    message: Some(format!("Connected to '{}'", bucket_name)),
                },
                Err(e) => Response::Error {
                    error: format!("B2 authorization failed: {}", e),
                },
            }
        }

        Command::Navigate {
            from_path,
            to_path,
            elapsed_ms,
        } => {
            debug!(to = %to_path, "Processing navigate command");
            let elapsed = elapsed_ms.map(Duration::from_millis);
            match service.navigate(from_path.as_deref(), &to_path, elapsed).await {
                Ok(listing) => Response::Listing { listing },
                Err(e) => Response::Error {
                    error: format!("Listing '{}' failed: {}", to_path, e),
                },
            }
        }

        Command::WarmPaths { paths, reason } => {
            debug!(count = paths.len(), reason = ?reason, "Processing warmPaths command");
            report_or_error(service.warm_paths(paths, reason).await)
        }

        Command::WarmFromPatterns { from_path } => {
            report_or_error(service.warm_from_patterns(&from_path).await)
        }

        Command::WarmSiblings { current_path } => {
            report_or_error(service.warm_siblings(&current_path).await)
        }

        Command::RecordActivity => {
            service.record_activity();
            Response::Success { message: None }
        }

        Command::StopWarming => {
            info!("Processing stopWarming command");
            service.stop_warming();
            Response::Success {
                message: Some("Warming stopped".to_string()),
            }
        }

        Command::Invalidate { path } => {
            service.invalidate(&path);
            Response::Success {
                message: Some(format!("Invalidated {}", path)),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: true,
                status: service.status().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DirectoryCache, StoreConfig};
    use crate::listing::DirectoryListing;
    use crate::warming::{Fetcher, WarmingConfig};

    fn service() -> Arc<PrefetchService> {
        let config = WarmingConfig {
            max_concurrent_requests: 2,
            priority_threshold: 0.0,
            idle_time_required: Duration::from_secs(1),
            max_warming_time: Duration::from_secs(5),
        };
        let cache = Arc::new(DirectoryCache::new(StoreConfig::default()));
        Arc::new(PrefetchService::with_cache(config, cache, 3).unwrap())
    }

    fn empty_listings() -> Arc<dyn Fetcher<DirectoryListing>> {
        Arc::new(|folder: String| async move {
            Ok::<_, anyhow::Error>(DirectoryListing::new(folder, Vec::new()))
        })
    }

    #[tokio::test]
    async fn test_commands_before_connect_report_errors() {
        let service = service();
        let response = process_command(
            Command::Navigate {
                from_path: None,
                to_path: "/a".to_string(),
                elapsed_ms: None,
            },
            &service,
        )
        .await;
        assert!(matches!(response, Response::Error { error } if error.contains("Not connected")));

        let response = process_command(
            Command::WarmSiblings {
                current_path: "/a".to_string(),
            },
            &service,
        )
        .await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_navigate_and_warm_commands() {
        let service = service();
        service.attach("test", empty_listings()).await;

        let response = process_command(
            Command::Navigate {
                from_path: None,
                to_path: "/photos/".to_string(),
                elapsed_ms: None,
            },
            &service,
        )
        .await;
        match response {
            Response::Listing { listing } => assert_eq!(listing.path, "/photos"),
            other => panic!("Expected listing, got {:?}", other),
        }

        let response = process_command(
            Command::WarmPaths {
                paths: vec!["/photos".to_string(), "/music".to_string()],
                reason: Default::default(),
            },
            &service,
        )
        .await;
        match response {
            Response::Report { report } => {
                assert_eq!(report.requested, 2);
                assert_eq!(report.skipped_cached, 1);
                assert_eq!(report.fetched, 1);
            }
            other => panic!("Expected report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidate_and_status_commands() {
        let service = service();
        service.attach("bucket", empty_listings()).await;
        service.navigate(None, "/a", None).await.unwrap();

        process_command(Command::Invalidate { path: "/a".to_string() }, &service).await;
        assert!(!service.cache().store().contains("/a"));

        match process_command(Command::GetStatus, &service).await {
            Response::Status {
                version,
                healthy,
                status,
            } => {
                assert_eq!(version, PROTOCOL_VERSION);
                assert!(healthy);
                assert_eq!(status.connected.as_deref(), Some("bucket"));
                assert_eq!(status.current_path.as_deref(), Some("/a"));
            }
            other => panic!("Expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("prefetch.sock");
        let mut server = IpcServer::new(service(), &socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run().await });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"type\":\"getStatus\"}\nnot json\n").await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let status: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(status["type"], "status");
        assert_eq!(status["healthy"], true);

        let invalid: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(invalid["type"], "error");

        handle.abort();
        server.stop().await.unwrap();
        assert!(!socket_path.exists());
    }
}
