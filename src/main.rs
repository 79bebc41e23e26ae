//! CloudMount Prefetch Daemon - directory listing cache for Backblaze B2
//!
//! Serves folder listings to the UI and warms likely next folders in the
//! background.

use anyhow::{anyhow, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cloudmount_prefetch::ipc::IpcServer;
use cloudmount_prefetch::{DaemonConfig, PrefetchService, WarmReason};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Warm folders once and print the report (CLI mode)
    Warm {
        bucket_name: String,
        key_id: String,
        key: String,
        paths: Vec<String>,
    },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"CloudMount Prefetch - Directory listing cache and warming daemon

USAGE:
    cloudmount-prefetch                  # Run IPC server (default)
    cloudmount-prefetch warm <bucket_name> <key_id> <key> <path>...
    cloudmount-prefetch help

COMMANDS:
    (none)  Run IPC server mode (waits for commands from the UI)
    warm    List the given folders into the cache and print the report
    help    Show this help message

EXAMPLES:
    # Run IPC server (default)
    cloudmount-prefetch

    # Warm two folders (CLI mode for testing)
    cloudmount-prefetch warm my-bucket 004xxx K004xxx /photos /photos/2024

ENVIRONMENT:
    CLOUDMOUNT_PREFETCH_CONFIG          Config file (default: <config dir>/cloudmount/prefetch.json)
    CLOUDMOUNT_PREFETCH_SOCKET          IPC socket path
    CLOUDMOUNT_PREFETCH_MAX_CONCURRENT  Concurrent warming fetches
    CLOUDMOUNT_PREFETCH_IDLE_MS         Inactivity before idle warming
    CLOUDMOUNT_PREFETCH_MAX_ENTRIES     Cached listings (0 = unbounded)
    RUST_LOG                            Log level (trace, debug, info, warn, error)

NOTE:
    IPC server mode is the normal operation. CLI commands are for testing.
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "warm" => {
            if args.len() < 6 {
                return Err(anyhow!(
                    "Usage: cloudmount-prefetch warm <bucket_name> <key_id> <key> <path>..."
                ));
            }
            Ok(Command::Warm {
                bucket_name: args[2].clone(),
                key_id: args[3].clone(),
                key: args[4].clone(),
                paths: args[5..].to_vec(),
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = DaemonConfig::load()?;
    let service = Arc::new(PrefetchService::new(&config)?);

    match command {
        Command::Server => {
            info!("Starting CloudMount prefetch daemon in IPC server mode");

            let mut ipc_server = IpcServer::new(Arc::clone(&service), &config.socket_path);
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }
            let ipc_server = Arc::new(ipc_server);
            let idle_handle = service.spawn_idle_warming();

            info!("Daemon ready. Waiting for commands from the UI...");

            let server = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            // Wait for Ctrl+C
            tokio::signal::ctrl_c().await?;

            info!("Received shutdown signal, stopping warming...");
            ipc_handle.abort();
            service.shutdown();
            idle_handle.await.ok();
            ipc_server.stop().await?;

            info!("Shutdown complete.");
        }
        Command::Warm {
            bucket_name,
            key_id,
            key,
            paths,
        } => {
            if let Err(e) = service.connect(&bucket_name, &key_id, &key).await {
                error!(error = %e, "Failed to authorize with B2");
                return Err(e);
            }

            let report = service.warm_paths(paths, WarmReason::Manual).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            let stats = service.cache().get_stats();
            println!(
                "Cached {} listings ({} bytes), average load {:.1} ms",
                stats.entry_count, stats.memory_usage, stats.average_load_time_ms
            );
            service.shutdown();
        }
        Command::Help => print_help(),
    }

    Ok(())
}
