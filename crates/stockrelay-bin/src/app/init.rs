//! Daemon initialization.

use crate::app::DaemonState;
use crate::ipc::register_handlers;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stockrelay_adapter::{AdapterConfig, HttpIntegrationAdapter};
use stockrelay_config::{Config, Paths};
use stockrelay_database::MovementStore;
use stockrelay_dispatcher::{BackoffConfig, Dispatcher, DispatcherConfig};
use stockrelay_ipc::{IpcClient, IpcServer, Method};
use tracing::info;

/// Run the daemon.
pub async fn run_daemon(
    config: Config,
    paths: Paths,
    _foreground: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Singleton enforcement: check if daemon is already running
    let socket_path = paths.socket_file();
    if socket_path.exists() {
        // Try to connect to existing daemon
        let client = IpcClient::new(&socket_path.to_string_lossy());
        if client.call_method(Method::Health).await.is_ok() {
            eprintln!(
                "Error: Daemon is already running. Use 'stockrelay-daemon stop' to stop it first."
            );
            std::process::exit(1);
        }
        // Socket exists but daemon not responding - clean up stale socket
        eprintln!("Removing stale socket file");
        let _ = std::fs::remove_file(&socket_path);
    }

    // Clean up stale PID file if it exists
    let pid_file = paths.pid_file();
    if pid_file.exists() {
        let _ = std::fs::remove_file(&pid_file);
    }

    info!("Starting Stockrelay daemon");
    info!(
        platform_api_url = %config.platform_api_url,
        poll_interval_ms = config.dispatcher.poll_interval_ms,
        batch_size = config.dispatcher.batch_size,
        max_attempts = config.dispatcher.max_attempts,
        "Configuration loaded"
    );

    // Ensure directories exist
    paths.ensure_dirs()?;

    // Write PID file
    let pid = std::process::id();
    std::fs::write(paths.pid_file(), pid.to_string())?;
    info!(pid = pid, "Daemon started");

    // IPC server owns the shutdown channel shared with the dispatcher
    let ipc_server = IpcServer::new(&paths.socket_file().to_string_lossy());

    let store = MovementStore::open(&paths.database_file())
        .await
        .map_err(|e| format!("Failed to open movement store: {}", e))?;
    info!(
        path = %paths.database_file().display(),
        "Movement store initialized"
    );

    let adapter = HttpIntegrationAdapter::new(AdapterConfig {
        api_url: config.platform_api_url.clone(),
        access_token: config.platform_access_token.clone(),
        timeout_secs: config.dispatcher.adapter_timeout_secs,
    })
    .map_err(|e| format!("Failed to build platform adapter: {}", e))?;

    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(adapter),
        DispatcherConfig {
            batch_size: config.dispatcher.batch_size,
            poll_interval: Duration::from_millis(config.dispatcher.poll_interval_ms),
            lease: Duration::from_secs(config.dispatcher.lease_secs),
            adapter_timeout: Duration::from_secs(config.dispatcher.adapter_timeout_secs),
            backoff: BackoffConfig {
                base: Duration::from_millis(config.dispatcher.backoff_base_ms),
                max: Duration::from_millis(config.dispatcher.backoff_max_ms),
            },
        },
    );
    let dispatcher_handle = dispatcher.start(ipc_server.shutdown_receiver());

    // Create shared state (Clone-able with internal Arc)
    let state = DaemonState {
        config: Arc::new(config),
        store,
        started_at: Utc::now(),
    };

    // Register handlers
    register_handlers(&ipc_server, state).await;

    // Run server
    info!(
        socket = %paths.socket_file().display(),
        "IPC server starting"
    );

    let server_result = ipc_server.run().await;

    // The dispatcher listens on the same shutdown channel as the server
    let _ = dispatcher_handle.await;

    // Cleanup
    let _ = std::fs::remove_file(paths.pid_file());
    let _ = std::fs::remove_file(paths.socket_file());

    info!("Daemon stopped");

    server_result.map_err(|e| e.into())
}
