//! Health and shutdown handlers.

use crate::app::DaemonState;
use chrono::Utc;
use stockrelay_ipc::{IpcServer, Method, Response};
use tracing::info;

/// Register health and shutdown handlers.
pub async fn register(server: &IpcServer, state: DaemonState) {
    // Health check
    server
        .register_handler(Method::Health, move |req| {
            let started_at = state.started_at;
            async move {
                let uptime_secs = (Utc::now() - started_at).num_seconds().max(0);
                Response::success(
                    &req.id,
                    serde_json::json!({
                        "status": "ok",
                        "version": env!("CARGO_PKG_VERSION"),
                        "uptime_secs": uptime_secs,
                    }),
                )
            }
        })
        .await;

    // Shutdown
    let shutdown_tx = server.shutdown_sender();
    server
        .register_handler(Method::Shutdown, move |req| {
            let tx = shutdown_tx.clone();
            async move {
                // Send shutdown signal
                let _ = tx.send(());
                Response::success(&req.id, serde_json::json!({ "status": "shutting_down" }))
            }
        })
        .await;

    info!("Registered health handlers");
}
