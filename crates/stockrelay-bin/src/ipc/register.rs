//! Handler registration for the IPC server.

use crate::app::DaemonState;
use crate::ipc::handlers;
use stockrelay_ipc::IpcServer;
use tracing::info;

/// Register all IPC handlers.
pub async fn register_handlers(server: &IpcServer, state: DaemonState) {
    handlers::health::register(server, state.clone()).await;
    handlers::movement::register(server, state.clone()).await;
    handlers::sku::register(server, state.clone()).await;
    handlers::stats::register(server, state.clone()).await;
    handlers::export::register(server, state).await;

    info!("All IPC handlers registered");
}
