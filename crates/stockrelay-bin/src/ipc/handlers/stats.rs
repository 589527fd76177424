//! Stats snapshot handler.
//!
//! The snapshot is recomputed from the store on every call; clients poll it
//! on a ~30 second cadence.

use crate::app::DaemonState;
use crate::ipc::handlers::store_error_response;
use stockrelay_ipc::{IpcServer, Method, Response};

/// Register the stats handler.
pub async fn register(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::StatsGet, move |req| {
            let state = state.clone();
            async move {
                match state.store.stats().await {
                    Ok(stats) => Response::success(
                        &req.id,
                        serde_json::json!({
                            "pending": stats.pending,
                            "processing": stats.processing,
                            "completed_24h": stats.completed_24h,
                            "failed_24h": stats.failed_24h,
                            "success_rate": stats.success_rate,
                            "unmapped_unresolved": stats.unmapped_unresolved,
                        }),
                    ),
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}
