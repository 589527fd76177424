//! CSV export handlers.
//!
//! Exports are a read-only projection of the filtered rows; they never touch
//! movement state. Output is CSV text in the response body so the
//! presentation layer can offer it as a download.

use crate::app::DaemonState;
use crate::ipc::handlers::movement::parse_filter;
use crate::ipc::handlers::store_error_response;
use chrono::{DateTime, Utc};
use stockrelay_database::{Movement, UnmappedSku};
use stockrelay_ipc::{error_codes, IpcServer, Method, Response};

/// Row cap for a single export.
const EXPORT_MAX_ROWS: u32 = 10_000;

/// Register export handlers.
pub async fn register(server: &IpcServer, state: DaemonState) {
    register_export_movements(server, state.clone()).await;
    register_export_skus(server, state).await;
}

async fn register_export_movements(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::ExportMovements, move |req| {
            let state = state.clone();
            async move {
                let mut filter = match parse_filter(req.params.as_ref()) {
                    Ok(filter) => filter,
                    Err(message) => {
                        return Response::error(&req.id, error_codes::INVALID_PARAMS, &message);
                    }
                };
                // The export ignores pagination and takes the whole filtered
                // set up to the row cap.
                filter.page = 1;
                filter.limit = EXPORT_MAX_ROWS;

                let page = match state.store.list(filter).await {
                    Ok(page) => page,
                    Err(e) => return store_error_response(&req.id, e),
                };

                match movements_to_csv(&page.items) {
                    Ok(csv) => Response::success(
                        &req.id,
                        serde_json::json!({
                            "csv": csv,
                            "rows": page.items.len(),
                        }),
                    ),
                    Err(message) => {
                        Response::error(&req.id, error_codes::INTERNAL_ERROR, &message)
                    }
                }
            }
        })
        .await;
}

async fn register_export_skus(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::ExportSkus, move |req| {
            let state = state.clone();
            async move {
                let store_id = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("store_id"))
                    .and_then(|v| v.as_str())
                    .map(String::from);

                let include_resolved = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("include_resolved"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);

                let skus = match state.store.list_unmapped(store_id, include_resolved).await {
                    Ok(skus) => skus,
                    Err(e) => return store_error_response(&req.id, e),
                };

                match skus_to_csv(&skus) {
                    Ok(csv) => Response::success(
                        &req.id,
                        serde_json::json!({
                            "csv": csv,
                            "rows": skus.len(),
                        }),
                    ),
                    Err(message) => {
                        Response::error(&req.id, error_codes::INTERNAL_ERROR, &message)
                    }
                }
            }
        })
        .await;
}

fn opt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Render movements as CSV with a human-readable header row.
pub(crate) fn movements_to_csv(movements: &[Movement]) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record([
            "Movement ID",
            "Tenant",
            "Store",
            "Integration",
            "Type",
            "SKU",
            "Quantity",
            "Order ID",
            "Event",
            "Status",
            "Attempts",
            "Max Attempts",
            "Last Attempt At",
            "Next Attempt At",
            "Error",
            "Created At",
            "Processed At",
        ])
        .map_err(|e| e.to_string())?;

    for m in movements {
        let row = [
            m.id.clone(),
            m.tenant_id.clone(),
            m.store_id.clone(),
            m.integration_id.clone(),
            m.movement_type.as_str().to_string(),
            m.sku.clone(),
            m.quantity.to_string(),
            m.order_id.clone().unwrap_or_default(),
            m.event_type.clone(),
            m.status.as_str().to_string(),
            m.attempts.to_string(),
            m.max_attempts.to_string(),
            opt_time(m.last_attempt_at),
            opt_time(m.next_attempt_at),
            m.error_message.clone().unwrap_or_default(),
            m.created_at.to_rfc3339(),
            opt_time(m.processed_at),
        ];
        writer.write_record(&row).map_err(|e| e.to_string())?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Render unmapped-SKU records as CSV.
pub(crate) fn skus_to_csv(skus: &[UnmappedSku]) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record([
            "SKU ID",
            "Tenant",
            "Store",
            "SKU",
            "Product Name",
            "Occurrences",
            "Last Seen At",
            "Resolved",
            "Created At",
        ])
        .map_err(|e| e.to_string())?;

    for s in skus {
        let row = [
            s.id.clone(),
            s.tenant_id.clone(),
            s.store_id.clone(),
            s.sku.clone(),
            s.product_name.clone().unwrap_or_default(),
            s.occurrences.to_string(),
            s.last_seen_at.to_rfc3339(),
            s.resolved.to_string(),
            s.created_at.to_rfc3339(),
        ];
        writer.write_record(&row).map_err(|e| e.to_string())?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}
