//! Unmapped-SKU registry handlers.

use crate::app::DaemonState;
use crate::ipc::handlers::store_error_response;
use stockrelay_database::UnmappedSku;
use stockrelay_ipc::{error_codes, IpcServer, Method, Response};

/// Register unmapped-SKU handlers.
pub async fn register(server: &IpcServer, state: DaemonState) {
    register_sku_list(server, state.clone()).await;
    register_sku_resolve(server, state).await;
}

async fn register_sku_list(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::SkuList, move |req| {
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
                    .unwrap_or(false);

                match state.store.list_unmapped(store_id, include_resolved).await {
                    Ok(skus) => {
                        let sku_data: Vec<serde_json::Value> = skus.iter().map(sku_json).collect();
                        Response::success(&req.id, serde_json::json!({ "skus": sku_data }))
                    }
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

async fn register_sku_resolve(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::SkuResolve, move |req| {
            let state = state.clone();
            async move {
                let id = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("id"))
                    .and_then(|v| v.as_str())
                    .map(String::from);

                let Some(id) = id else {
                    return Response::error(&req.id, error_codes::INVALID_PARAMS, "id is required");
                };

                match state.store.resolve_sku(&id).await {
                    Ok(sku) => {
                        Response::success(&req.id, serde_json::json!({ "sku": sku_json(&sku) }))
                    }
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

/// Wire projection of an unmapped-SKU record.
fn sku_json(s: &UnmappedSku) -> serde_json::Value {
    serde_json::json!({
        "id": s.id,
        "tenant_id": s.tenant_id,
        "store_id": s.store_id,
        "sku": s.sku,
        "product_name": s.product_name,
        "last_seen_at": s.last_seen_at.to_rfc3339(),
        "occurrences": s.occurrences,
        "resolved": s.resolved,
        "created_at": s.created_at.to_rfc3339(),
    })
}
