//! Movement queue handlers.

use crate::app::DaemonState;
use crate::ipc::handlers::store_error_response;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use stockrelay_database::{Movement, MovementFilter, MovementStatus, MovementType, NewMovement};
use stockrelay_ipc::{error_codes, IpcServer, Method, Response};

/// Largest page size a list call may request.
const LIST_LIMIT_MAX: u32 = 200;
/// Page size when the caller does not specify one.
const LIST_LIMIT_DEFAULT: u32 = 50;

/// Register movement handlers.
pub async fn register(server: &IpcServer, state: DaemonState) {
    register_movement_enqueue(server, state.clone()).await;
    register_movement_list(server, state.clone()).await;
    register_movement_get(server, state.clone()).await;
    register_movement_retry(server, state).await;
}

/// Wire body for `movement.enqueue`.
#[derive(Debug, Deserialize)]
struct EnqueueParams {
    tenant_id: String,
    store_id: String,
    integration_id: String,
    movement_type: MovementType,
    sku: String,
    quantity: i64,
    #[serde(default)]
    order_id: Option<String>,
    event_type: String,
    #[serde(default = "default_metadata")]
    metadata: serde_json::Value,
    /// Attempt budget; falls back to the configured default.
    #[serde(default)]
    max_attempts: Option<i32>,
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

async fn register_movement_enqueue(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::MovementEnqueue, move |req| {
            let state = state.clone();
            async move {
                let Some(params) = req.params else {
                    return Response::error(
                        &req.id,
                        error_codes::INVALID_PARAMS,
                        "params are required",
                    );
                };

                let params: EnqueueParams = match serde_json::from_value(params) {
                    Ok(p) => p,
                    Err(e) => {
                        return Response::error(
                            &req.id,
                            error_codes::INVALID_PARAMS,
                            &format!("invalid movement: {}", e),
                        );
                    }
                };

                let movement = NewMovement {
                    tenant_id: params.tenant_id,
                    store_id: params.store_id,
                    integration_id: params.integration_id,
                    movement_type: params.movement_type,
                    sku: params.sku,
                    quantity: params.quantity,
                    order_id: params.order_id,
                    event_type: params.event_type,
                    metadata: params.metadata,
                    max_attempts: params
                        .max_attempts
                        .unwrap_or(state.config.dispatcher.max_attempts),
                };

                match state.store.append(movement).await {
                    Ok(created) => Response::success(
                        &req.id,
                        serde_json::json!({ "movement": movement_json(&created) }),
                    ),
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

async fn register_movement_list(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::MovementList, move |req| {
            let state = state.clone();
            async move {
                let filter = match parse_filter(req.params.as_ref()) {
                    Ok(filter) => filter,
                    Err(message) => {
                        return Response::error(&req.id, error_codes::INVALID_PARAMS, &message);
                    }
                };

                match state.store.list(filter).await {
                    Ok(page) => {
                        let items: Vec<serde_json::Value> =
                            page.items.iter().map(movement_json).collect();
                        Response::success(
                            &req.id,
                            serde_json::json!({
                                "items": items,
                                "pagination": {
                                    "page": page.pagination.page,
                                    "limit": page.pagination.limit,
                                    "total": page.pagination.total,
                                    "total_pages": page.pagination.total_pages,
                                },
                            }),
                        )
                    }
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

async fn register_movement_get(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::MovementGet, move |req| {
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

                match state.store.get(&id).await {
                    Ok(Some(movement)) => Response::success(
                        &req.id,
                        serde_json::json!({ "movement": movement_json(&movement) }),
                    ),
                    Ok(None) => {
                        Response::error(&req.id, error_codes::NOT_FOUND, "Movement not found")
                    }
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

async fn register_movement_retry(server: &IpcServer, state: DaemonState) {
    server
        .register_handler(Method::MovementRetry, move |req| {
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

                match state.store.retry(&id).await {
                    Ok(movement) => Response::success(
                        &req.id,
                        serde_json::json!({ "movement": movement_json(&movement) }),
                    ),
                    Err(e) => store_error_response(&req.id, e),
                }
            }
        })
        .await;
}

/// Wire projection of a movement.
fn movement_json(m: &Movement) -> serde_json::Value {
    serde_json::json!({
        "id": m.id,
        "tenant_id": m.tenant_id,
        "store_id": m.store_id,
        "integration_id": m.integration_id,
        "movement_type": m.movement_type.as_str(),
        "sku": m.sku,
        "quantity": m.quantity,
        "order_id": m.order_id,
        "event_type": m.event_type,
        "metadata": m.metadata,
        "status": m.status.as_str(),
        "attempts": m.attempts,
        "max_attempts": m.max_attempts,
        "last_attempt_at": m.last_attempt_at.map(|t| t.to_rfc3339()),
        "next_attempt_at": m.next_attempt_at.map(|t| t.to_rfc3339()),
        "lease_expires_at": m.lease_expires_at.map(|t| t.to_rfc3339()),
        "error_message": m.error_message,
        "created_at": m.created_at.to_rfc3339(),
        "processed_at": m.processed_at.map(|t| t.to_rfc3339()),
    })
}

/// Build a [`MovementFilter`] from list params, rejecting malformed values.
pub(crate) fn parse_filter(
    params: Option<&serde_json::Value>,
) -> Result<MovementFilter, String> {
    let status = match params.and_then(|p| p.get("status")).and_then(|v| v.as_str()) {
        Some(s) => Some(parse_status(s)?),
        None => None,
    };

    let movement_type = match params
        .and_then(|p| p.get("movement_type"))
        .and_then(|v| v.as_str())
    {
        Some(s) => Some(parse_movement_type(s)?),
        None => None,
    };

    let store_id = params
        .and_then(|p| p.get("store_id"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let created_from = match params.and_then(|p| p.get("from")).and_then(|v| v.as_str()) {
        Some(s) => Some(parse_timestamp("from", s)?),
        None => None,
    };

    let created_to = match params.and_then(|p| p.get("to")).and_then(|v| v.as_str()) {
        Some(s) => Some(parse_timestamp("to", s)?),
        None => None,
    };

    let page = params
        .and_then(|p| p.get("page"))
        .and_then(|v| v.as_u64())
        .unwrap_or(1)
        .max(1) as u32;

    let limit = params
        .and_then(|p| p.get("limit"))
        .and_then(|v| v.as_u64())
        .unwrap_or(LIST_LIMIT_DEFAULT as u64) as u32;
    let limit = if limit == 0 {
        LIST_LIMIT_DEFAULT
    } else {
        limit.min(LIST_LIMIT_MAX)
    };

    Ok(MovementFilter {
        status,
        movement_type,
        store_id,
        created_from,
        created_to,
        page,
        limit,
    })
}

fn parse_status(s: &str) -> Result<MovementStatus, String> {
    match s {
        "pending" => Ok(MovementStatus::Pending),
        "processing" => Ok(MovementStatus::Processing),
        "completed" => Ok(MovementStatus::Completed),
        "failed" => Ok(MovementStatus::Failed),
        other => Err(format!("invalid status: {}", other)),
    }
}

fn parse_movement_type(s: &str) -> Result<MovementType, String> {
    match s {
        "ingreso" => Ok(MovementType::Ingreso),
        "egreso" => Ok(MovementType::Egreso),
        other => Err(format!("invalid movement_type: {}", other)),
    }
}

fn parse_timestamp(field: &str, s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid {}: {}", field, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_filter_defaults() {
        let filter = parse_filter(None).unwrap();
        assert!(filter.status.is_none());
        assert!(filter.movement_type.is_none());
        assert!(filter.store_id.is_none());
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, LIST_LIMIT_DEFAULT);
    }

    #[test]
    fn parse_filter_reads_all_fields() {
        let params = serde_json::json!({
            "status": "failed",
            "movement_type": "egreso",
            "store_id": "store-9",
            "from": "2026-08-01T00:00:00Z",
            "to": "2026-08-02T00:00:00Z",
            "page": 3,
            "limit": 25,
        });

        let filter = parse_filter(Some(&params)).unwrap();
        assert_eq!(filter.status, Some(MovementStatus::Failed));
        assert_eq!(filter.movement_type, Some(MovementType::Egreso));
        assert_eq!(filter.store_id.as_deref(), Some("store-9"));
        assert!(filter.created_from.is_some());
        assert!(filter.created_to.is_some());
        assert_eq!(filter.page, 3);
        assert_eq!(filter.limit, 25);
    }

    #[test]
    fn parse_filter_clamps_limit() {
        let params = serde_json::json!({ "limit": 10_000 });
        let filter = parse_filter(Some(&params)).unwrap();
        assert_eq!(filter.limit, LIST_LIMIT_MAX);

        let params = serde_json::json!({ "limit": 0 });
        let filter = parse_filter(Some(&params)).unwrap();
        assert_eq!(filter.limit, LIST_LIMIT_DEFAULT);
    }

    #[test]
    fn parse_filter_rejects_unknown_status() {
        let params = serde_json::json!({ "status": "bogus" });
        let err = parse_filter(Some(&params)).unwrap_err();
        assert!(err.contains("invalid status"));
    }

    #[test]
    fn parse_filter_rejects_malformed_timestamps() {
        let params = serde_json::json!({ "from": "yesterday" });
        let err = parse_filter(Some(&params)).unwrap_err();
        assert!(err.contains("invalid from"));
    }

    #[test]
    fn movement_json_formats_timestamps() {
        let movement = Movement {
            id: "m-1".to_string(),
            tenant_id: "t1".to_string(),
            store_id: "s1".to_string(),
            integration_id: "i1".to_string(),
            movement_type: MovementType::Ingreso,
            sku: "SKU-1".to_string(),
            quantity: 2,
            order_id: None,
            event_type: "manual".to_string(),
            metadata: serde_json::json!({}),
            status: MovementStatus::Pending,
            attempts: 0,
            max_attempts: 5,
            last_attempt_at: None,
            next_attempt_at: None,
            lease_expires_at: None,
            error_message: None,
            created_at: "2026-08-20T12:00:00Z".parse().unwrap(),
            processed_at: None,
        };

        let json = movement_json(&movement);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["movement_type"], "ingreso");
        assert!(json["created_at"].as_str().unwrap().starts_with("2026-08-20T12:00:00"));
        assert!(json["processed_at"].is_null());
    }
}
