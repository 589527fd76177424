//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&rusqlite::Connection` as its first parameter so it
//! can run inside `AsyncDatabase::call` or directly against a test connection.

use crate::{
    DatabaseError, DatabaseResult, Movement, MovementFilter, MovementPage, MovementStats,
    MovementStatus, MovementType, NewMovement, Pagination, UnmappedSku,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

/// Default page size when a filter does not specify one.
const DEFAULT_PAGE_LIMIT: u32 = 50;

const MOVEMENT_COLUMNS: &str = "id, tenant_id, store_id, integration_id, movement_type, sku, \
     quantity, order_id, event_type, metadata, status, attempts, max_attempts, last_attempt_at, \
     next_attempt_at, lease_expires_at, error_message, created_at, processed_at";

fn movement_from_row(row: &rusqlite::Row) -> rusqlite::Result<Movement> {
    let movement_type: String = row.get(4)?;
    let metadata: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(Movement {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        store_id: row.get(2)?,
        integration_id: row.get(3)?,
        movement_type: MovementType::from_str(&movement_type),
        sku: row.get(5)?,
        quantity: row.get(6)?,
        order_id: row.get(7)?,
        event_type: row.get(8)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        status: MovementStatus::from_str(&status),
        attempts: row.get(11)?,
        max_attempts: row.get(12)?,
        last_attempt_at: parse_opt_datetime(row.get(13)?),
        next_attempt_at: parse_opt_datetime(row.get(14)?),
        lease_expires_at: parse_opt_datetime(row.get(15)?),
        error_message: row.get(16)?,
        created_at: parse_datetime(row.get::<_, String>(17)?),
        processed_at: parse_opt_datetime(row.get(18)?),
    })
}

// ==========================================
// Movements
// ==========================================

/// Insert a new pending movement. Creation invariants are checked by the
/// store before this runs.
pub fn insert_movement(conn: &Connection, movement: &NewMovement) -> DatabaseResult<Movement> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let metadata = serde_json::to_string(&movement.metadata)?;

    conn.execute(
        "INSERT INTO movements (id, tenant_id, store_id, integration_id, movement_type, sku,
         quantity, order_id, event_type, metadata, status, attempts, max_attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', 0, ?11, ?12)",
        params![
            id,
            movement.tenant_id,
            movement.store_id,
            movement.integration_id,
            movement.movement_type.as_str(),
            movement.sku,
            movement.quantity,
            movement.order_id,
            movement.event_type,
            metadata,
            movement.max_attempts,
            now,
        ],
    )?;

    debug!(movement_id = %id, store_id = %movement.store_id, sku = %movement.sku, "Movement appended");

    get_movement(conn, &id)?
        .ok_or_else(|| DatabaseError::NotFound("Movement not found after insert".to_string()))
}

/// Get a movement by ID.
pub fn get_movement(conn: &Connection, id: &str) -> DatabaseResult<Option<Movement>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], movement_from_row);

    match result {
        Ok(movement) => Ok(Some(movement)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically claim up to `limit` due movements for one store.
///
/// A movement is claimable when it is `pending` and due, or `processing`
/// with an expired lease (abandoned by a crashed worker). A movement is
/// skipped while any sibling with the same `(store_id, sku)` either precedes
/// it in creation order and is still non-terminal, or currently holds a live
/// `processing` lease. That makes the `processing` row itself the per-SKU
/// in-flight marker: per-SKU dispatch is strictly serialized in creation
/// order no matter how many workers share the database.
///
/// Claiming counts as the start of an attempt: `attempts` is incremented
/// (never past `max_attempts`) and `last_attempt_at` is stamped.
pub fn claim_due_movements(
    conn: &Connection,
    store_id: &str,
    limit: usize,
    lease: chrono::Duration,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<Movement>> {
    let tx = conn.unchecked_transaction()?;
    let now_s = now.to_rfc3339();

    let ids: Vec<String> = {
        let mut stmt = tx.prepare_cached(
            "SELECT m.id FROM movements m
             WHERE m.store_id = ?1
               AND (
                    (m.status = 'pending'
                     AND (m.next_attempt_at IS NULL OR m.next_attempt_at <= ?2))
                 OR (m.status = 'processing'
                     AND m.lease_expires_at IS NOT NULL AND m.lease_expires_at <= ?2)
               )
               AND NOT EXISTS (
                   SELECT 1 FROM movements p
                    WHERE p.store_id = m.store_id AND p.sku = m.sku
                      AND p.status IN ('pending', 'processing')
                      AND (p.created_at < m.created_at
                           OR (p.created_at = m.created_at AND p.id < m.id))
               )
               AND NOT EXISTS (
                   SELECT 1 FROM movements f
                    WHERE f.store_id = m.store_id AND f.sku = m.sku
                      AND f.id <> m.id
                      AND f.status = 'processing'
                      AND f.lease_expires_at > ?2
               )
             ORDER BY m.sku ASC, m.created_at ASC, m.id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![store_id, now_s, limit as i64], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()?
    };

    let lease_expires = (now + lease).to_rfc3339();
    {
        let mut update = tx.prepare_cached(
            "UPDATE movements
             SET status = 'processing',
                 lease_expires_at = ?2,
                 attempts = MIN(attempts + 1, max_attempts),
                 last_attempt_at = ?3
             WHERE id = ?1",
        )?;
        for id in &ids {
            update.execute(params![id, lease_expires, now_s])?;
        }
    }

    let mut claimed = Vec::with_capacity(ids.len());
    {
        let mut stmt = tx.prepare_cached(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE id = ?1"
        ))?;
        for id in &ids {
            claimed.push(stmt.query_row(params![id], movement_from_row)?);
        }
    }

    tx.commit()?;

    if !claimed.is_empty() {
        debug!(store_id = %store_id, count = claimed.len(), "Claimed movements");
    }

    Ok(claimed)
}

/// Require that a movement exists and is in the expected state.
fn require_status(
    conn: &Connection,
    id: &str,
    expected: MovementStatus,
    operation: &'static str,
) -> DatabaseResult<()> {
    let mut stmt = conn.prepare_cached("SELECT status FROM movements WHERE id = ?1")?;
    let result = stmt.query_row(params![id], |row| row.get::<_, String>(0));

    let status = match result {
        Ok(s) => MovementStatus::from_str(&s),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(DatabaseError::NotFound(format!("Movement {id} not found")));
        }
        Err(e) => return Err(e.into()),
    };

    if status != expected {
        return Err(DatabaseError::InvalidTransition {
            id: id.to_string(),
            operation,
            found: status.as_str(),
        });
    }

    Ok(())
}

fn updated_movement(conn: &Connection, id: &str) -> DatabaseResult<Movement> {
    get_movement(conn, id)?
        .ok_or_else(|| DatabaseError::NotFound(format!("Movement {id} not found")))
}

/// Mark a `processing` movement as completed.
pub fn complete_movement(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<Movement> {
    let tx = conn.unchecked_transaction()?;
    require_status(&tx, id, MovementStatus::Processing, "complete")?;

    tx.execute(
        "UPDATE movements
         SET status = 'completed', processed_at = ?2,
             next_attempt_at = NULL, error_message = NULL, lease_expires_at = NULL
         WHERE id = ?1",
        params![id, now.to_rfc3339()],
    )?;

    let movement = updated_movement(&tx, id)?;
    tx.commit()?;
    Ok(movement)
}

/// Return a `processing` movement to `pending` with a scheduled next attempt.
pub fn schedule_movement_retry(
    conn: &Connection,
    id: &str,
    next_attempt_at: DateTime<Utc>,
    error_message: &str,
) -> DatabaseResult<Movement> {
    let tx = conn.unchecked_transaction()?;
    require_status(&tx, id, MovementStatus::Processing, "schedule a retry for")?;

    tx.execute(
        "UPDATE movements
         SET status = 'pending', next_attempt_at = ?2, error_message = ?3,
             lease_expires_at = NULL
         WHERE id = ?1",
        params![id, next_attempt_at.to_rfc3339(), error_message],
    )?;

    let movement = updated_movement(&tx, id)?;
    tx.commit()?;
    Ok(movement)
}

/// Mark a `processing` movement as terminally failed.
pub fn fail_movement(conn: &Connection, id: &str, error_message: &str) -> DatabaseResult<Movement> {
    let tx = conn.unchecked_transaction()?;
    require_status(&tx, id, MovementStatus::Processing, "fail")?;

    tx.execute(
        "UPDATE movements
         SET status = 'failed', next_attempt_at = NULL, lease_expires_at = NULL,
             error_message = ?2
         WHERE id = ?1",
        params![id, error_message],
    )?;

    let movement = updated_movement(&tx, id)?;
    tx.commit()?;
    Ok(movement)
}

/// Manually requeue a `failed` movement for immediate dispatch.
///
/// Resets the attempt budget and bypasses backoff scheduling.
pub fn retry_movement(conn: &Connection, id: &str, now: DateTime<Utc>) -> DatabaseResult<Movement> {
    let tx = conn.unchecked_transaction()?;
    require_status(&tx, id, MovementStatus::Failed, "retry")?;

    tx.execute(
        "UPDATE movements
         SET status = 'pending', attempts = 0, error_message = NULL,
             next_attempt_at = ?2, lease_expires_at = NULL
         WHERE id = ?1",
        params![id, now.to_rfc3339()],
    )?;

    let movement = updated_movement(&tx, id)?;
    tx.commit()?;
    Ok(movement)
}

/// List movements matching a filter, newest first, with pagination metadata.
pub fn list_movements(conn: &Connection, filter: &MovementFilter) -> DatabaseResult<MovementPage> {
    let status_s = filter.status.map(|s| s.as_str().to_string());
    let type_s = filter.movement_type.map(|t| t.as_str().to_string());
    let from_s = filter.created_from.map(|d| d.to_rfc3339());
    let to_s = filter.created_to.map(|d| d.to_rfc3339());

    let mut clauses: Vec<&str> = Vec::new();
    let mut query_params: Vec<&dyn rusqlite::ToSql> = Vec::new();

    if let Some(ref s) = status_s {
        clauses.push("status = ?");
        query_params.push(s);
    }
    if let Some(ref t) = type_s {
        clauses.push("movement_type = ?");
        query_params.push(t);
    }
    if let Some(ref store) = filter.store_id {
        clauses.push("store_id = ?");
        query_params.push(store);
    }
    if let Some(ref from) = from_s {
        clauses.push("created_at >= ?");
        query_params.push(from);
    }
    if let Some(ref to) = to_s {
        clauses.push("created_at <= ?");
        query_params.push(to);
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM movements{where_sql}"),
        query_params.as_slice(),
        |row| row.get(0),
    )?;

    let limit = if filter.limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        filter.limit
    };
    let page = filter.page.max(1);
    let offset = (page as i64 - 1) * limit as i64;
    let limit_i = limit as i64;

    let mut stmt = conn.prepare(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM movements{where_sql}
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    ))?;
    query_params.push(&limit_i);
    query_params.push(&offset);

    let items = stmt
        .query_map(query_params.as_slice(), movement_from_row)?
        .collect::<Result<Vec<Movement>, _>>()?;

    let total_pages = if total == 0 {
        0
    } else {
        (total + limit_i - 1) / limit_i
    };

    Ok(MovementPage {
        items,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages,
        },
    })
}

/// Distinct store IDs that currently have claimable work.
///
/// Coarse signal for the dispatcher: the claim query applies the precise
/// per-SKU eligibility rules, so a listed store may still yield zero claims.
pub fn stores_with_due_movements(
    conn: &Connection,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT store_id FROM movements
         WHERE (status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1))
            OR (status = 'processing'
                AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?1)
         ORDER BY store_id ASC",
    )?;

    let rows = stmt.query_map(params![now.to_rfc3339()], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

/// Rolling operational snapshot, recomputed from the table on every call.
pub fn movement_stats(conn: &Connection, now: DateTime<Utc>) -> DatabaseResult<MovementStats> {
    let window_start = (now - chrono::Duration::hours(24)).to_rfc3339();

    let (pending, processing, completed_24h, failed_24h, unmapped_unresolved) = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM movements WHERE status = 'pending'),
            (SELECT COUNT(*) FROM movements WHERE status = 'processing'),
            (SELECT COUNT(*) FROM movements
              WHERE status = 'completed'
                AND processed_at IS NOT NULL AND processed_at >= ?1),
            (SELECT COUNT(*) FROM movements
              WHERE status = 'failed'
                AND last_attempt_at IS NOT NULL AND last_attempt_at >= ?1),
            (SELECT COUNT(*) FROM unmapped_skus WHERE resolved = 0)",
        params![window_start],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        },
    )?;

    let denominator = completed_24h + failed_24h;
    let success_rate = if denominator == 0 {
        1.0
    } else {
        completed_24h as f64 / denominator as f64
    };

    Ok(MovementStats {
        pending,
        processing,
        completed_24h,
        failed_24h,
        success_rate,
        unmapped_unresolved,
    })
}

// ==========================================
// Unmapped SKUs
// ==========================================

fn unmapped_from_row(row: &rusqlite::Row) -> rusqlite::Result<UnmappedSku> {
    Ok(UnmappedSku {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        store_id: row.get(2)?,
        sku: row.get(3)?,
        product_name: row.get(4)?,
        last_seen_at: parse_datetime(row.get::<_, String>(5)?),
        occurrences: row.get(6)?,
        resolved: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

const UNMAPPED_COLUMNS: &str =
    "id, tenant_id, store_id, sku, product_name, last_seen_at, occurrences, resolved, created_at";

/// Record an unmapped-SKU rejection, upserting by `(store_id, sku)`.
///
/// Re-encounters bump `occurrences` and `last_seen_at` but never reset
/// `resolved`: a resolved SKU reappearing signals a stale mapping fix.
pub fn upsert_unmapped_sku(
    conn: &Connection,
    tenant_id: &str,
    store_id: &str,
    sku: &str,
    product_name: Option<&str>,
    now: DateTime<Utc>,
) -> DatabaseResult<UnmappedSku> {
    let id = uuid::Uuid::new_v4().to_string();
    let now_s = now.to_rfc3339();

    conn.execute(
        "INSERT INTO unmapped_skus
            (id, tenant_id, store_id, sku, product_name, last_seen_at, occurrences, resolved, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0, ?6)
         ON CONFLICT(store_id, sku) DO UPDATE SET
            occurrences = occurrences + 1,
            last_seen_at = excluded.last_seen_at,
            product_name = COALESCE(excluded.product_name, unmapped_skus.product_name)",
        params![id, tenant_id, store_id, sku, product_name, now_s],
    )?;

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {UNMAPPED_COLUMNS} FROM unmapped_skus WHERE store_id = ?1 AND sku = ?2"
    ))?;
    Ok(stmt.query_row(params![store_id, sku], unmapped_from_row)?)
}

/// Get an unmapped-SKU record by ID.
pub fn get_unmapped_sku(conn: &Connection, id: &str) -> DatabaseResult<Option<UnmappedSku>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {UNMAPPED_COLUMNS} FROM unmapped_skus WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], unmapped_from_row);

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Mark an unmapped SKU as resolved. Idempotent; does not requeue movements.
pub fn resolve_unmapped_sku(conn: &Connection, id: &str) -> DatabaseResult<UnmappedSku> {
    let updated = conn.execute(
        "UPDATE unmapped_skus SET resolved = 1 WHERE id = ?1",
        params![id],
    )?;

    if updated == 0 {
        return Err(DatabaseError::NotFound(format!(
            "Unmapped SKU {id} not found"
        )));
    }

    get_unmapped_sku(conn, id)?
        .ok_or_else(|| DatabaseError::NotFound(format!("Unmapped SKU {id} not found")))
}

/// List unmapped SKUs, most recently seen first.
pub fn list_unmapped_skus(
    conn: &Connection,
    store_id: Option<&str>,
    include_resolved: bool,
) -> DatabaseResult<Vec<UnmappedSku>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut query_params: Vec<&dyn rusqlite::ToSql> = Vec::new();

    if let Some(ref store) = store_id {
        clauses.push("store_id = ?");
        query_params.push(store);
    }
    if !include_resolved {
        clauses.push("resolved = 0");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {UNMAPPED_COLUMNS} FROM unmapped_skus{where_sql} ORDER BY last_seen_at DESC"
    ))?;

    let rows = stmt.query_map(query_params.as_slice(), unmapped_from_row)?;
    Ok(rows.collect::<Result<Vec<UnmappedSku>, _>>()?)
}

// ==========================================
// Helpers
// ==========================================

/// Parse an RFC3339 datetime string, falling back to now.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
