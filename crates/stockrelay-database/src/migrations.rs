//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(
        current_version,
        target_version = CURRENT_VERSION,
        "Running migrations"
    );

    if current_version < 1 {
        migrate_v1_movements(conn)?;
    }
    if current_version < 2 {
        migrate_v2_unmapped_skus(conn)?;
    }
    if current_version < 3 {
        migrate_v3_claim_leases(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: movements table - the durable outbound queue.
fn migrate_v1_movements(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: movements");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS movements (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            store_id TEXT NOT NULL,
            integration_id TEXT NOT NULL,
            movement_type TEXT NOT NULL,
            sku TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            order_id TEXT,
            event_type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            last_attempt_at TEXT,
            next_attempt_at TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_movements_store_sku_created
            ON movements(store_id, sku, created_at);
        CREATE INDEX IF NOT EXISTS idx_movements_status_next_attempt
            ON movements(status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_movements_store_status
            ON movements(store_id, status);
        ",
    )?;

    record_migration(conn, 1, "movements")
}

/// V2: unmapped_skus table - SKUs the platform rejected as unknown.
fn migrate_v2_unmapped_skus(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: unmapped_skus");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS unmapped_skus (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            store_id TEXT NOT NULL,
            sku TEXT NOT NULL,
            product_name TEXT,
            last_seen_at TEXT NOT NULL,
            occurrences INTEGER NOT NULL DEFAULT 1,
            resolved INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(store_id, sku)
        );

        CREATE INDEX IF NOT EXISTS idx_unmapped_skus_resolved
            ON unmapped_skus(resolved, last_seen_at);
        ",
    )?;

    record_migration(conn, 2, "unmapped_skus")
}

/// V3: claim leases - fences abandoned `processing` rows so another worker
/// can reclaim them after the lease deadline.
fn migrate_v3_claim_leases(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: claim_leases");

    conn.execute_batch(
        "
        ALTER TABLE movements ADD COLUMN lease_expires_at TEXT;

        CREATE INDEX IF NOT EXISTS idx_movements_lease
            ON movements(status, lease_expires_at);
        ",
    )?;

    record_migration(conn, 3, "claim_leases")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_from_scratch() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_VERSION as i64);
    }

    #[test]
    fn movements_table_has_lease_column() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();

        // Insert exercising every column, including the v3 lease column.
        conn.execute(
            "INSERT INTO movements (id, tenant_id, store_id, integration_id, movement_type,
             sku, quantity, event_type, created_at, lease_expires_at)
             VALUES ('m1', 't1', 's1', 'i1', 'ingreso', 'A', 1, 'test',
             '2026-01-01T00:00:00+00:00', NULL)",
            [],
        )
        .unwrap();

        let status: String = conn
            .query_row("SELECT status FROM movements WHERE id = 'm1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "pending");
    }

    #[test]
    fn unmapped_skus_unique_per_store_and_sku() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO unmapped_skus (id, tenant_id, store_id, sku, last_seen_at, created_at)
             VALUES ('u1', 't1', 's1', 'A', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO unmapped_skus (id, tenant_id, store_id, sku, last_seen_at, created_at)
             VALUES ('u2', 't1', 's1', 'A', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        );
        assert!(dup.is_err());

        // Same SKU in a different store is fine.
        conn.execute(
            "INSERT INTO unmapped_skus (id, tenant_id, store_id, sku, last_seen_at, created_at)
             VALUES ('u3', 't1', 's2', 'A', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
    }
}
