//! Async SQLite executor using a dedicated background thread.
//!
//! Queries are sent to a single SQLite thread through a channel, so the
//! Tokio runtime never blocks on database work and writes stay serialized
//! in FIFO order. Only SQL and lightweight row mapping belong inside
//! `call()`; platform pushes and other slow work run outside it.
//!
//! # Example
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//!
//! let page = db.call(|conn| {
//!     queries::list_movements(conn, &filter)
//! }).await?;
//! ```

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection closed".to_string()),
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file and parent directories if missing, enables WAL mode
    /// and performance pragmas, runs pending migrations, and starts the
    /// dedicated executor thread.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        let path_for_open = path_str.clone();

        info!(path = %path_str, "Opening async database");

        // Opening spawns the dedicated background thread.
        let conn = Connection::open(&path_for_open)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA cache_size = -64000;
                PRAGMA temp_store = MEMORY;
                PRAGMA mmap_size = 268435456;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path_str, "Async database initialized with WAL mode");

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's async
    /// task is parked (not blocked) until the result is ready.
    ///
    /// Keep the closure to SQL and row mapping. Network calls, file I/O,
    /// and heavy computation inside it starve every other query behind it
    /// on the single thread.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Wrap our DatabaseResult<T> inside the tokio_rusqlite Ok variant
        // and flatten after the await.
        let outer_result = self
            .conn
            .call(move |conn| {
                let inner_result = f(conn);
                Ok(inner_result)
            })
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    ///
    /// Convenience method for simple queries that only produce rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection.
    ///
    /// Waits for pending operations to complete, then shuts down the
    /// executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, MovementType, NewMovement};
    use tempfile::tempdir;

    fn sample(sku: &str) -> NewMovement {
        NewMovement {
            tenant_id: "t1".to_string(),
            store_id: "s1".to_string(),
            integration_id: "int-1".to_string(),
            movement_type: MovementType::Ingreso,
            sku: sku.to_string(),
            quantity: 1,
            order_id: None,
            event_type: "stock_adjustment".to_string(),
            metadata: serde_json::json!({}),
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn open_runs_migrations_and_reports_healthy() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());

        // The movements schema is ready without any further setup.
        let count: i64 = db
            .call_sqlite(|conn| {
                conn.query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn call_runs_domain_queries() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_query.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();

        let inserted = db
            .call(|conn| queries::insert_movement(conn, &sample("SKU-1")))
            .await
            .unwrap();

        let id = inserted.id.clone();
        let fetched = db
            .call(move |conn| queries::get_movement(conn, &id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.sku, "SKU-1");
    }

    #[tokio::test]
    async fn concurrent_appends_serialize_on_one_thread() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_concurrent.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();

        let mut handles = vec![];
        for i in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.call(move |conn| queries::insert_movement(conn, &sample(&format!("SKU-{i}"))))
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i64 = db
            .call_sqlite(|conn| {
                conn.query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 10);
    }
}
