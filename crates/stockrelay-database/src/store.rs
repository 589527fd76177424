//! High-level movement store shared by the dispatcher and IPC handlers.
//!
//! Wraps [`AsyncDatabase`] so callers work with owned domain values instead
//! of connection closures. All methods stamp the current time themselves;
//! the underlying query functions take explicit clocks for tests.

use crate::{
    queries, AsyncDatabase, DatabaseError, DatabaseResult, Movement, MovementFilter, MovementPage,
    MovementStats, NewMovement, UnmappedSku,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// Durable queue of outbound stock movements plus the unmapped-SKU registry.
#[derive(Clone)]
pub struct MovementStore {
    db: AsyncDatabase,
}

impl MovementStore {
    /// Open the store at the given database path, running migrations.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        Ok(Self {
            db: AsyncDatabase::open(path).await?,
        })
    }

    /// Wrap an already-open database.
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Access the underlying async database.
    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Validate and append a new movement in `pending` state.
    pub async fn append(&self, movement: NewMovement) -> DatabaseResult<Movement> {
        movement.validate().map_err(DatabaseError::Validation)?;
        self.db
            .call(move |conn| queries::insert_movement(conn, &movement))
            .await
    }

    /// Fetch one movement by ID.
    pub async fn get(&self, id: &str) -> DatabaseResult<Option<Movement>> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::get_movement(conn, &id))
            .await
    }

    /// Claim up to `limit` due movements for a store, leasing each for
    /// `lease`. See [`queries::claim_due_movements`] for the eligibility
    /// rules.
    pub async fn claim_due(
        &self,
        store_id: &str,
        limit: usize,
        lease: Duration,
    ) -> DatabaseResult<Vec<Movement>> {
        let store_id = store_id.to_string();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| DatabaseError::Validation(format!("Lease duration out of range: {e}")))?;
        self.db
            .call(move |conn| queries::claim_due_movements(conn, &store_id, limit, lease, Utc::now()))
            .await
    }

    /// Mark a claimed movement as successfully pushed.
    pub async fn complete(&self, id: &str) -> DatabaseResult<Movement> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::complete_movement(conn, &id, Utc::now()))
            .await
    }

    /// Return a claimed movement to `pending`, scheduled for a later attempt.
    pub async fn schedule_retry(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
        error_message: &str,
    ) -> DatabaseResult<Movement> {
        let id = id.to_string();
        let error_message = error_message.to_string();
        self.db
            .call(move |conn| {
                queries::schedule_movement_retry(conn, &id, next_attempt_at, &error_message)
            })
            .await
    }

    /// Mark a claimed movement as terminally failed.
    pub async fn fail(&self, id: &str, error_message: &str) -> DatabaseResult<Movement> {
        let id = id.to_string();
        let error_message = error_message.to_string();
        self.db
            .call(move |conn| queries::fail_movement(conn, &id, &error_message))
            .await
    }

    /// Manually requeue a failed movement with a fresh attempt budget.
    pub async fn retry(&self, id: &str) -> DatabaseResult<Movement> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::retry_movement(conn, &id, Utc::now()))
            .await
    }

    /// List movements matching the filter, newest first.
    pub async fn list(&self, filter: MovementFilter) -> DatabaseResult<MovementPage> {
        self.db
            .call(move |conn| queries::list_movements(conn, &filter))
            .await
    }

    /// Store IDs with claimable work right now.
    pub async fn stores_with_due_work(&self) -> DatabaseResult<Vec<String>> {
        self.db
            .call(|conn| queries::stores_with_due_movements(conn, Utc::now()))
            .await
    }

    /// Queue depth and rolling 24h outcome counters.
    pub async fn stats(&self) -> DatabaseResult<MovementStats> {
        self.db
            .call(|conn| queries::movement_stats(conn, Utc::now()))
            .await
    }

    /// Record that the platform rejected a SKU as unknown.
    pub async fn record_unmapped(
        &self,
        tenant_id: &str,
        store_id: &str,
        sku: &str,
        product_name: Option<&str>,
    ) -> DatabaseResult<UnmappedSku> {
        let tenant_id = tenant_id.to_string();
        let store_id = store_id.to_string();
        let sku = sku.to_string();
        let product_name = product_name.map(|s| s.to_string());
        self.db
            .call(move |conn| {
                queries::upsert_unmapped_sku(
                    conn,
                    &tenant_id,
                    &store_id,
                    &sku,
                    product_name.as_deref(),
                    Utc::now(),
                )
            })
            .await
    }

    /// Mark an unmapped SKU as handled by an operator.
    pub async fn resolve_sku(&self, id: &str) -> DatabaseResult<UnmappedSku> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::resolve_unmapped_sku(conn, &id))
            .await
    }

    /// Fetch one unmapped-SKU record by ID.
    pub async fn get_unmapped(&self, id: &str) -> DatabaseResult<Option<UnmappedSku>> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::get_unmapped_sku(conn, &id))
            .await
    }

    /// List unmapped SKUs, most recently seen first.
    pub async fn list_unmapped(
        &self,
        store_id: Option<String>,
        include_resolved: bool,
    ) -> DatabaseResult<Vec<UnmappedSku>> {
        self.db
            .call(move |conn| {
                queries::list_unmapped_skus(conn, store_id.as_deref(), include_resolved)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MovementStatus, MovementType};
    use tempfile::tempdir;

    async fn test_store() -> (tempfile::TempDir, MovementStore) {
        let dir = tempdir().unwrap();
        let store = MovementStore::open(&dir.path().join("stockrelay.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample(sku: &str) -> NewMovement {
        NewMovement {
            tenant_id: "t1".to_string(),
            store_id: "s1".to_string(),
            integration_id: "int-1".to_string(),
            movement_type: MovementType::Egreso,
            sku: sku.to_string(),
            quantity: 3,
            order_id: Some("order-1".to_string()),
            event_type: "order_paid".to_string(),
            metadata: serde_json::json!({}),
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn append_rejects_invalid_movements() {
        let (_dir, store) = test_store().await;

        let mut bad = sample("SKU-A");
        bad.quantity = 0;
        let err = store.append(bad).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        let mut blank = sample("  ");
        blank.quantity = 1;
        assert!(store.append(blank).await.is_err());
    }

    #[tokio::test]
    async fn claim_complete_lifecycle() {
        let (_dir, store) = test_store().await;
        let appended = store.append(sample("SKU-A")).await.unwrap();

        let claimed = store
            .claim_due("s1", 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, appended.id);
        assert_eq!(claimed[0].status, MovementStatus::Processing);

        let done = store.complete(&appended.id).await.unwrap();
        assert_eq!(done.status, MovementStatus::Completed);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed_24h, 1);
    }

    #[tokio::test]
    async fn unmapped_registry_roundtrip() {
        let (_dir, store) = test_store().await;

        let record = store
            .record_unmapped("t1", "s1", "SKU-GHOST", Some("Ghost Mug"))
            .await
            .unwrap();
        assert_eq!(record.occurrences, 1);

        let resolved = store.resolve_sku(&record.id).await.unwrap();
        assert!(resolved.resolved);

        let remaining = store.list_unmapped(Some("s1".to_string()), false).await.unwrap();
        assert!(remaining.is_empty());
    }
}
