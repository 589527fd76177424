//! Poll-and-claim dispatcher that drains the movement queue.
//!
//! One dispatcher task serves every store: each tick it claims due
//! movements per store and pushes them through the adapter. The claim
//! query hands out at most one movement per `(store, SKU)` line, so pushes
//! for the same SKU are strictly serialized in creation order without any
//! in-process bookkeeping.

use crate::backoff::{self, BackoffConfig, RetryDecision};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stockrelay_adapter::{IntegrationAdapter, PushOutcome};
use stockrelay_database::{DatabaseError, Movement, MovementStore};
use tokio::sync::broadcast;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum movements claimed per store per cycle.
    pub batch_size: usize,
    /// Time between poll cycles.
    pub poll_interval: Duration,
    /// How long a claim holds a movement before another worker may take it.
    pub lease: Duration,
    /// Upper bound on a single adapter push.
    pub adapter_timeout: Duration,
    /// Retry delay curve for transient failures.
    pub backoff: BackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            poll_interval: Duration::from_secs(5),
            lease: Duration::from_secs(120),
            adapter_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Movements claimed this cycle.
    pub claimed: usize,
    /// Movements completed.
    pub completed: usize,
    /// Movements returned to pending with a scheduled retry.
    pub retried: usize,
    /// Movements failed terminally.
    pub failed: usize,
}

/// Background worker that pushes due movements to the platform.
#[derive(Clone)]
pub struct Dispatcher {
    store: MovementStore,
    adapter: Arc<dyn IntegrationAdapter>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        store: MovementStore,
        adapter: Arc<dyn IntegrationAdapter>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            config,
        }
    }

    /// Spawn the poll loop. The task runs until the shutdown channel fires.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.clone();

        tokio::spawn(async move {
            info!(
                adapter = dispatcher.adapter.name(),
                poll_interval_ms = dispatcher.config.poll_interval.as_millis() as u64,
                batch_size = dispatcher.config.batch_size,
                "Dispatcher started"
            );

            let mut ticker = interval(dispatcher.config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = dispatcher.run_cycle().await;
                        if stats.claimed > 0 {
                            debug!(
                                claimed = stats.claimed,
                                completed = stats.completed,
                                retried = stats.retried,
                                failed = stats.failed,
                                "Dispatch cycle finished"
                            );
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Run one poll cycle: claim due movements per store and push each one.
    ///
    /// Errors inside a cycle are logged and never abort it; the next tick
    /// starts from current database state.
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        let store_ids = match self.store.stores_with_due_work().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list stores with due work");
                return stats;
            }
        };

        for store_id in store_ids {
            let claimed = match self
                .store
                .claim_due(&store_id, self.config.batch_size, self.config.lease)
                .await
            {
                Ok(movements) => movements,
                Err(e) => {
                    warn!(store_id = %store_id, error = %e, "Failed to claim movements");
                    continue;
                }
            };

            for movement in claimed {
                stats.claimed += 1;
                self.process_movement(movement, &mut stats).await;
            }
        }

        stats
    }

    async fn process_movement(&self, movement: Movement, stats: &mut CycleStats) {
        let outcome = match timeout(self.config.adapter_timeout, self.adapter.push(&movement)).await
        {
            Ok(outcome) => outcome,
            Err(_) => PushOutcome::Transient(format!(
                "adapter timed out after {}s",
                self.config.adapter_timeout.as_secs()
            )),
        };

        debug!(
            movement_id = %movement.id,
            sku = %movement.sku,
            attempt = movement.attempts,
            outcome = outcome.label(),
            "Push attempt finished"
        );

        match outcome {
            PushOutcome::Success => match self.store.complete(&movement.id).await {
                Ok(_) => {
                    stats.completed += 1;
                    info!(
                        movement_id = %movement.id,
                        store_id = %movement.store_id,
                        sku = %movement.sku,
                        "Movement completed"
                    );
                }
                Err(e) => log_transition_error(&movement, "complete", &e),
            },

            PushOutcome::Transient(reason) => {
                let decision = backoff::decide(
                    movement.attempts,
                    movement.max_attempts,
                    &self.config.backoff,
                    &mut rand::thread_rng(),
                );

                match decision {
                    RetryDecision::RetryAfter(delay) => {
                        let next_attempt = Utc::now() + delay;
                        match self
                            .store
                            .schedule_retry(&movement.id, next_attempt, &reason)
                            .await
                        {
                            Ok(_) => {
                                stats.retried += 1;
                                warn!(
                                    movement_id = %movement.id,
                                    sku = %movement.sku,
                                    attempt = movement.attempts,
                                    delay_ms = delay.num_milliseconds(),
                                    error = %reason,
                                    "Push failed, retry scheduled"
                                );
                            }
                            Err(e) => log_transition_error(&movement, "schedule_retry", &e),
                        }
                    }
                    RetryDecision::GiveUp => match self.store.fail(&movement.id, &reason).await {
                        Ok(_) => {
                            stats.failed += 1;
                            error!(
                                movement_id = %movement.id,
                                sku = %movement.sku,
                                attempts = movement.attempts,
                                error = %reason,
                                "Movement failed, attempt budget exhausted"
                            );
                        }
                        Err(e) => log_transition_error(&movement, "fail", &e),
                    },
                }
            }

            PushOutcome::UnmappedSku(reason) => {
                let error_message = format!("unmapped_sku: {reason}");
                match self.store.fail(&movement.id, &error_message).await {
                    Ok(_) => {
                        stats.failed += 1;
                        warn!(
                            movement_id = %movement.id,
                            store_id = %movement.store_id,
                            sku = %movement.sku,
                            "Platform does not know this SKU, movement failed"
                        );
                    }
                    Err(e) => log_transition_error(&movement, "fail", &e),
                }

                let product_name = movement
                    .metadata
                    .get("product_name")
                    .and_then(|v| v.as_str());
                if let Err(e) = self
                    .store
                    .record_unmapped(
                        &movement.tenant_id,
                        &movement.store_id,
                        &movement.sku,
                        product_name,
                    )
                    .await
                {
                    warn!(
                        movement_id = %movement.id,
                        sku = %movement.sku,
                        error = %e,
                        "Failed to record unmapped SKU"
                    );
                }
            }

            PushOutcome::Permanent(reason) => match self.store.fail(&movement.id, &reason).await {
                Ok(_) => {
                    stats.failed += 1;
                    error!(
                        movement_id = %movement.id,
                        sku = %movement.sku,
                        error = %reason,
                        "Platform rejected movement permanently"
                    );
                }
                Err(e) => log_transition_error(&movement, "fail", &e),
            },
        }
    }
}

/// A rejected transition usually means the lease expired mid-push and
/// another worker already resolved the row. Log and move on.
fn log_transition_error(movement: &Movement, operation: &str, error: &DatabaseError) {
    warn!(
        movement_id = %movement.id,
        operation = operation,
        error = %error,
        "State transition rejected, leaving row as is"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use stockrelay_database::{MovementStatus, MovementType, NewMovement};
    use tempfile::tempdir;

    /// Adapter double that replays a scripted outcome per push.
    struct ScriptedAdapter {
        script: Mutex<VecDeque<PushOutcome>>,
        pushed: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(outcomes: Vec<PushOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.into()),
                pushed: Mutex::new(Vec::new()),
            })
        }

        fn pushed_skus(&self) -> Vec<String> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IntegrationAdapter for ScriptedAdapter {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn push(&self, movement: &Movement) -> PushOutcome {
            self.pushed.lock().unwrap().push(movement.sku.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PushOutcome::Success)
        }
    }

    /// Adapter double that never resolves; exercises the timeout path.
    struct HangingAdapter;

    #[async_trait]
    impl IntegrationAdapter for HangingAdapter {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn push(&self, _movement: &Movement) -> PushOutcome {
            std::future::pending().await
        }
    }

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            batch_size: 25,
            poll_interval: Duration::from_millis(10),
            lease: Duration::from_secs(60),
            adapter_timeout: Duration::from_secs(5),
            // Zero backoff keeps scheduled retries immediately due, so a
            // test can drive the full retry ladder with run_cycle calls.
            backoff: BackoffConfig {
                base: Duration::ZERO,
                max: Duration::ZERO,
            },
        }
    }

    async fn test_store() -> (tempfile::TempDir, MovementStore) {
        let dir = tempdir().unwrap();
        let store = MovementStore::open(&dir.path().join("stockrelay.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    fn new_movement(sku: &str, max_attempts: i32) -> NewMovement {
        NewMovement {
            tenant_id: "t1".to_string(),
            store_id: "store-1".to_string(),
            integration_id: "int-1".to_string(),
            movement_type: MovementType::Egreso,
            sku: sku.to_string(),
            quantity: 1,
            order_id: Some("order-1".to_string()),
            event_type: "order_paid".to_string(),
            metadata: serde_json::json!({"product_name": "Blue Mug"}),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn successful_push_completes_movement() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![PushOutcome::Success]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        let appended = store.append(new_movement("SKU-A", 5)).await.unwrap();

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);

        let movement = store.get(&appended.id).await.unwrap().unwrap();
        assert_eq!(movement.status, MovementStatus::Completed);
        assert!(movement.processed_at.is_some());
        assert_eq!(adapter.pushed_skus(), vec!["SKU-A"]);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_attempt_budget() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![
            PushOutcome::Transient("HTTP 503".to_string()),
            PushOutcome::Transient("HTTP 503".to_string()),
            PushOutcome::Transient("HTTP 503".to_string()),
        ]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        let appended = store.append(new_movement("SKU-A", 3)).await.unwrap();

        // Attempts 1 and 2 reschedule.
        for expected_attempts in 1..=2 {
            let stats = dispatcher.run_cycle().await;
            assert_eq!(stats.retried, 1, "attempt {expected_attempts} should retry");

            let movement = store.get(&appended.id).await.unwrap().unwrap();
            assert_eq!(movement.status, MovementStatus::Pending);
            assert_eq!(movement.attempts, expected_attempts);
            assert_eq!(movement.error_message.as_deref(), Some("HTTP 503"));
        }

        // Attempt 3 hits the budget and fails terminally.
        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.failed, 1);

        let movement = store.get(&appended.id).await.unwrap().unwrap();
        assert_eq!(movement.status, MovementStatus::Failed);
        assert_eq!(movement.attempts, 3);
        assert_eq!(movement.error_message.as_deref(), Some("HTTP 503"));

        // No further cycles touch it.
        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.claimed, 0);
        assert_eq!(adapter.pushed_skus().len(), 3);
    }

    #[tokio::test]
    async fn unmapped_sku_fails_immediately_and_feeds_the_registry() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![PushOutcome::UnmappedSku(
            "SKU-GHOST not in catalog".to_string(),
        )]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        let appended = store.append(new_movement("SKU-GHOST", 5)).await.unwrap();

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);

        let movement = store.get(&appended.id).await.unwrap().unwrap();
        assert_eq!(movement.status, MovementStatus::Failed);
        assert!(movement
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("unmapped_sku:"));
        // Attempt budget was not consumed by retries.
        assert_eq!(movement.attempts, 1);

        let registry = store.list_unmapped(None, true).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0].sku, "SKU-GHOST");
        assert_eq!(registry[0].occurrences, 1);
        assert_eq!(registry[0].product_name.as_deref(), Some("Blue Mug"));
    }

    #[tokio::test]
    async fn repeated_unmapped_sku_bumps_occurrences() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![
            PushOutcome::UnmappedSku("unknown".to_string()),
            PushOutcome::UnmappedSku("unknown".to_string()),
        ]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        store.append(new_movement("SKU-GHOST", 5)).await.unwrap();
        dispatcher.run_cycle().await;
        store.append(new_movement("SKU-GHOST", 5)).await.unwrap();
        dispatcher.run_cycle().await;

        let registry = store.list_unmapped(None, true).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0].occurrences, 2);
    }

    #[tokio::test]
    async fn permanent_rejection_fails_without_retry() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![PushOutcome::Permanent(
            "HTTP 422: negative stock".to_string(),
        )]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        let appended = store.append(new_movement("SKU-A", 5)).await.unwrap();

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.failed, 1);

        let movement = store.get(&appended.id).await.unwrap().unwrap();
        assert_eq!(movement.status, MovementStatus::Failed);
        assert_eq!(movement.attempts, 1);
        assert_eq!(
            movement.error_message.as_deref(),
            Some("HTTP 422: negative stock")
        );
    }

    #[tokio::test]
    async fn adapter_timeout_classifies_as_transient() {
        let (_dir, store) = test_store().await;
        let mut config = test_config();
        config.adapter_timeout = Duration::from_millis(50);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(HangingAdapter), config);

        let appended = store.append(new_movement("SKU-A", 5)).await.unwrap();

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.retried, 1);

        let movement = store.get(&appended.id).await.unwrap().unwrap();
        assert_eq!(movement.status, MovementStatus::Pending);
        assert_eq!(movement.attempts, 1);
        assert!(movement.error_message.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn same_sku_movements_dispatch_one_per_cycle_in_order() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![]);
        let dispatcher = Dispatcher::new(store.clone(), adapter.clone(), test_config());

        let first = store.append(new_movement("SKU-A", 5)).await.unwrap();
        let second = store.append(new_movement("SKU-A", 5)).await.unwrap();

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(
            store.get(&first.id).await.unwrap().unwrap().status,
            MovementStatus::Completed
        );
        assert_eq!(
            store.get(&second.id).await.unwrap().unwrap().status,
            MovementStatus::Pending
        );

        let stats = dispatcher.run_cycle().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(
            store.get(&second.id).await.unwrap().unwrap().status,
            MovementStatus::Completed
        );
    }

    #[tokio::test]
    async fn idle_cycle_reports_zero_counters() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![]);
        let dispatcher = Dispatcher::new(store, adapter, test_config());

        assert_eq!(dispatcher.run_cycle().await, CycleStats::default());
    }

    #[tokio::test]
    async fn start_stops_on_shutdown_signal() {
        let (_dir, store) = test_store().await;
        let adapter = ScriptedAdapter::new(vec![]);
        let dispatcher = Dispatcher::new(store, adapter, test_config());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = dispatcher.start(shutdown_rx);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
