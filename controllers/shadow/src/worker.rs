//! Reconcile workers.
//!
//! Each worker loops `get -> sync -> forget | add_rate_limited -> done`
//! until the queue shuts down. A failing key is retried with back-off while
//! other keys keep flowing.

use crate::metrics::{Metrics, ReconcileResult};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One reconcile worker
#[derive(Clone)]
pub struct Worker {
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    max_retries: Option<u32>,
}

impl Worker {
    /// Creates a new worker instance.
    pub fn new(
        queue: WorkQueue<String>,
        reconciler: Arc<Reconciler>,
        metrics: Arc<Metrics>,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            queue,
            reconciler,
            metrics,
            max_retries,
        }
    }

    /// Process keys until the queue shuts down
    pub async fn run(self, id: usize) {
        debug!(worker = id, "Worker started");
        while self.process_next_work_item().await {}
        debug!(worker = id, "Worker stopped");
    }

    /// Take one key from the queue and reconcile it.
    ///
    /// Returns `false` once the queue is shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let started = Instant::now();
        let result = match self.reconciler.sync(&key).await {
            Ok(()) => {
                self.queue.forget(&key);
                info!(key = %key, "Successfully synced '{}'", key);
                ReconcileResult::Success
            }
            Err(e) if e.is_retryable() => {
                let failures = self.queue.num_requeues(&key);
                if self.max_retries.is_some_and(|max| failures >= max) {
                    self.queue.forget(&key);
                    error!(key = %key, failures, "Dropping '{}' after repeated failures: {}", key, e);
                    ReconcileResult::Dropped
                } else {
                    warn!(key = %key, failures, "Error syncing '{}', requeuing: {}", key, e);
                    self.queue.add_rate_limited(key.clone());
                    ReconcileResult::Retry
                }
            }
            Err(e) => {
                self.queue.forget(&key);
                error!(key = %key, "Error syncing '{}', not retrying: {}", key, e);
                ReconcileResult::Dropped
            }
        };
        self.metrics.record_reconcile(result, started.elapsed());

        self.queue.done(&key);
        self.metrics.set_queue_depth(self.queue.len());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ExponentialBackoff;
    use crate::dispatcher::{Change, Dispatcher, Notification, Observed};
    use crate::test_utils::{TestHarness, create_test_pod, create_test_shadow};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::time::Duration;

    fn worker(h: &TestHarness, queue: &WorkQueue<String>, max_retries: Option<u32>) -> (Worker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let worker = Worker::new(queue.clone(), h.reconciler.clone(), metrics.clone(), max_retries);
        (worker, metrics)
    }

    fn foreign_owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            name: "web-5d9c".into(),
            uid: "rs-uid".into(),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_forgets_key() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, metrics) = worker(&h, &queue, None);

        queue.add("default/a".to_string());
        assert!(worker.process_next_work_item().await);

        assert!(h.pods.object("default", "web").is_some());
        assert_eq!(queue.num_requeues(&"default/a".to_string()), 0);
        assert!(queue.is_empty());
        assert_eq!(metrics.reconcile_count(ReconcileResult::Success), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_dropped() {
        let h = TestHarness::new();
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, metrics) = worker(&h, &queue, None);

        queue.add("a/b/c".to_string());
        assert!(worker.process_next_work_item().await);

        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&"a/b/c".to_string()), 0);
        assert_eq!(metrics.reconcile_count(ReconcileResult::Dropped), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_retries_until_resolved() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.pods.insert(create_test_pod("default", "web", Some(foreign_owner())));
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, metrics) = worker(&h, &queue, None);
        let key = "default/a".to_string();

        queue.add(key.clone());
        assert!(worker.process_next_work_item().await);
        assert_eq!(queue.num_requeues(&key), 1);
        assert_eq!(metrics.reconcile_count(ReconcileResult::Retry), 1);

        // the foreign Pod goes away; the retry creates ours
        h.pods.remove("default", "web");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(worker.process_next_work_item().await);

        assert_eq!(queue.num_requeues(&key), 0);
        assert!(h.pods.object("default", "web").is_some());
        assert_eq!(metrics.reconcile_count(ReconcileResult::Success), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_drops_key() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.pods.insert(create_test_pod("default", "web", Some(foreign_owner())));
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, metrics) = worker(&h, &queue, Some(1));
        let key = "default/a".to_string();

        queue.add(key.clone());
        assert!(worker.process_next_work_item().await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(worker.process_next_work_item().await);

        assert_eq!(metrics.reconcile_count(ReconcileResult::Retry), 1);
        assert_eq!(metrics.reconcile_count(ReconcileResult::Dropped), 1);
        assert_eq!(queue.num_requeues(&key), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failing_key_does_not_block_others() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.shadows.insert(create_test_shadow("default", "b", "api", "nginx"));
        h.pods.insert(create_test_pod("default", "web", Some(foreign_owner())));
        let queue = WorkQueue::new(ExponentialBackoff::new(
            Duration::from_secs(60),
            Duration::from_secs(600),
        ));
        let (worker, _) = worker(&h, &queue, None);

        queue.add("default/a".to_string());
        queue.add("default/b".to_string());
        assert!(worker.process_next_work_item().await);
        assert!(worker.process_next_work_item().await);

        assert!(h.pods.object("default", "api").is_some());
    }

    #[tokio::test]
    async fn test_returns_false_after_shutdown() {
        let h = TestHarness::new();
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, _) = worker(&h, &queue, None);

        queue.shut_down();
        assert!(!worker.process_next_work_item().await);
    }

    #[tokio::test]
    async fn test_deleted_pod_is_recreated() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        let queue = WorkQueue::new(ExponentialBackoff::default());
        let (worker, _) = worker(&h, &queue, None);
        let dispatcher = Dispatcher::new(queue.clone(), Arc::new(h.shadows.clone()));

        queue.add("default/a".to_string());
        worker.process_next_work_item().await;
        let created = h.pods.object("default", "web").unwrap();

        // someone deletes the Pod; the watch reports its final state
        h.pods.remove("default", "web");
        dispatcher
            .dispatch(Notification::Pod(Change::Deleted(Observed::Live(Arc::new(created)))))
            .await;
        assert_eq!(queue.len(), 1);
        worker.process_next_work_item().await;

        assert!(h.pods.object("default", "web").is_some());
    }
}
