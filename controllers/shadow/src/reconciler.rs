//! Reconciliation logic for Shadow CRDs.
//!
//! One pass of [`Reconciler::sync`] takes a work key, re-reads current state
//! from the caches and performs the smallest corrective action:
//! 1. Parses the key (malformed keys are dropped)
//! 2. Loads the Shadow (already deleted means nothing to do)
//! 3. Validates `spec.podName`
//! 4. Creates the Pod if it is missing, or refuses to touch it if it is
//!    owned by someone else
//! 5. Records the sync result in the Shadow's status and as an event
//!
//! Passes are level-triggered and idempotent: against unchanged state a
//! second pass performs no writes.

use crate::error::ControllerError;
use crate::key::ObjectKey;
use crate::resources::{desired_pod, is_controlled_by};
use crds::{STATUS_SYNCED, Shadow};
use shadow_client::{DeclaredStore, EventRecorder, EventType, ManagedStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the controller reports events under
pub const CONTROLLER_AGENT_NAME: &str = "shadow-controller";

/// Event reason when a Shadow is synced successfully
pub const SUCCESS_SYNCED: &str = "Synced";

/// Event reason when the requested Pod exists but is not owned by the Shadow
pub const ERR_RESOURCE_EXISTS: &str = "ErrResourceExists";

/// Event message when a Shadow is synced successfully
pub const MESSAGE_RESOURCE_SYNCED: &str = "Shadow synced successfully";

/// Event message for a naming conflict with a foreign Pod
pub fn message_resource_exists(pod_name: &str) -> String {
    format!("Resource {pod_name:?} already exists and is not managed by Shadow")
}

/// Reconciles Shadow resources against their Pods.
pub struct Reconciler {
    shadows: Arc<dyn DeclaredStore>,
    pods: Arc<dyn ManagedStore>,
    recorder: Arc<dyn EventRecorder>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        shadows: Arc<dyn DeclaredStore>,
        pods: Arc<dyn ManagedStore>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            shadows,
            pods,
            recorder,
        }
    }

    /// Reconciles the Shadow named by `key`.
    ///
    /// `Ok(())` means the key is finished. Errors tell the caller whether to
    /// retry through [`ControllerError::is_retryable`].
    pub async fn sync(&self, key: &str) -> Result<(), ControllerError> {
        let key = ObjectKey::parse(key)?;

        let Some(shadow) = self.shadows.get(&key.namespace, &key.name).await? else {
            // Deletion is a valid terminal state
            info!(key = %key, "Shadow '{}' in work queue no longer exists", key);
            return Ok(());
        };

        let pod_name = shadow.spec.pod_name.as_str();
        if pod_name.is_empty() {
            return Err(ControllerError::InvalidSpec(format!(
                "{key}: pod name must be specified"
            )));
        }

        let pod = match self.pods.get(&key.namespace, pod_name).await? {
            Some(pod) => pod,
            None => {
                let desired = desired_pod(&shadow)?;
                info!(key = %key, pod = pod_name, "Creating Pod {}/{}", key.namespace, pod_name);
                Arc::new(self.pods.create(&desired).await?)
            }
        };

        if !is_controlled_by(&pod, &shadow) {
            let message = message_resource_exists(pod_name);
            warn!(key = %key, pod = pod_name, "{}", message);
            self.record(&shadow, EventType::Warning, ERR_RESOURCE_EXISTS, &message)
                .await;
            return Err(ControllerError::ResourceExists(pod_name.to_string()));
        }

        self.update_shadow_status(&key, &shadow).await?;

        self.record(&shadow, EventType::Normal, SUCCESS_SYNCED, MESSAGE_RESOURCE_SYNCED)
            .await;
        Ok(())
    }

    /// Writes `Synced` into the Shadow's status unless it is already there.
    async fn update_shadow_status(&self, key: &ObjectKey, shadow: &Shadow) -> Result<(), ControllerError> {
        if shadow.sync_status() == Some(STATUS_SYNCED) {
            debug!(key = %key, "Shadow status already up-to-date");
            return Ok(());
        }
        self.shadows
            .update_status(&key.namespace, &key.name, STATUS_SYNCED)
            .await?;
        info!(key = %key, "Updated Shadow {} status", key);
        Ok(())
    }

    async fn record(&self, shadow: &Shadow, event_type: EventType, reason: &str, message: &str) {
        if let Err(e) = self.recorder.record(shadow, event_type, reason, message).await {
            warn!("Failed to record {} event: {}", reason, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestHarness, create_test_pod, create_test_shadow};
    use shadow_client::WriteOp;

    #[tokio::test]
    async fn test_creates_missing_pod_and_marks_synced() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));

        h.reconciler.sync("default/a").await.unwrap();

        let pod = h.pods.object("default", "web").expect("pod created");
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, "nginx");
        assert_eq!(container.image.as_deref(), Some("nginx"));
        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.name, "a");

        assert_eq!(
            h.shadows.object("default", "a").unwrap().status.as_deref(),
            Some(STATUS_SYNCED)
        );
        assert_eq!(h.recorder.count(SUCCESS_SYNCED), 1);
    }

    #[tokio::test]
    async fn test_second_pass_performs_no_writes() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.reconciler.sync("default/a").await.unwrap();

        h.pods.clear_writes();
        h.shadows.clear_writes();
        h.reconciler.sync("default/a").await.unwrap();

        assert!(h.pods.writes().is_empty());
        assert!(h.shadows.writes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pod_name_is_dropped() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "b", "", "x"));

        let err = h.reconciler.sync("default/b").await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidSpec(_)));
        assert!(!err.is_retryable());
        assert!(h.pods.is_empty());
        assert!(h.pods.writes().is_empty());
        assert!(h.shadows.writes().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_pod_is_left_alone() {
        let h = TestHarness::new();
        let foreign = h.pods.insert(create_test_pod("default", "web", None));
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));

        let err = h.reconciler.sync("default/a").await.unwrap_err();

        assert!(matches!(err, ControllerError::ResourceExists(ref name) if name == "web"));
        assert!(err.is_retryable());
        assert!(h.pods.writes().is_empty());
        assert!(h.shadows.writes().is_empty());
        assert_eq!(h.pods.object("default", "web").unwrap(), foreign);

        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, ERR_RESOURCE_EXISTS);
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].message, message_resource_exists("web"));
    }

    #[tokio::test]
    async fn test_pod_owned_by_other_shadow_conflicts() {
        let h = TestHarness::new();
        let other = create_test_shadow("default", "other", "web", "nginx");
        h.pods.insert(desired_pod(&other).unwrap());
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));

        let err = h.reconciler.sync("default/a").await.unwrap_err();
        assert!(matches!(err, ControllerError::ResourceExists(_)));
        assert_eq!(h.recorder.count(ERR_RESOURCE_EXISTS), 1);
    }

    #[tokio::test]
    async fn test_deleted_shadow_is_success() {
        let h = TestHarness::new();

        h.reconciler.sync("default/gone").await.unwrap();

        assert!(h.pods.writes().is_empty());
        assert!(h.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_key_is_permanent() {
        let h = TestHarness::new();

        let err = h.reconciler.sync("a/b/c").await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidKey(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_failure_is_retryable() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.pods.fail_writes_with("apiserver unavailable");

        let err = h.reconciler.sync("default/a").await.unwrap_err();

        assert!(err.is_retryable());
        assert!(h.pods.is_empty());
        assert!(h.shadows.writes().is_empty());
        assert!(h.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_status_failure_is_retryable_and_pod_is_kept() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.shadows.fail_writes_with("conflict");

        let err = h.reconciler.sync("default/a").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(h.pods.object("default", "web").is_some());

        // retry after the store recovers does not create a second pod
        h.shadows.clear_failure();
        h.pods.clear_writes();
        h.reconciler.sync("default/a").await.unwrap();
        assert!(h.pods.writes().is_empty());
        assert_eq!(
            h.shadows.writes().last(),
            Some(&WriteOp::UpdateStatus("default".into(), "a".into(), STATUS_SYNCED.into()))
        );
    }

    #[tokio::test]
    async fn test_deleted_owned_pod_is_recreated() {
        let h = TestHarness::new();
        h.shadows.insert(create_test_shadow("default", "a", "web", "nginx"));
        h.reconciler.sync("default/a").await.unwrap();
        let original = h.pods.object("default", "web").unwrap();

        h.pods.remove("default", "web");
        h.reconciler.sync("default/a").await.unwrap();

        let recreated = h.pods.object("default", "web").expect("pod recreated");
        assert_eq!(recreated.spec, original.spec);
        assert_eq!(recreated.metadata.owner_references, original.metadata.owner_references);
    }

    #[tokio::test]
    async fn test_existing_owned_pod_is_adopted_without_create() {
        let h = TestHarness::new();
        let shadow = create_test_shadow("default", "a", "web", "nginx");
        h.pods.insert(desired_pod(&shadow).unwrap());
        h.shadows.insert(shadow);

        h.reconciler.sync("default/a").await.unwrap();

        assert!(h.pods.writes().is_empty());
        assert_eq!(h.recorder.count(SUCCESS_SYNCED), 1);
    }
}
