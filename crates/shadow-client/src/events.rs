//! Diagnostic event recording
//!
//! Events are purely for humans running `kubectl describe shadow`; a failure
//! to record one never changes the outcome of a reconcile.

use crate::error::StoreError;
use crds::Shadow;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use tracing::debug;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Something went as expected
    Normal,
    /// Something needs a human's attention
    Warning,
}

impl EventType {
    /// Kubernetes wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

impl From<EventType> for KubeEventType {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        }
    }
}

/// Records diagnostic events against a Shadow
#[async_trait::async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record one event with a stable `reason` code and a free-form message
    async fn record(
        &self,
        shadow: &Shadow,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError>;
}

/// Event recorder publishing `events.k8s.io` Events through the API server
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// Create a recorder reporting as `controller`.
    ///
    /// The reporting instance is taken from `POD_NAME` when the controller
    /// runs in-cluster with the downward API.
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        shadow: &Shadow,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let reference = shadow.object_ref(&());
        let event = Event {
            type_: event_type.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        self.recorder.publish(&event, &reference).await?;
        debug!(
            "Recorded event: {} - {} for {}",
            event_type.as_str(),
            reason,
            reference.name.as_deref().unwrap_or("<unknown>")
        );
        Ok(())
    }
}
