//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and wiring a
//! reconciler to in-memory stores.

use crate::reconciler::Reconciler;
use crds::{Shadow, ShadowSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use shadow_client::{MockEventRecorder, MockStore};
use std::sync::Arc;

/// Helper to create a test Shadow with a stable uid
pub fn create_test_shadow(namespace: &str, name: &str, pod_name: &str, image: &str) -> Shadow {
    Shadow {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: ShadowSpec {
            pod_name: pod_name.to_string(),
            image: image.to_string(),
        },
        status: None,
    }
}

/// Helper to create a test Pod with an optional owner reference
pub fn create_test_pod(namespace: &str, name: &str, owner: Option<OwnerReference>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o]),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                image: Some("busybox".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Reconciler wired to fresh mock stores
pub struct TestHarness {
    pub reconciler: Arc<Reconciler>,
    pub shadows: MockStore<Shadow>,
    pub pods: MockStore<Pod>,
    pub recorder: MockEventRecorder,
}

impl TestHarness {
    /// Creates a harness with empty stores.
    pub fn new() -> Self {
        let shadows = MockStore::<Shadow>::new();
        let pods = MockStore::<Pod>::new();
        let recorder = MockEventRecorder::new();
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(shadows.clone()),
            Arc::new(pods.clone()),
            Arc::new(recorder.clone()),
        ));
        Self {
            reconciler,
            shadows,
            pods,
            recorder,
        }
    }
}
