//! Desired managed objects and ownership checks.
//!
//! Everything here is pure: no I/O, no clock, no randomness.

use crate::error::ControllerError;
use crds::Shadow;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

/// Build the Pod a Shadow asks for.
///
/// The Pod is named `spec.podName`, lives in the Shadow's namespace and
/// carries a controller owner reference back to the Shadow so the API server
/// garbage-collects it when the Shadow goes away.
///
/// The single container's *name* is the image string, not the pod name.
/// Existing Pods were created that way, so it is kept as-is.
pub fn desired_pod(shadow: &Shadow) -> Result<Pod, ControllerError> {
    let owner = shadow.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::MissingMetadata(format!(
            "Shadow {} has no name or uid to own a Pod",
            shadow.name_any()
        ))
    })?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(shadow.spec.pod_name.clone()),
            namespace: shadow.namespace(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: shadow.spec.image.clone(),
                image: Some(shadow.spec.image.clone()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The controlling owner reference of an object, if it has exactly one
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    let mut controllers = meta
        .owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.controller == Some(true));
    let first = controllers.next()?;
    match controllers.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// True iff `pod`'s sole controlling owner is `shadow` (kind, name and uid)
pub fn is_controlled_by(pod: &Pod, shadow: &Shadow) -> bool {
    let Some(owner) = controller_of(&pod.metadata) else {
        return false;
    };
    let Some(uid) = shadow.meta().uid.as_deref() else {
        return false;
    };
    owner.kind == Shadow::kind(&())
        && owner.uid == uid
        && shadow.meta().name.as_deref() == Some(owner.name.as_str())
}
