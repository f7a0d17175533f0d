//! Shadow CRD
//!
//! Declares a single Pod that the Shadow controller creates and keeps alive
//! on the owner's behalf.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group served by the Shadow CRD
pub const GROUP: &str = "burghardt.tech";

/// API version served by the Shadow CRD
pub const VERSION: &str = "v1";

/// Kind of the Shadow CRD, as it appears in owner references
pub const KIND: &str = "Shadow";

/// Plural resource name
pub const PLURAL: &str = "shadows";

/// Status value written once the managed Pod exists and is owned
pub const STATUS_SYNCED: &str = "Synced";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "burghardt.tech",
    version = "v1",
    kind = "Shadow",
    plural = "shadows",
    singular = "shadow",
    shortname = "sh",
    namespaced,
    status = "String",
    printcolumn = r#"{"name":"Pod", "type":"string", "jsonPath":".spec.podName"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShadowSpec {
    /// Name of the Pod to create in the Shadow's namespace.
    ///
    /// Must be non-empty; a Shadow with an empty pod name is never reconciled.
    #[serde(default)]
    pub pod_name: String,

    /// Container image reference for the Pod's single container
    #[serde(default)]
    pub image: String,
}

impl Shadow {
    /// Last recorded sync result, if any
    pub fn sync_status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}
