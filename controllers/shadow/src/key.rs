//! Work keys.
//!
//! A work key names one Shadow as `namespace/name` (or just `name` for
//! cluster-scoped objects). The queue carries keys as plain strings; the
//! reconciler parses them back with [`ObjectKey::parse`].

use crate::error::ControllerError;
use kube::Resource;
use std::fmt;

/// Namespace and name of one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace; empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Creates a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, or `None` when it has no name yet
    pub fn for_object<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.clone()?;
        Some(Self::new(meta.namespace.clone().unwrap_or_default(), name))
    }

    /// Split `namespace/name` or `name` into a key.
    pub fn parse(key: &str) -> Result<Self, ControllerError> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", *name)),
            [namespace, name] if !name.is_empty() => Ok(Self::new(*namespace, *name)),
            _ => Err(ControllerError::InvalidKey(key.to_string())),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_key() {
        let key = ObjectKey::parse("default/a").unwrap();
        assert_eq!(key, ObjectKey::new("default", "a"));
        assert_eq!(key.to_string(), "default/a");
    }

    #[test]
    fn test_parse_cluster_scoped_key() {
        let key = ObjectKey::parse("a").unwrap();
        assert_eq!(key, ObjectKey::new("", "a"));
        assert_eq!(key.to_string(), "a");
    }

    #[test]
    fn test_parse_malformed_keys() {
        for bad in ["", "default/", "a/b/c", "/"] {
            assert!(
                matches!(ObjectKey::parse(bad), Err(ControllerError::InvalidKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_for_object_requires_name() {
        let mut shadow = crds::Shadow::new("a", crds::ShadowSpec::default());
        shadow.metadata.namespace = Some("default".into());
        assert_eq!(ObjectKey::for_object(&shadow), Some(ObjectKey::new("default", "a")));

        shadow.metadata.name = None;
        assert_eq!(ObjectKey::for_object(&shadow), None);
    }
}
