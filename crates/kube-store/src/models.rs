//! Shared store types

use kube::{Resource, ResourceExt};
use std::fmt;

/// Namespace + name identifying a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key from a namespace and a name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object, `None` if it has no name or namespace
    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> {
        let name = obj.meta().name.clone()?;
        let namespace = obj.namespace()?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Outcome of a create-or-update call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationResult {
    /// Object did not exist and was created
    Created,
    /// Object existed and the mutation hook changed it
    Updated,
    /// Object existed and was left as is
    Unchanged,
}

impl OperationResult {
    /// Lowercase name, used in logs and metric labels
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
            OperationResult::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation hook applied by create-or-update.
///
/// Receives the object about to be written: the desired object on create, a
/// copy of the live object on update. The update is only sent when the hook
/// changed the copy.
pub type Mutation<K> = dyn Fn(&mut K) -> Result<(), crate::StoreError> + Send + Sync;
