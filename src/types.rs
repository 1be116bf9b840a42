//! Shared supporting types: qualified names and per-operation outcomes

use std::fmt;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

/// A namespace-qualified resource name
///
/// Cluster-scoped resources have no namespace and render as a bare name;
/// namespaced resources render as `namespace/name`, matching the key format
/// used by the per-cluster caches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace, absent for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
}

impl QualifiedName {
    /// Create a qualified name from its parts
    pub fn new(namespace: Option<impl Into<String>>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(Into::into),
            name: name.into(),
        }
    }

    /// Derive the qualified name of an object from its metadata
    ///
    /// Objects without a `metadata.name` yield an empty name; the caller is
    /// expected to have validated the object before dispatching it.
    pub fn from_obj(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Outcome of a single per-cluster operation
///
/// Produced by operation closures and aggregated by the dispatcher. Only
/// [`ReconciliationStatus::AllOk`] counts as success for the pass; every other
/// value marks the pass as not fully successful. The recheck variants are not
/// hard failures - they tell the caller to re-derive desired state on the next
/// reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconciliationStatus {
    /// The operation succeeded
    AllOk,
    /// The operation failed; the failure was recorded where it happened
    Error,
    /// Object metadata must be re-read before the next attempt
    RecheckMeta,
    /// The remote resource changed underneath us; re-derive next pass
    RecheckResource,
    /// Creation found the resource already present in the cluster
    AlreadyExists,
}

impl ReconciliationStatus {
    /// Whether this outcome counts toward a fully successful pass
    pub fn is_ok(self) -> bool {
        matches!(self, ReconciliationStatus::AllOk)
    }
}
