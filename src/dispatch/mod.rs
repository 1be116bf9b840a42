//! Concurrent per-cluster operation dispatch
//!
//! A reconciliation pass fans the same logical operation out to many member
//! clusters at once and then joins on the aggregate outcome. The
//! [`OperationDispatcher`] is the counting core; [`UnmanagedDispatcher`] and
//! [`ManagedDispatcher`] layer the actual resource verbs on top of it.
//!
//! Dispatchers are single-use: one reconciliation pass per instance.

pub mod managed;
pub mod operation;
pub mod unmanaged;

use std::fmt;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::client::ResourceClient;
use crate::error::Error;
use crate::Result;

pub use managed::ManagedDispatcher;
pub use operation::{OperationDispatcher, OperationFn};
pub use unmanaged::UnmanagedDispatcher;

/// Resolves a ready cluster's name to a client for the target resource
///
/// Typically backed by
/// [`FederatedInformer::get_client_for_cluster`](crate::informer::FederatedInformer::get_client_for_cluster);
/// tests substitute fakes.
pub type ClientAccessor = Arc<dyn Fn(&str) -> Result<Arc<dyn ResourceClient>> + Send + Sync>;

/// Why a per-cluster operation failed, for status reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagationReason {
    /// No client could be built for the target cluster
    ClientRetrievalFailed,
    /// Creating the resource in the cluster failed
    CreationFailed,
    /// Updating the resource in the cluster failed
    UpdateFailed,
    /// Deleting the resource from the cluster failed
    DeletionFailed,
    /// Stripping the managed label off the resource failed
    LabelRemovalFailed,
}

impl fmt::Display for PropagationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropagationReason::ClientRetrievalFailed => "ClientRetrievalFailed",
            PropagationReason::CreationFailed => "CreationFailed",
            PropagationReason::UpdateFailed => "UpdateFailed",
            PropagationReason::DeletionFailed => "DeletionFailed",
            PropagationReason::LabelRemovalFailed => "LabelRemovalFailed",
        };
        f.write_str(s)
    }
}

/// Sink for per-cluster dispatch observations
///
/// Production wires this to Kubernetes event recording and status updates on
/// the federated resource. The recorder is optional everywhere; absent one,
/// dispatchers fall back to structured logs.
#[cfg_attr(test, automock)]
pub trait DispatchRecorder: Send + Sync {
    /// An operation is being attempted against a cluster
    fn record_event(&self, cluster_name: &str, operation: &str, message: &str);

    /// An operation against a cluster failed
    fn record_operation_error(
        &self,
        reason: PropagationReason,
        cluster_name: &str,
        operation: &str,
        error: &Error,
    );
}
