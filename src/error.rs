//! Error types for the federation sync core

use thiserror::Error;

/// Main error type for weft operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A cluster was not found among the ready members of the federation
    #[error("cluster {0:?} not found")]
    ClusterNotFound(String),

    /// Building a client for a member cluster failed
    #[error("failed to build client for cluster {cluster:?}: {message}")]
    ClientBuild {
        /// Name of the cluster the client was meant for
        cluster: String,
        /// What went wrong
        message: String,
    },

    /// The cluster registry cache holds an entry that violates its own
    /// invariants. This signals a bug upstream, never a user error.
    #[error("corrupt data in cluster registry cache: {0}")]
    CorruptClusterStore(String),

    /// An operation against a member cluster failed
    #[error("failed to {operation} {kind} {name:?} in cluster {cluster:?}: {source}")]
    Operation {
        /// Verb describing the operation ("delete", "update", ...)
        operation: String,
        /// Kind of the target resource
        kind: String,
        /// Qualified name of the target resource
        name: String,
        /// Cluster the operation was dispatched to
        cluster: String,
        /// Underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Create a client-build error with the given message
    pub fn client_build(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientBuild {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Wrap an operation failure with its full dispatch context
    ///
    /// Produces the uniform `failed to <verb> <kind> <name> in cluster <name>`
    /// message used everywhere a per-cluster operation is reported.
    pub fn operation(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        cluster: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Operation {
            operation: operation.into(),
            kind: kind.into(),
            name: name.into(),
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_not_found_names_the_cluster() {
        let err = Error::ClusterNotFound("prod-eu".to_string());
        assert!(err.to_string().contains("prod-eu"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn operation_error_carries_full_context() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded");
        let err = Error::operation("delete", "Deployment", "default/nginx", "prod-eu", io);
        let msg = err.to_string();
        assert!(msg.contains("delete"));
        assert!(msg.contains("Deployment"));
        assert!(msg.contains("default/nginx"));
        assert!(msg.contains("prod-eu"));
        assert!(msg.contains("deadline exceeded"));
    }

    #[test]
    fn client_build_helper_accepts_str_and_string() {
        let err = Error::client_build("edge-1", format!("no secret {:?}", "edge-1-kubeconfig"));
        assert!(err.to_string().contains("edge-1"));
        assert!(err.to_string().contains("edge-1-kubeconfig"));
    }

    #[test]
    fn corrupt_store_is_surfaced_not_swallowed() {
        let err = Error::CorruptClusterStore("entry for \"a\" holds cluster \"b\"".to_string());
        assert!(err.to_string().contains("corrupt"));
    }
}
