//! Dispatch of operations on resources the control plane is letting go of
//!
//! "Unmanaged" operations need no per-cluster desired state: delete the
//! resource, or strip the managed label so later sync passes ignore it.
//! Deletion of a resource already gone counts as success, so retired
//! resources converge instead of erroring forever.

use std::sync::Arc;

use kube::api::DynamicObject;
use tracing::{debug, error};

use crate::client::{self, ResourceClient};
use crate::dispatch::{
    ClientAccessor, DispatchRecorder, OperationDispatcher, PropagationReason,
};
use crate::error::Error;
use crate::labels;
use crate::types::{QualifiedName, ReconciliationStatus};
use crate::Result;

/// Dispatcher for delete and label-removal operations on one target resource
///
/// Single-use: construct per reconciliation pass, fan out, then
/// [`wait`](Self::wait).
#[derive(Clone)]
pub struct UnmanagedDispatcher {
    dispatcher: OperationDispatcher,
    target_kind: String,
    target_name: QualifiedName,
    recorder: Option<Arc<dyn DispatchRecorder>>,
}

impl UnmanagedDispatcher {
    /// Create a dispatcher for the named target resource
    pub fn new(
        client_accessor: ClientAccessor,
        target_kind: impl Into<String>,
        target_name: QualifiedName,
        recorder: Option<Arc<dyn DispatchRecorder>>,
    ) -> Self {
        Self {
            dispatcher: OperationDispatcher::new(client_accessor),
            target_kind: target_kind.into(),
            target_name,
            recorder,
        }
    }

    /// Wrap an existing counting core, sharing its aggregate
    ///
    /// Used by [`ManagedDispatcher`](crate::dispatch::ManagedDispatcher) so
    /// managed and unmanaged operations of one pass join on a single wait.
    pub fn with_dispatcher(
        dispatcher: OperationDispatcher,
        target_kind: impl Into<String>,
        target_name: QualifiedName,
        recorder: Option<Arc<dyn DispatchRecorder>>,
    ) -> Self {
        Self {
            dispatcher,
            target_kind: target_kind.into(),
            target_name,
            recorder,
        }
    }

    /// The shared counting core
    pub fn dispatcher(&self) -> &OperationDispatcher {
        &self.dispatcher
    }

    /// Delete the target resource from the named cluster
    ///
    /// A resource already absent (404) counts as success.
    pub fn delete(&self, cluster_name: &str) {
        self.dispatcher.increment_operations_initiated();
        let this = self.clone();
        let cluster = cluster_name.to_string();
        self.dispatcher.cluster_operation(
            cluster.clone(),
            Box::new(move |client| {
                Box::pin(async move {
                    let op = "delete";
                    let client = this.checked_client(client, &cluster, op)?;
                    this.record_event(&cluster, op, "Deleting");

                    match client.delete(&this.target_name).await {
                        Ok(()) => Ok(ReconciliationStatus::AllOk),
                        Err(e) if client::is_not_found(&e) => {
                            debug!(
                                cluster = %cluster,
                                kind = %this.target_kind,
                                name = %this.target_name,
                                "Target already deleted"
                            );
                            Ok(ReconciliationStatus::AllOk)
                        }
                        Err(e) => Err(this.operation_failed(
                            PropagationReason::DeletionFailed,
                            &cluster,
                            op,
                            e,
                        )),
                    }
                })
            }),
        );
    }

    /// Strip the managed label off the resource in the named cluster
    ///
    /// `obj` is the cluster's cached copy; it is cloned before mutation so
    /// the caller's instance (and anything else sharing it) is untouched.
    pub fn remove_managed_label(&self, cluster_name: &str, obj: &DynamicObject) {
        self.dispatcher.increment_operations_initiated();
        let this = self.clone();
        let cluster = cluster_name.to_string();
        let mut updated = obj.clone();
        self.dispatcher.cluster_operation(
            cluster.clone(),
            Box::new(move |client| {
                Box::pin(async move {
                    let op = "remove managed label from";
                    let client = this.checked_client(client, &cluster, op)?;
                    this.record_event(&cluster, op, "Removing managed label from");

                    labels::remove_managed_label(&mut updated);
                    match client.update(&updated).await {
                        Ok(_) => Ok(ReconciliationStatus::AllOk),
                        Err(e) => Err(this.operation_failed(
                            PropagationReason::LabelRemovalFailed,
                            &cluster,
                            op,
                            e,
                        )),
                    }
                })
            }),
        );
    }

    /// Join on every operation dispatched through this pass
    pub async fn wait(&self) -> (bool, Option<Arc<Error>>) {
        self.dispatcher.wait().await
    }

    /// Unwrap the accessor outcome, reporting a retrieval failure in place
    pub(crate) fn checked_client(
        &self,
        client: Result<Arc<dyn ResourceClient>>,
        cluster_name: &str,
        operation: &str,
    ) -> Result<Arc<dyn ResourceClient>> {
        client.map_err(|e| {
            self.report_error(
                PropagationReason::ClientRetrievalFailed,
                cluster_name,
                operation,
                &e,
            );
            e
        })
    }

    /// Record an attempt event, or log it when no recorder is wired
    pub(crate) fn record_event(&self, cluster_name: &str, operation: &str, continuous: &str) {
        let message = format!(
            "{} {} {:?} in cluster {:?}",
            continuous, self.target_kind, self.target_name.to_string(), cluster_name
        );
        match &self.recorder {
            Some(recorder) => recorder.record_event(cluster_name, operation, &message),
            None => debug!(cluster = %cluster_name, operation = %operation, "{message}"),
        }
    }

    /// Wrap a failed API call with full dispatch context and report it
    pub(crate) fn operation_failed(
        &self,
        reason: PropagationReason,
        cluster_name: &str,
        operation: &str,
        source: kube::Error,
    ) -> Error {
        let err = Error::operation(
            operation,
            &self.target_kind,
            self.target_name.to_string(),
            cluster_name,
            source,
        );
        self.report_error(reason, cluster_name, operation, &err);
        err
    }

    fn report_error(
        &self,
        reason: PropagationReason,
        cluster_name: &str,
        operation: &str,
        error: &Error,
    ) {
        match &self.recorder {
            Some(recorder) => {
                recorder.record_operation_error(reason, cluster_name, operation, error)
            }
            None => error!(
                cluster = %cluster_name,
                operation = %operation,
                reason = %reason,
                error = %error,
                "Cluster operation failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::dispatch::MockDispatchRecorder;
    use kube::api::ObjectMeta;
    use kube::error::ErrorResponse;
    use mockall::predicate::eq;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }

    fn accessor_with(client: MockResourceClient) -> ClientAccessor {
        let client: Arc<dyn ResourceClient> = Arc::new(client);
        Arc::new(move |_: &str| Ok(Arc::clone(&client)))
    }

    fn target() -> QualifiedName {
        QualifiedName::new(Some("default"), "nginx")
    }

    fn labeled_obj() -> DynamicObject {
        let mut obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("nginx".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        labels::set_managed_label(&mut obj);
        obj
    }

    #[tokio::test]
    async fn delete_succeeds_and_records_the_attempt() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .withf(|name| name.to_string() == "default/nginx")
            .times(1)
            .returning(|_| Ok(()));

        let mut recorder = MockDispatchRecorder::new();
        recorder
            .expect_record_event()
            .with(
                eq("eu-1"),
                eq("delete"),
                eq("Deleting Deployment \"default/nginx\" in cluster \"eu-1\""),
            )
            .times(1)
            .return_const(());

        let dispatcher = UnmanagedDispatcher::new(
            accessor_with(client),
            "Deployment",
            target(),
            Some(Arc::new(recorder)),
        );
        dispatcher.delete("eu-1");
        assert!(matches!(dispatcher.wait().await, (true, None)));
    }

    #[tokio::test]
    async fn delete_of_an_absent_resource_counts_as_success() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .returning(|_| Err(api_error(404, "NotFound")));

        let dispatcher =
            UnmanagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.delete("eu-1");
        assert!(matches!(dispatcher.wait().await, (true, None)));
    }

    #[tokio::test]
    async fn delete_failure_is_reported_with_full_context() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .returning(|_| Err(api_error(403, "Forbidden")));

        let mut recorder = MockDispatchRecorder::new();
        recorder.expect_record_event().return_const(());
        recorder
            .expect_record_operation_error()
            .withf(|reason, cluster, operation, error| {
                *reason == PropagationReason::DeletionFailed
                    && cluster == "eu-1"
                    && operation == "delete"
                    && error.to_string().contains("default/nginx")
            })
            .times(1)
            .return_const(());

        let dispatcher = UnmanagedDispatcher::new(
            accessor_with(client),
            "Deployment",
            target(),
            Some(Arc::new(recorder)),
        );
        dispatcher.delete("eu-1");

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        let msg = err.unwrap().to_string();
        assert!(msg.contains("failed to delete Deployment"));
        assert!(msg.contains("eu-1"));
    }

    #[tokio::test]
    async fn client_retrieval_failure_is_reported_and_fails_the_pass() {
        let accessor: ClientAccessor =
            Arc::new(|name: &str| Err(Error::ClusterNotFound(name.to_string())));

        let mut recorder = MockDispatchRecorder::new();
        recorder
            .expect_record_operation_error()
            .withf(|reason, cluster, _, _| {
                *reason == PropagationReason::ClientRetrievalFailed && cluster == "edge-1"
            })
            .times(1)
            .return_const(());

        let dispatcher =
            UnmanagedDispatcher::new(accessor, "Deployment", target(), Some(Arc::new(recorder)));
        dispatcher.delete("edge-1");

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(matches!(
            err.as_deref(),
            Some(Error::ClusterNotFound(name)) if name == "edge-1"
        ));
    }

    #[tokio::test]
    async fn remove_managed_label_updates_a_clone_not_the_original() {
        let mut client = MockResourceClient::new();
        client
            .expect_update()
            .withf(|obj| !labels::has_managed_label(obj))
            .times(1)
            .returning(|obj| Ok(obj.clone()));

        let dispatcher =
            UnmanagedDispatcher::new(accessor_with(client), "Deployment", target(), None);

        let cached = labeled_obj();
        dispatcher.remove_managed_label("eu-1", &cached);
        assert!(matches!(dispatcher.wait().await, (true, None)));

        // The caller's instance keeps its label.
        assert!(labels::has_managed_label(&cached));
    }

    #[tokio::test]
    async fn remove_managed_label_failure_uses_its_own_reason() {
        let mut client = MockResourceClient::new();
        client
            .expect_update()
            .returning(|_| Err(api_error(500, "InternalError")));

        let mut recorder = MockDispatchRecorder::new();
        recorder.expect_record_event().return_const(());
        recorder
            .expect_record_operation_error()
            .withf(|reason, _, _, _| *reason == PropagationReason::LabelRemovalFailed)
            .times(1)
            .return_const(());

        let dispatcher = UnmanagedDispatcher::new(
            accessor_with(client),
            "Deployment",
            target(),
            Some(Arc::new(recorder)),
        );
        dispatcher.remove_managed_label("eu-1", &labeled_obj());

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_some());
    }
}
