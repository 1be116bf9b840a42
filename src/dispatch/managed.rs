//! Dispatch of operations on resources the control plane owns
//!
//! Managed operations push desired state out: create stamps the managed
//! label before writing, update demands a resource version and converts
//! optimistic-concurrency conflicts into a recheck instead of an error.
//! Deletion is shared with the unmanaged path.

use std::sync::Arc;

use kube::api::DynamicObject;
use tracing::warn;

use crate::client;
use crate::dispatch::{
    ClientAccessor, DispatchRecorder, OperationDispatcher, PropagationReason, UnmanagedDispatcher,
};
use crate::error::Error;
use crate::labels;
use crate::types::{QualifiedName, ReconciliationStatus};

/// Dispatcher for create, update and delete of one managed target resource
///
/// Wraps an [`UnmanagedDispatcher`] so all operations of a pass share one
/// counting core; single-use like its inner dispatcher.
#[derive(Clone)]
pub struct ManagedDispatcher {
    unmanaged: UnmanagedDispatcher,
}

impl ManagedDispatcher {
    /// Create a dispatcher for the named target resource
    pub fn new(
        client_accessor: ClientAccessor,
        target_kind: impl Into<String>,
        target_name: QualifiedName,
        recorder: Option<Arc<dyn DispatchRecorder>>,
    ) -> Self {
        Self {
            unmanaged: UnmanagedDispatcher::new(client_accessor, target_kind, target_name, recorder),
        }
    }

    /// The shared counting core
    pub fn dispatcher(&self) -> &OperationDispatcher {
        self.unmanaged.dispatcher()
    }

    /// Create the resource in the named cluster
    ///
    /// The desired object is cloned and stamped with the managed label before
    /// the write; the caller's instance is untouched. A resource already
    /// present reports [`ReconciliationStatus::AlreadyExists`] so the caller
    /// can decide whether to adopt it, rather than failing the pass with an
    /// error.
    pub fn create(&self, cluster_name: &str, obj: &DynamicObject) {
        self.unmanaged.dispatcher().increment_operations_initiated();
        let unmanaged = self.unmanaged.clone();
        let cluster = cluster_name.to_string();
        let mut desired = obj.clone();
        self.unmanaged.dispatcher().cluster_operation(
            cluster.clone(),
            Box::new(move |client| {
                Box::pin(async move {
                    let op = "create";
                    let client = unmanaged.checked_client(client, &cluster, op)?;
                    unmanaged.record_event(&cluster, op, "Creating");

                    labels::set_managed_label(&mut desired);
                    match client.create(&desired).await {
                        Ok(_) => Ok(ReconciliationStatus::AllOk),
                        Err(e) if client::is_already_exists(&e) => {
                            warn!(
                                cluster = %cluster,
                                error = %e,
                                "Target already exists in cluster"
                            );
                            Ok(ReconciliationStatus::AlreadyExists)
                        }
                        Err(e) => Err(unmanaged.operation_failed(
                            PropagationReason::CreationFailed,
                            &cluster,
                            op,
                            e,
                        )),
                    }
                })
            }),
        );
    }

    /// Replace the resource in the named cluster with the desired state
    ///
    /// The desired object must carry the resource version read from the
    /// cluster; without one the write is skipped and the pass reports
    /// [`ReconciliationStatus::RecheckMeta`]. A 409 conflict means the remote
    /// changed underneath us and reports
    /// [`ReconciliationStatus::RecheckResource`]; both rechecks resolve on a
    /// later pass instead of recording an error.
    pub fn update(&self, cluster_name: &str, obj: &DynamicObject) {
        self.unmanaged.dispatcher().increment_operations_initiated();
        let unmanaged = self.unmanaged.clone();
        let cluster = cluster_name.to_string();
        let mut desired = obj.clone();
        self.unmanaged.dispatcher().cluster_operation(
            cluster.clone(),
            Box::new(move |client| {
                Box::pin(async move {
                    let op = "update";
                    let client = unmanaged.checked_client(client, &cluster, op)?;

                    if desired
                        .metadata
                        .resource_version
                        .as_deref()
                        .map_or(true, str::is_empty)
                    {
                        warn!(
                            cluster = %cluster,
                            "Desired object carries no resource version, rechecking"
                        );
                        return Ok(ReconciliationStatus::RecheckMeta);
                    }
                    unmanaged.record_event(&cluster, op, "Updating");

                    labels::set_managed_label(&mut desired);
                    match client.update(&desired).await {
                        Ok(_) => Ok(ReconciliationStatus::AllOk),
                        Err(e) if client::is_conflict(&e) => {
                            warn!(
                                cluster = %cluster,
                                error = %e,
                                "Update conflicted, rechecking"
                            );
                            Ok(ReconciliationStatus::RecheckResource)
                        }
                        Err(e) => Err(unmanaged.operation_failed(
                            PropagationReason::UpdateFailed,
                            &cluster,
                            op,
                            e,
                        )),
                    }
                })
            }),
        );
    }

    /// Delete the resource from the named cluster
    pub fn delete(&self, cluster_name: &str) {
        self.unmanaged.delete(cluster_name);
    }

    /// Join on every operation dispatched through this pass
    pub async fn wait(&self) -> (bool, Option<Arc<Error>>) {
        self.unmanaged.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockResourceClient, ResourceClient};
    use crate::dispatch::MockDispatchRecorder;
    use kube::api::ObjectMeta;
    use kube::error::ErrorResponse;

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

    fn desired(resource_version: Option<&str>) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("nginx".to_string()),
                namespace: Some("default".to_string()),
                resource_version: resource_version.map(String::from),
                ..Default::default()
            },
            data: serde_json::json!({"spec": {"replicas": 3}}),
        }
    }

    #[tokio::test]
    async fn create_stamps_the_managed_label_on_a_clone() {
        let mut client = MockResourceClient::new();
        client
            .expect_create()
            .withf(|obj| labels::has_managed_label(obj))
            .times(1)
            .returning(|obj| Ok(obj.clone()));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        let obj = desired(None);
        dispatcher.create("eu-1", &obj);
        assert!(matches!(dispatcher.wait().await, (true, None)));

        // The caller's instance stays unlabeled.
        assert!(!labels::has_managed_label(&obj));
    }

    #[tokio::test]
    async fn create_of_an_existing_resource_is_not_an_error() {
        let mut client = MockResourceClient::new();
        client
            .expect_create()
            .returning(|_| Err(api_error(409, "AlreadyExists")));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.create("eu-1", &desired(None));

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn create_failure_is_recorded_with_creation_reason() {
        let mut client = MockResourceClient::new();
        client
            .expect_create()
            .returning(|_| Err(api_error(403, "Forbidden")));

        let mut recorder = MockDispatchRecorder::new();
        recorder.expect_record_event().return_const(());
        recorder
            .expect_record_operation_error()
            .withf(|reason, _, operation, _| {
                *reason == PropagationReason::CreationFailed && operation == "create"
            })
            .times(1)
            .return_const(());

        let dispatcher = ManagedDispatcher::new(
            accessor_with(client),
            "Deployment",
            target(),
            Some(Arc::new(recorder)),
        );
        dispatcher.create("eu-1", &desired(None));

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.unwrap().to_string().contains("failed to create"));
    }

    #[tokio::test]
    async fn update_without_resource_version_skips_the_write() {
        // No expect_update: the mock panics if update is attempted.
        let client = MockResourceClient::new();

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.update("eu-1", &desired(None));

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn update_conflict_becomes_a_recheck() {
        let mut client = MockResourceClient::new();
        client
            .expect_update()
            .returning(|_| Err(api_error(409, "Conflict")));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.update("eu-1", &desired(Some("42")));

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn update_success_keeps_the_label_and_version() {
        let mut client = MockResourceClient::new();
        client
            .expect_update()
            .withf(|obj| {
                labels::has_managed_label(obj)
                    && obj.metadata.resource_version.as_deref() == Some("42")
            })
            .times(1)
            .returning(|obj| Ok(obj.clone()));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.update("eu-1", &desired(Some("42")));
        assert!(matches!(dispatcher.wait().await, (true, None)));
    }

    #[tokio::test]
    async fn update_failure_is_recorded_with_update_reason() {
        let mut client = MockResourceClient::new();
        client
            .expect_update()
            .returning(|_| Err(api_error(500, "InternalError")));

        let mut recorder = MockDispatchRecorder::new();
        recorder.expect_record_event().return_const(());
        recorder
            .expect_record_operation_error()
            .withf(|reason, _, _, _| *reason == PropagationReason::UpdateFailed)
            .times(1)
            .return_const(());

        let dispatcher = ManagedDispatcher::new(
            accessor_with(client),
            "Deployment",
            target(),
            Some(Arc::new(recorder)),
        );
        dispatcher.update("eu-1", &desired(Some("42")));

        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn delete_delegates_to_the_unmanaged_path() {
        let mut client = MockResourceClient::new();
        client
            .expect_delete()
            .withf(|name| name.to_string() == "default/nginx")
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.delete("eu-1");
        assert!(matches!(dispatcher.wait().await, (true, None)));
    }

    #[tokio::test]
    async fn mixed_operations_share_one_aggregate() {
        let mut client = MockResourceClient::new();
        client.expect_create().returning(|obj| Ok(obj.clone()));
        client.expect_delete().returning(|_| Ok(()));
        client
            .expect_update()
            .returning(|_| Err(api_error(409, "Conflict")));

        let dispatcher =
            ManagedDispatcher::new(accessor_with(client), "Deployment", target(), None);
        dispatcher.create("eu-1", &desired(None));
        dispatcher.update("us-1", &desired(Some("42")));
        dispatcher.delete("ap-1");

        // The conflict recheck poisons the pass but records no error.
        let (ok, err) = dispatcher.wait().await;
        assert!(!ok);
        assert!(err.is_none());
    }
}
