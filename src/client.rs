//! Per-cluster resource client seam
//!
//! The informer and dispatcher depend only on the [`ResourceClient`]
//! capability surface, never on a concrete transport. Production code uses
//! [`DynamicResourceClient`] over a `kube::Client`; tests substitute fakes
//! through the same trait.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::types::QualifiedName;

/// One change observed on a watched resource collection
///
/// Mirrors the shape of `kube::runtime::watcher::Event` so production streams
/// map one-to-one and fakes can inject events directly.
#[derive(Clone, Debug)]
pub enum ResourceEvent {
    /// An object was added or modified
    Applied(DynamicObject),
    /// An object was deleted
    Deleted(DynamicObject),
    /// The watch restarted; the payload is the full current collection
    Restarted(Vec<DynamicObject>),
}

/// Stream of watch events for one cluster's resource collection
///
/// Transient watch errors are handled (and logged) inside the stream; a
/// stream that ends signals the cache loop to relist.
pub type WatchStream = BoxStream<'static, ResourceEvent>;

/// Typed accessor for one resource kind in one member cluster
///
/// Errors are `kube::Error` so callers can classify outcomes
/// ([`is_not_found`], [`is_already_exists`], [`is_conflict`]) uniformly
/// across real and fake clients.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Kind of the resource this client accesses
    fn kind(&self) -> String;

    /// Fetch a single object by qualified name
    async fn get(&self, name: &QualifiedName) -> Result<DynamicObject, kube::Error>;

    /// List the collection in the client's configured namespace scope
    async fn list(&self) -> Result<Vec<DynamicObject>, kube::Error>;

    /// Open a watch over the client's configured namespace scope
    async fn watch(&self) -> Result<WatchStream, kube::Error>;

    /// Create the object in the namespace recorded in its metadata
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Replace the object in the namespace recorded in its metadata
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Delete a single object by qualified name
    async fn delete(&self, name: &QualifiedName) -> Result<(), kube::Error>;
}

/// Whether the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Whether the error reports the resource already exists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Whether the error is an optimistic-concurrency conflict
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict")
}

/// Production [`ResourceClient`] over the Kubernetes dynamic API
///
/// Bound to one `kube::Client`, one API resource, and an optional target
/// namespace. Building the `kube::Client` itself from member-cluster
/// credentials is the injected client factory's job.
#[derive(Clone)]
pub struct DynamicResourceClient {
    client: Client,
    resource: ApiResource,
    namespaced: bool,
    namespace: Option<String>,
}

impl DynamicResourceClient {
    /// Create a client for the given resource in the given namespace scope
    ///
    /// `namespace` of `None` means all namespaces for a namespaced resource
    /// and is ignored for cluster-scoped ones.
    pub fn new(
        client: Client,
        resource: ApiResource,
        namespaced: bool,
        namespace: Option<String>,
    ) -> Self {
        Self {
            client,
            resource,
            namespaced,
            namespace,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        if self.namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
                None => Api::all_with(self.client.clone(), &self.resource),
            }
        } else {
            Api::all_with(self.client.clone(), &self.resource)
        }
    }

    fn scoped_api(&self) -> Api<DynamicObject> {
        self.api(self.namespace.as_deref())
    }
}

#[async_trait]
impl ResourceClient for DynamicResourceClient {
    fn kind(&self) -> String {
        self.resource.kind.clone()
    }

    async fn get(&self, name: &QualifiedName) -> Result<DynamicObject, kube::Error> {
        self.api(name.namespace.as_deref()).get(&name.name).await
    }

    async fn list(&self) -> Result<Vec<DynamicObject>, kube::Error> {
        let list = self.scoped_api().list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn watch(&self) -> Result<WatchStream, kube::Error> {
        let kind = self.kind();
        let stream = watcher(self.scoped_api(), watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| {
                let kind = kind.clone();
                async move {
                    match event {
                        Ok(watcher::Event::Applied(obj)) => Some(ResourceEvent::Applied(obj)),
                        Ok(watcher::Event::Deleted(obj)) => Some(ResourceEvent::Deleted(obj)),
                        Ok(watcher::Event::Restarted(objs)) => {
                            Some(ResourceEvent::Restarted(objs))
                        }
                        Err(e) => {
                            warn!(kind = %kind, error = %e, "Watch error, backing off");
                            None
                        }
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.api(obj.metadata.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.api(obj.metadata.namespace.as_deref())
            .replace(&name, &PostParams::default(), obj)
            .await
    }

    async fn delete(&self, name: &QualifiedName) -> Result<(), kube::Error> {
        self.api(name.namespace.as_deref())
            .delete(&name.name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn not_found_classification() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(403, "Forbidden")));
        assert!(!is_not_found(&api_error(409, "Conflict")));
    }

    #[test]
    fn already_exists_and_conflict_share_a_code_but_not_a_reason() {
        let exists = api_error(409, "AlreadyExists");
        let conflict = api_error(409, "Conflict");

        assert!(is_already_exists(&exists));
        assert!(!is_already_exists(&conflict));

        assert!(is_conflict(&conflict));
        assert!(!is_conflict(&exists));
    }

    #[tokio::test]
    async fn mock_client_satisfies_the_trait() {
        let mut client = MockResourceClient::new();
        client.expect_kind().return_const("Deployment".to_string());
        client
            .expect_delete()
            .returning(|_| Err(api_error(404, "NotFound")));

        assert_eq!(client.kind(), "Deployment");
        let err = client
            .delete(&QualifiedName::new(Some("default"), "gone"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }
}
