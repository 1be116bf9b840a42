//! Cluster registry watch source
//!
//! The federation's membership is itself delivered by a watch: one
//! [`MemberCluster`] resource per member, kept up to date by some controller
//! upstream. The federated informer consumes this stream through the
//! [`ClusterRegistrySource`] seam so tests can inject membership changes
//! without an API server.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::crd::MemberCluster;

/// One membership change observed on the cluster registry
#[derive(Clone, Debug)]
pub enum ClusterEvent {
    /// A registry entry was added or modified
    Applied(MemberCluster),
    /// A registry entry was deleted
    Deleted(MemberCluster),
    /// The registry watch (re)listed; the payload is the full membership
    Restarted(Vec<MemberCluster>),
}

/// Stream of cluster registry events
pub type ClusterEventStream = BoxStream<'static, ClusterEvent>;

/// Source of cluster registry events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterRegistrySource: Send + Sync {
    /// Open the registry watch
    ///
    /// The first event is a [`ClusterEvent::Restarted`] carrying the initial
    /// membership list.
    async fn watch(&self) -> Result<ClusterEventStream, kube::Error>;
}

/// Production registry source over the MemberCluster API
pub struct KubeClusterRegistrySource {
    api: Api<MemberCluster>,
}

impl KubeClusterRegistrySource {
    /// Watch MemberCluster resources in the given registry namespace
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ClusterRegistrySource for KubeClusterRegistrySource {
    async fn watch(&self) -> Result<ClusterEventStream, kube::Error> {
        let stream = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::Applied(cluster)) => Some(ClusterEvent::Applied(cluster)),
                    Ok(watcher::Event::Deleted(cluster)) => Some(ClusterEvent::Deleted(cluster)),
                    Ok(watcher::Event::Restarted(clusters)) => {
                        Some(ClusterEvent::Restarted(clusters))
                    }
                    Err(e) => {
                        warn!(error = %e, "Cluster registry watch error, backing off");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
