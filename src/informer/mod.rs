//! Watching and caching across a federation of clusters
//!
//! The [`FederatedInformer`] consumes cluster membership from a
//! [`ClusterRegistrySource`] and runs one [`ResourceInformer`] cache loop per
//! ready member, exposing the union of their caches through a
//! [`FederatedReadOnlyStore`].

pub mod federated;
pub mod registry;
pub mod resource;
pub mod store;

pub use federated::{
    ClientFactory, ClusterLifecycleHandlers, FederatedInformer, FederatedObject,
    FederatedReadOnlyStore,
};
pub use registry::{ClusterEvent, ClusterEventStream, ClusterRegistrySource, KubeClusterRegistrySource};
pub use resource::{
    resource_informer_factory, CacheController, ResourceInformer, TargetCache,
    TargetInformerFactory, TriggerFn,
};
pub use store::ObjectStore;
