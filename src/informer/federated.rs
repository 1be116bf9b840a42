//! Federated informer
//!
//! Owns one watch loop over the cluster registry and one target cache loop
//! per ready member cluster, adding and removing cache loops as membership
//! and readiness change. A single coordinating lock guards the registry
//! cache and the target entry map; cache-loop bodies run unlocked.
//!
//! The view this exposes is eventually consistent. Registry events and
//! target caches lag reality by design; callers must tolerate staleness and
//! partial availability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ResourceClient;
use crate::crd::{is_cluster_ready, MemberCluster};
use crate::error::Error;
use crate::informer::registry::{ClusterEvent, ClusterRegistrySource};
use crate::informer::resource::{CacheController, TargetInformerFactory};
use crate::informer::store::ObjectStore;
use crate::retry::{Backoff, RetryConfig};
use crate::Result;

/// An object tagged with the cluster it came from
#[derive(Clone, Debug)]
pub struct FederatedObject {
    /// Name of the originating member cluster
    pub cluster_name: String,
    /// The cached object (a clone, never the cached instance itself)
    pub object: DynamicObject,
}

/// Callback fired when a cluster becomes available
pub type AvailableFn = Arc<dyn Fn(&MemberCluster) + Send + Sync>;

/// Callback fired when a cluster becomes unavailable, with the last-known
/// snapshot of its target objects (possibly empty)
pub type UnavailableFn = Arc<dyn Fn(&MemberCluster, Vec<DynamicObject>) + Send + Sync>;

/// Cluster lifecycle hooks
///
/// A cluster is available once it exists in the registry and is ready; it
/// becomes unavailable when deleted or no longer ready. A spec or annotation
/// change fires both: the old entry is torn down and, if still ready, a
/// fresh one is stood up against a fresh client. Absent hooks are a valid
/// no-hook state. Hooks run synchronously on the registry loop and must not
/// block indefinitely.
#[derive(Clone, Default)]
pub struct ClusterLifecycleHandlers {
    /// Fired when a cluster becomes available
    pub available: Option<AvailableFn>,
    /// Fired when a cluster becomes unavailable
    pub unavailable: Option<UnavailableFn>,
}

/// Builds a [`ResourceClient`] for a member cluster
///
/// Injected so credential resolution stays outside this crate and tests can
/// substitute fakes.
pub type ClientFactory =
    Arc<dyn Fn(&MemberCluster) -> Result<Arc<dyn ResourceClient>> + Send + Sync>;

struct TargetEntry {
    store: Arc<ObjectStore>,
    controller: Arc<dyn CacheController>,
    shutdown: CancellationToken,
}

struct Inner {
    /// Registry cache: cluster name → latest watched state
    clusters: HashMap<String, MemberCluster>,
    /// One entry per cluster currently considered ready
    targets: HashMap<String, TargetEntry>,
    /// Flipped once the registry watch delivers its initial list
    synced: bool,
    /// Set by `stop()`; refuses late entry creation racing the shutdown
    stopping: bool,
}

/// Live view over a changing set of member clusters
///
/// Create with [`FederatedInformer::new`], then [`start`](Self::start) it.
/// [`stop`](Self::stop) cancels the registry loop and every target cache
/// loop; it must be called exactly once after `start`.
pub struct FederatedInformer {
    inner: Mutex<Inner>,
    source: Arc<dyn ClusterRegistrySource>,
    client_factory: ClientFactory,
    target_factory: TargetInformerFactory,
    lifecycle: ClusterLifecycleHandlers,
    registry_shutdown: Mutex<Option<CancellationToken>>,
    retry: RetryConfig,
}

impl FederatedInformer {
    /// Create a federated informer over the given registry source
    pub fn new(
        source: Arc<dyn ClusterRegistrySource>,
        client_factory: ClientFactory,
        target_factory: TargetInformerFactory,
        lifecycle: ClusterLifecycleHandlers,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                clusters: HashMap::new(),
                targets: HashMap::new(),
                synced: false,
                stopping: false,
            }),
            source,
            client_factory,
            target_factory,
            lifecycle,
            registry_shutdown: Mutex::new(None),
            retry: RetryConfig::default(),
        })
    }

    /// Begin the cluster registry watch loop
    ///
    /// Calling `start` twice is undefined; guard with external discipline.
    pub fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        *self
            .registry_shutdown
            .lock()
            .expect("informer lock poisoned") = Some(token.clone());

        let informer = Arc::clone(self);
        tokio::spawn(async move { informer.run_registry_loop(token).await });
    }

    /// Cancel the registry loop and every target cache loop
    ///
    /// Each entry is removed from the map in the same locked section that
    /// signals its cancellation, so a concurrently arriving cluster-deletion
    /// event can never cancel the same entry twice.
    pub fn stop(&self) {
        debug!("Stopping federated informer");
        if let Some(token) = self
            .registry_shutdown
            .lock()
            .expect("informer lock poisoned")
            .take()
        {
            token.cancel();
        }

        let mut inner = self.inner.lock().expect("informer lock poisoned");
        inner.stopping = true;
        for (name, entry) in inner.targets.drain() {
            debug!(cluster = %name, "Stopping cluster cache loop");
            entry.shutdown.cancel();
        }
    }

    /// Resolve a ready cluster by name and build a client for it
    pub fn get_client_for_cluster(&self, name: &str) -> Result<Arc<dyn ResourceClient>> {
        debug!(cluster = %name, "Getting client for cluster");
        let cluster = self
            .get_ready_cluster(name)?
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))?;
        (self.client_factory)(&cluster)
    }

    /// All registry clusters currently not ready
    pub fn get_unready_clusters(&self) -> Result<Vec<MemberCluster>> {
        self.classify_clusters(false)
    }

    /// All registry clusters currently ready
    pub fn get_ready_clusters(&self) -> Result<Vec<MemberCluster>> {
        self.classify_clusters(true)
    }

    /// The named cluster, if present in the registry and ready
    pub fn get_ready_cluster(&self, name: &str) -> Result<Option<MemberCluster>> {
        let inner = self.inner.lock().expect("informer lock poisoned");
        match inner.clusters.get(name) {
            Some(cluster) => {
                check_entry(name, cluster)?;
                if is_cluster_ready(cluster) {
                    Ok(Some(cluster.clone()))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Whether the registry watch has delivered its initial list
    ///
    /// Toggles false→true exactly once; an eventual-consistency signal, not
    /// a linearizable guarantee.
    pub fn clusters_synced(&self) -> bool {
        self.inner.lock().expect("informer lock poisoned").synced
    }

    /// A read-only aggregator over all live target caches
    ///
    /// Cheap: no new tasks, just a back-reference.
    pub fn get_target_store(self: &Arc<Self>) -> FederatedReadOnlyStore {
        FederatedReadOnlyStore {
            informer: Arc::clone(self),
        }
    }

    fn classify_clusters(&self, ready: bool) -> Result<Vec<MemberCluster>> {
        let inner = self.inner.lock().expect("informer lock poisoned");
        let mut result = Vec::with_capacity(inner.clusters.len());
        for (name, cluster) in &inner.clusters {
            check_entry(name, cluster)?;
            if is_cluster_ready(cluster) == ready {
                result.push(cluster.clone());
            }
        }
        Ok(result)
    }

    async fn run_registry_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(self.retry.clone());
        loop {
            let mut stream = tokio::select! {
                _ = shutdown.cancelled() => return,
                res = self.source.watch() => match res {
                    Ok(stream) => stream,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Cluster registry watch failed, retrying"
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                },
            };
            backoff.reset();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = stream.next() => match event {
                        Some(event) => self.handle_registry_event(event),
                        None => {
                            warn!("Cluster registry stream closed, rewatching");
                            break;
                        }
                    },
                }
            }
        }
    }

    fn handle_registry_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Applied(cluster) => self.handle_applied(cluster),
            ClusterEvent::Deleted(cluster) => self.handle_deleted(&cluster),
            ClusterEvent::Restarted(clusters) => self.handle_restarted(clusters),
        }
    }

    fn handle_applied(&self, cluster: MemberCluster) {
        let name = cluster.name_any();
        let old = {
            let mut inner = self.inner.lock().expect("informer lock poisoned");
            inner.clusters.insert(name.clone(), cluster.clone())
        };

        match old {
            None => {
                if is_cluster_ready(&cluster) {
                    self.add_cluster(&cluster);
                } else {
                    info!(cluster = %name, "Cluster registered but not ready");
                }
            }
            Some(old) => {
                if !cluster_state_changed(&old, &cluster) {
                    debug!(cluster = %name, "Cluster unchanged, skipping");
                    return;
                }
                // Any change to readiness, spec, or annotations tears the old
                // entry down; a spec change must yield a fresh client and
                // cache rather than continue against a stale connection.
                self.teardown_cluster(&old);
                if is_cluster_ready(&cluster) {
                    self.add_cluster(&cluster);
                }
            }
        }
    }

    fn handle_deleted(&self, cluster: &MemberCluster) {
        let name = cluster.name_any();
        {
            let mut inner = self.inner.lock().expect("informer lock poisoned");
            inner.clusters.remove(&name);
        }
        self.teardown_cluster(cluster);
    }

    fn handle_restarted(&self, clusters: Vec<MemberCluster>) {
        let fresh: HashMap<String, MemberCluster> = clusters
            .into_iter()
            .map(|c| (c.name_any(), c))
            .collect();

        // Clusters that vanished between watches are deletions.
        let gone: Vec<MemberCluster> = {
            let inner = self.inner.lock().expect("informer lock poisoned");
            inner
                .clusters
                .values()
                .filter(|c| !fresh.contains_key(&c.name_any()))
                .cloned()
                .collect()
        };
        for cluster in &gone {
            self.handle_deleted(cluster);
        }

        for (_, cluster) in fresh {
            self.handle_applied(cluster);
        }

        let mut inner = self.inner.lock().expect("informer lock poisoned");
        if !inner.synced {
            inner.synced = true;
        }
    }

    /// Stand up a target cache loop for a ready cluster
    ///
    /// Client construction failure is logged and the cluster gets no entry;
    /// no retry is scheduled here. The next registry event (or an external
    /// periodic resync) retries.
    fn add_cluster(&self, cluster: &MemberCluster) {
        let name = cluster.name_any();
        let client = match (self.client_factory)(cluster) {
            Ok(client) => client,
            Err(e) => {
                error!(cluster = %name, error = %e, "Failed to create a client for cluster");
                return;
            }
        };

        let cache = (self.target_factory)(cluster, client);
        let shutdown = CancellationToken::new();
        {
            let mut inner = self.inner.lock().expect("informer lock poisoned");
            if inner.stopping {
                debug!(cluster = %name, "Informer stopping, not adding cluster");
                return;
            }
            inner.targets.insert(
                name.clone(),
                TargetEntry {
                    store: Arc::clone(&cache.store),
                    controller: Arc::clone(&cache.controller),
                    shutdown: shutdown.clone(),
                },
            );
        }

        let controller = cache.controller;
        tokio::spawn(async move { controller.run(shutdown).await });

        info!(cluster = %name, "Cluster is ready");
        if let Some(available) = &self.lifecycle.available {
            available(cluster);
        }
    }

    /// Tear down a cluster's target entry and fire the unavailable hook
    ///
    /// Two-step protocol: snapshot the cluster's cached objects first (only
    /// when an unavailable hook exists), then cancel and remove the entry in
    /// one locked section, then invoke the hook with whatever was captured.
    fn teardown_cluster(&self, cluster: &MemberCluster) {
        let name = cluster.name_any();

        let snapshot = if self.lifecycle.unavailable.is_some() {
            let inner = self.inner.lock().expect("informer lock poisoned");
            inner
                .targets
                .get(&name)
                .map(|entry| entry.store.list())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        {
            let mut inner = self.inner.lock().expect("informer lock poisoned");
            if let Some(entry) = inner.targets.remove(&name) {
                entry.shutdown.cancel();
            }
        }

        info!(cluster = %name, "Cluster is unavailable");
        if let Some(unavailable) = &self.lifecycle.unavailable {
            unavailable(cluster, snapshot);
        }
    }
}

fn check_entry(name: &str, cluster: &MemberCluster) -> Result<()> {
    let actual = cluster.name_any();
    if actual != name {
        return Err(Error::CorruptClusterStore(format!(
            "entry for {name:?} holds cluster {actual:?}"
        )));
    }
    Ok(())
}

fn cluster_state_changed(old: &MemberCluster, new: &MemberCluster) -> bool {
    is_cluster_ready(old) != is_cluster_ready(new)
        || old.spec != new.spec
        || old.metadata.annotations != new.metadata.annotations
}

/// Read-only overlay over every live per-cluster cache
///
/// All reads snapshot the entry set under the informer's lock and do any
/// potentially slow per-entry work (sync checks) after releasing it.
#[derive(Clone)]
pub struct FederatedReadOnlyStore {
    informer: Arc<FederatedInformer>,
}

impl FederatedReadOnlyStore {
    /// Every object from every live cluster cache, tagged with its origin
    ///
    /// Order across clusters is unspecified.
    pub fn list(&self) -> Vec<FederatedObject> {
        let inner = self.informer.inner.lock().expect("informer lock poisoned");
        let mut result = Vec::new();
        for (cluster_name, entry) in &inner.targets {
            for object in entry.store.list() {
                result.push(FederatedObject {
                    cluster_name: cluster_name.clone(),
                    object,
                });
            }
        }
        result
    }

    /// All objects cached for one cluster
    ///
    /// Empty (not an error) when the cluster has no active entry.
    pub fn list_from_cluster(&self, cluster_name: &str) -> Vec<DynamicObject> {
        let inner = self.informer.inner.lock().expect("informer lock poisoned");
        inner
            .targets
            .get(cluster_name)
            .map(|entry| entry.store.list())
            .unwrap_or_default()
    }

    /// Point lookup in one cluster's cache
    ///
    /// `None` (not an error) when the cluster has no active entry or the key
    /// is absent.
    pub fn get_by_key(&self, cluster_name: &str, key: &str) -> Option<DynamicObject> {
        let inner = self.informer.inner.lock().expect("informer lock poisoned");
        inner
            .targets
            .get(cluster_name)
            .and_then(|entry| entry.store.get_by_key(key))
    }

    /// Point lookup across every live cluster cache
    pub fn get_from_all_clusters(&self, key: &str) -> Vec<FederatedObject> {
        let inner = self.informer.inner.lock().expect("informer lock poisoned");
        let mut result = Vec::new();
        for (cluster_name, entry) in &inner.targets {
            if let Some(object) = entry.store.get_by_key(key) {
                result.push(FederatedObject {
                    cluster_name: cluster_name.clone(),
                    object,
                });
            }
        }
        result
    }

    /// The key under which an item would be cached
    pub fn key_for(&self, item: &DynamicObject) -> String {
        ObjectStore::key_for(item)
    }

    /// Conservative check that the caches for exactly the given clusters
    /// exist and have completed their initial sync
    ///
    /// True only if the active entry count equals `clusters.len()`, every
    /// named cluster has an entry, and every entry's loop reports synced.
    /// Not a synchronization mechanism - content may still lag.
    pub fn clusters_synced(&self, clusters: &[MemberCluster]) -> bool {
        // Snapshot the controllers under the lock, check them outside it.
        let controllers = {
            let inner = self.informer.inner.lock().expect("informer lock poisoned");
            if inner.targets.len() != clusters.len() {
                return false;
            }
            let mut controllers = Vec::with_capacity(clusters.len());
            for cluster in clusters {
                match inner.targets.get(&cluster.name_any()) {
                    Some(entry) => controllers.push(Arc::clone(&entry.controller)),
                    None => return false,
                }
            }
            controllers
        };

        controllers.iter().all(|c| c.has_synced())
    }
}
