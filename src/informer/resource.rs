//! Per-cluster cache loop
//!
//! A [`ResourceInformer`] maintains the local snapshot of one member
//! cluster's resource collection: list, mark synced, then apply watch events
//! until cancelled. Watch failures fall back to a jittered relist; the
//! federated informer never restarts a loop itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::client::{ResourceClient, ResourceEvent};
use crate::crd::MemberCluster;
use crate::informer::store::ObjectStore;
use crate::retry::{Backoff, RetryConfig};

/// Callback fired once per object change a cache loop observes
///
/// The federation's reconciliation loop typically enqueues the object's key
/// here. Must not block: it runs on the cache loop's task.
pub type TriggerFn = Arc<dyn Fn(&DynamicObject) + Send + Sync>;

/// Control surface of a running cache loop
///
/// Split from the store so the federated informer can check sync status
/// without touching cached data, and so tests can substitute controllers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheController: Send + Sync {
    /// Whether the loop has completed its initial list
    ///
    /// Toggles false→true exactly once and never back, even across relists.
    fn has_synced(&self) -> bool;

    /// Drive the loop until the token is cancelled
    async fn run(&self, shutdown: CancellationToken);
}

/// A per-cluster cache built by a [`TargetInformerFactory`]
pub struct TargetCache {
    /// Read cache the loop maintains
    pub store: Arc<ObjectStore>,
    /// Control surface for the loop
    pub controller: Arc<dyn CacheController>,
}

/// Builds the per-cluster cache loop for a newly ready member
///
/// Supplied by the caller so the resource kind under federation stays
/// pluggable; [`resource_informer_factory`] is the stock implementation.
pub type TargetInformerFactory =
    Arc<dyn Fn(&MemberCluster, Arc<dyn ResourceClient>) -> TargetCache + Send + Sync>;

/// Stock factory producing a [`ResourceInformer`] per ready cluster
pub fn resource_informer_factory(trigger: Option<TriggerFn>) -> TargetInformerFactory {
    Arc::new(move |_cluster: &MemberCluster, client| {
        let informer = ResourceInformer::new(client, trigger.clone());
        TargetCache {
            store: informer.store(),
            controller: informer,
        }
    })
}

enum LoopExit {
    Cancelled,
    Failed(kube::Error),
    StreamClosed,
}

/// Watch-and-cache loop for one cluster's resource collection
pub struct ResourceInformer {
    client: Arc<dyn ResourceClient>,
    store: Arc<ObjectStore>,
    synced: AtomicBool,
    trigger: Option<TriggerFn>,
    retry: RetryConfig,
}

impl ResourceInformer {
    /// Create a cache loop over the given client
    pub fn new(client: Arc<dyn ResourceClient>, trigger: Option<TriggerFn>) -> Arc<Self> {
        Self::with_retry(client, trigger, RetryConfig::default())
    }

    /// Create a cache loop with a custom relist backoff schedule
    pub fn with_retry(
        client: Arc<dyn ResourceClient>,
        trigger: Option<TriggerFn>,
        retry: RetryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            store: Arc::new(ObjectStore::new()),
            synced: AtomicBool::new(false),
            trigger,
            retry,
        })
    }

    /// The read cache this loop maintains
    pub fn store(&self) -> Arc<ObjectStore> {
        Arc::clone(&self.store)
    }

    fn fire_trigger(&self, obj: &DynamicObject) {
        if let Some(trigger) = &self.trigger {
            trigger(obj);
        }
    }

    async fn list_and_watch(&self, shutdown: &CancellationToken, backoff: &mut Backoff) -> LoopExit {
        let objs = tokio::select! {
            _ = shutdown.cancelled() => return LoopExit::Cancelled,
            res = self.client.list() => match res {
                Ok(objs) => objs,
                Err(e) => return LoopExit::Failed(e),
            },
        };
        backoff.reset();

        for obj in &objs {
            self.fire_trigger(obj);
        }
        self.store.replace(objs);
        self.synced.store(true, Ordering::SeqCst);

        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => return LoopExit::Cancelled,
            res = self.client.watch() => match res {
                Ok(stream) => stream,
                Err(e) => return LoopExit::Failed(e),
            },
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return LoopExit::Cancelled,
                event = stream.next() => match event {
                    Some(ResourceEvent::Applied(obj)) => {
                        self.store.insert(obj.clone());
                        self.fire_trigger(&obj);
                    }
                    Some(ResourceEvent::Deleted(obj)) => {
                        self.store.delete(&obj);
                        self.fire_trigger(&obj);
                    }
                    Some(ResourceEvent::Restarted(objs)) => {
                        for obj in &objs {
                            self.fire_trigger(obj);
                        }
                        self.store.replace(objs);
                    }
                    None => return LoopExit::StreamClosed,
                },
            }
        }
    }
}

#[async_trait]
impl CacheController for ResourceInformer {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown: CancellationToken) {
        let kind = self.client.kind();
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.list_and_watch(&shutdown, &mut backoff).await {
                LoopExit::Cancelled => break,
                LoopExit::Failed(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        kind = %kind,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Cache loop failed, relisting after backoff"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                LoopExit::StreamClosed => {
                    debug!(kind = %kind, "Watch stream closed, relisting");
                }
            }
        }
        debug!(kind = %kind, "Cache loop stopped");
    }
}
