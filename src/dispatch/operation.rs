//! Counting core of the dispatch layer
//!
//! The higher-level dispatchers announce each operation up front
//! ([`increment_operations_initiated`](OperationDispatcher::increment_operations_initiated)),
//! run it concurrently through
//! [`cluster_operation`](OperationDispatcher::cluster_operation), and join on
//! [`wait`](OperationDispatcher::wait). Initiate-then-spawn ordering is what
//! makes the join race-free: the expected count is always ahead of the
//! completion count.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tracing::debug;

use crate::client::ResourceClient;
use crate::dispatch::ClientAccessor;
use crate::error::Error;
use crate::types::ReconciliationStatus;
use crate::Result;

/// One per-cluster operation body
///
/// Receives the client-accessor outcome for its cluster; resolving (and
/// reporting) accessor failures is the closure's job, so failure context
/// stays where the operation's kind and name are known. `Err` marks the
/// operation failed and feeds the dispatcher's first-error slot; `Ok` with a
/// non-[`AllOk`](ReconciliationStatus::AllOk) status marks the pass as not
/// fully successful without recording an error.
pub type OperationFn = Box<
    dyn FnOnce(Result<Arc<dyn ResourceClient>>) -> BoxFuture<'static, Result<ReconciliationStatus>>
        + Send,
>;

struct DispatchState {
    initiated: usize,
    completed: usize,
    all_ok: bool,
    first_error: Option<Arc<Error>>,
}

struct Inner {
    client_accessor: ClientAccessor,
    state: Mutex<DispatchState>,
    notify: Notify,
}

/// Fans operations out to clusters and aggregates their outcomes
///
/// Cloning is cheap and every clone reports into the same aggregate, which is
/// how one reconciliation pass shares a dispatcher across its spawned
/// per-cluster tasks.
#[derive(Clone)]
pub struct OperationDispatcher {
    inner: Arc<Inner>,
}

impl OperationDispatcher {
    /// Create a dispatcher resolving clients through the given accessor
    pub fn new(client_accessor: ClientAccessor) -> Self {
        Self {
            inner: Arc::new(Inner {
                client_accessor,
                state: Mutex::new(DispatchState {
                    initiated: 0,
                    completed: 0,
                    all_ok: true,
                    first_error: None,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Announce one more operation before spawning it
    ///
    /// Must be called before the corresponding
    /// [`cluster_operation`](Self::cluster_operation), never after.
    pub fn increment_operations_initiated(&self) {
        let mut state = self.inner.state.lock().expect("dispatch state lock poisoned");
        state.initiated += 1;
    }

    /// Record a completed operation's status
    pub fn record_status(&self, status: ReconciliationStatus) {
        {
            let mut state = self.inner.state.lock().expect("dispatch state lock poisoned");
            state.completed += 1;
            if !status.is_ok() {
                state.all_ok = false;
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Record a completed operation that failed
    ///
    /// The first recorded error wins; later ones only count completions.
    pub fn record_error(&self, error: Arc<Error>) {
        {
            let mut state = self.inner.state.lock().expect("dispatch state lock poisoned");
            state.completed += 1;
            state.all_ok = false;
            if state.first_error.is_none() {
                state.first_error = Some(error);
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Run one announced operation concurrently against a cluster
    ///
    /// Resolves the accessor for `cluster_name`, hands the result to the
    /// operation body on a spawned task, and records the outcome. One
    /// cluster's slowness or failure never blocks or aborts its siblings.
    pub fn cluster_operation(&self, cluster_name: String, op: OperationFn) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let client = (dispatcher.inner.client_accessor)(&cluster_name);
            match op(client).await {
                Ok(status) => {
                    debug!(
                        cluster = %cluster_name,
                        ?status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cluster operation completed"
                    );
                    dispatcher.record_status(status);
                }
                Err(e) => dispatcher.record_error(Arc::new(e)),
            }
        });
    }

    /// Join on every announced operation
    ///
    /// Resolves once completions catch up with initiations. Returns whether
    /// every operation reported [`AllOk`](ReconciliationStatus::AllOk), and
    /// the first recorded error if any operation failed outright. With
    /// nothing announced it resolves immediately as ok.
    pub async fn wait(&self) -> (bool, Option<Arc<Error>>) {
        loop {
            // Register for notification before checking, so a completion
            // landing between the check and the await is never lost.
            let notified = self.inner.notify.notified();
            {
                let state = self.inner.state.lock().expect("dispatch state lock poisoned");
                if state.completed >= state.initiated {
                    return (state.all_ok, state.first_error.clone());
                }
            }
            notified.await;
        }
    }
}
