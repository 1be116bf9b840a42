//! Weft - synchronization core for multi-cluster federation controllers
//!
//! Weft maintains a live view of resources spread across a changing set of
//! member clusters and dispatches reconciliation operations to those clusters
//! concurrently. It is the machinery beneath a federation control plane, not
//! the control plane itself: the decision of *what* to reconcile stays with
//! the caller.
//!
//! # Architecture
//!
//! Two tightly coupled subsystems:
//! - The **federated informer** watches the cluster registry (a
//!   [`crd::MemberCluster`] per member) and runs one cache loop per ready
//!   cluster, exposing a unified read-only view over all per-cluster caches.
//! - The **operation dispatcher** fans a named operation out to a set of
//!   clusters, one task per cluster, and lets the caller join on the
//!   aggregate outcome of the pass.
//!
//! Both subsystems are eventually consistent by design. Callers must tolerate
//! staleness and partial availability; nothing here is a consensus protocol
//! or a cross-cluster transaction.
//!
//! # Modules
//!
//! - [`crd`] - The MemberCluster registry resource
//! - [`client`] - The per-cluster resource client seam
//! - [`informer`] - Federated informer and aggregated read-only store
//! - [`dispatch`] - Concurrent per-cluster operation dispatch
//! - [`types`] - Qualified names and per-operation outcome values
//! - [`labels`] - Managed-label helpers
//! - [`retry`] - Backoff used by cache loops to recover from watch failures
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod crd;
pub mod dispatch;
pub mod error;
pub mod informer;
pub mod labels;
pub mod retry;
pub mod types;

pub use error::Error;

/// Result type alias using the crate's [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;
