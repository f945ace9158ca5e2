//! Cluster orchestrator seam.
//!
//! The orchestrator owns pods; the scaler only asks it to resize a
//! deployment and reads back how many replicas it acknowledged.

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Replica control for function deployments.
pub trait Orchestrator: Send + Sync {
    /// Ask for `replicas` pods of `deployment`. Returns the replica count
    /// the orchestrator acknowledged, which may differ from the request.
    fn set_replicas<'a>(
        &'a self,
        deployment: &'a str,
        replicas: u32,
    ) -> BoxFuture<'a, anyhow::Result<u32>>;

    /// Current replica count of `deployment`.
    fn current_replicas<'a>(&'a self, deployment: &'a str) -> BoxFuture<'a, anyhow::Result<u32>>;
}
