//! Typed facade over the orchestrator API
//!
//! The [`ClusterGateway`] trait is the seam between lifecycle logic and the
//! Kubernetes API: production code uses [`KubeGateway`], tests substitute an
//! in-memory fake.

mod kubernetes;

#[cfg(test)]
pub(crate) mod fake;

pub use kubernetes::{KubeGateway, KubeSource};

use std::future::Future;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{PodSummary, RevisionSnapshot, Workload};

/// Pure mutation applied to the latest read of a workload before it is written back
pub type Mutation<'a> = &'a (dyn Fn(Workload) -> Workload + Send + Sync);

/// Options for pod log retrieval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Logs of the previous container instance
    pub previous: bool,
    /// Only the last N lines
    pub tail_lines: Option<i64>,
    /// Only lines newer than this many seconds
    pub since_seconds: Option<i64>,
    /// Prefix every line with its timestamp
    pub timestamps: bool,
}

/// Operations the lifecycle core needs from the orchestrator
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Read a deployment
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload>;

    /// Read the latest version, apply `mutate`, and write it back under
    /// optimistic concurrency. A concurrent writer yields `Error::Conflict`;
    /// retrying is the caller's decision.
    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutation<'_>,
    ) -> Result<Workload>;

    /// Rollout history of a deployment, ascending by revision number
    async fn list_revision_snapshots(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Vec<RevisionSnapshot>>;

    /// Pods selected by a deployment
    async fn list_pods(&self, namespace: &str, workload: &str) -> Result<Vec<PodSummary>>;

    /// Lifecycle phase of a single pod (`Running`, `Pending`, ...)
    async fn get_pod_phase(&self, namespace: &str, pod: &str) -> Result<String>;

    /// Container logs of a pod as one text blob
    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String>;
}

/// Run a gateway call against a deadline, mapping expiry to `Error::Timeout`.
pub async fn bounded<T, F>(deadline: Instant, activity: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(activity)),
    }
}
