//! Deployment lifecycle operations
//!
//! Every mutating operation has the same shape:
//! - validate: read the deployment (and its history for rollbacks)
//! - mutate: one optimistic-concurrency update
//! - converge: poll the deployment until a pure predicate holds
//!
//! Progress is pushed to a [`ProgressSender`] on every transition and every
//! poll, followed by exactly one terminal summary. All gateway calls share
//! the operation deadline and observe its [`CancellationToken`].

pub mod convergence;


use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gateway::{bounded, ClusterGateway, LogOptions};
use crate::models::{
    PodSummary, RevisionSnapshot, Workload, WorkloadRef, WorkloadStatus, RESTARTED_AT_ANNOTATION,
};
use crate::observability::OpsMetrics;
use crate::relay::{self, ProgressReceiver, ProgressSender};
use crate::revision::{resolve_with_policy, RollbackPolicy, RollbackTarget};

use convergence::{
    describe_rollout, describe_scale, rollback_converged, rollout_converged, scale_converged,
};

/// Phase of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Mutating,
    Converging,
    Succeeded,
    Failed,
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Mutating => "mutating",
            OperationState::Converging => "converging",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
            OperationState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle operation does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperationKind {
    Scale { replicas: i32 },
    Restart,
    Rollback { target: RollbackTarget },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Scale { .. } => "scale",
            OperationKind::Restart => "restart",
            OperationKind::Rollback { .. } => "rollback",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Scale { replicas } => write!(f, "scale to {replicas} replicas"),
            OperationKind::Restart => write!(f, "restart"),
            OperationKind::Rollback { target } => write!(f, "rollback to {target}"),
        }
    }
}

/// Wall-clock budget per operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBudgets {
    pub scale: Duration,
    pub restart: Duration,
    pub rollback: Duration,
    pub revisions: Duration,
    pub status: Duration,
}

impl Default for OperationBudgets {
    fn default() -> Self {
        Self {
            scale: Duration::from_secs(20),
            restart: Duration::from_secs(10),
            rollback: Duration::from_secs(30),
            revisions: Duration::from_secs(10),
            status: Duration::from_secs(10),
        }
    }
}

impl OperationBudgets {
    pub fn for_kind(&self, kind: &OperationKind) -> Duration {
        match kind {
            OperationKind::Scale { .. } => self.scale,
            OperationKind::Restart => self.restart,
            OperationKind::Rollback { .. } => self.rollback,
        }
    }
}

/// Configuration for the lifecycle controller
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Delay between convergence polls (default: 2 seconds)
    pub poll_interval: Duration,
    /// Update attempts for a rollback before giving up on conflicts (default: 5)
    pub conflict_attempts: u32,
    /// Pause between conflicting rollback updates (default: 1 second)
    pub conflict_backoff: Duration,
    /// Meaning of "previous revision"
    pub rollback_policy: RollbackPolicy,
    pub budgets: OperationBudgets,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            conflict_attempts: 5,
            conflict_backoff: Duration::from_secs(1),
            rollback_policy: RollbackPolicy::default(),
            budgets: OperationBudgets::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn with_budgets(mut self, budgets: OperationBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A lifecycle request bound to its deadline budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub target: WorkloadRef,
    pub kind: OperationKind,
    pub budget: Duration,
}

/// Terminal result of an operation
#[derive(Debug, Clone)]
pub struct Outcome {
    pub target: WorkloadRef,
    pub kind: OperationKind,
    pub state: OperationState,
    pub error: Option<Error>,
    pub elapsed: Duration,
    /// Same text as the final progress event
    pub summary: String,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.state == OperationState::Succeeded
    }
}

/// Rollout history of a deployment plus the revision it is currently on
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionListing {
    pub target: WorkloadRef,
    pub current: Option<i64>,
    pub snapshots: Vec<RevisionSnapshot>,
}

/// Runs lifecycle operations against a cluster gateway.
///
/// Holds no per-target state: two operations on the same deployment may run
/// concurrently, and serialising them is the caller's concern.
#[derive(Clone)]
pub struct LifecycleController {
    gateway: Arc<dyn ClusterGateway>,
    config: LifecycleConfig,
    metrics: OpsMetrics,
}

impl LifecycleController {
    pub fn new(gateway: Arc<dyn ClusterGateway>, config: LifecycleConfig) -> Self {
        Self {
            gateway,
            config,
            metrics: OpsMetrics::new(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Build an operation with the configured budget for its kind
    pub fn operation(&self, target: WorkloadRef, kind: OperationKind) -> Operation {
        let budget = self.config.budgets.for_kind(&kind);
        Operation {
            target,
            kind,
            budget,
        }
    }

    /// Run an operation to completion.
    ///
    /// The relay receives the terminal summary last and is closed before this
    /// returns.
    pub async fn execute(
        &self,
        op: Operation,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Outcome {
        let started = Instant::now();
        info!(
            namespace = %op.target.namespace,
            name = %op.target.name,
            operation = op.kind.name(),
            budget_secs = op.budget.as_secs(),
            "Starting lifecycle operation"
        );

        let run = Run {
            gateway: self.gateway.as_ref(),
            config: &self.config,
            metrics: &self.metrics,
            target: &op.target,
            deadline: started + op.budget,
            cancel: &cancel,
            progress: &progress,
        };

        let result = match op.kind {
            OperationKind::Scale { replicas } => run.scale(replicas).await,
            OperationKind::Restart => run.restart().await,
            OperationKind::Rollback { target } => run.rollback(target).await,
        };

        let state = match &result {
            Ok(_) => OperationState::Succeeded,
            Err(Error::Timeout(_)) => OperationState::TimedOut,
            Err(_) => OperationState::Failed,
        };
        let summary = summarize(&op, &result);
        let elapsed = started.elapsed();

        if cancel.is_cancelled() {
            progress.try_emit(state, summary.clone());
        } else {
            progress.emit(state, summary.clone()).await;
        }
        progress.close();

        self.metrics
            .record_operation(op.kind.name(), state.as_str(), elapsed.as_secs_f64());

        match &result {
            Ok(_) => info!(
                namespace = %op.target.namespace,
                name = %op.target.name,
                operation = op.kind.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Lifecycle operation succeeded"
            ),
            Err(e) => warn!(
                namespace = %op.target.namespace,
                name = %op.target.name,
                operation = op.kind.name(),
                state = %state,
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Lifecycle operation did not succeed"
            ),
        }

        Outcome {
            target: op.target,
            kind: op.kind,
            state,
            error: result.err(),
            elapsed,
            summary,
        }
    }

    /// Run an operation on its own task, returning the consumer half of its relay
    pub fn spawn(
        &self,
        op: Operation,
        cancel: CancellationToken,
    ) -> (JoinHandle<Outcome>, ProgressReceiver) {
        let (tx, rx) = relay::channel(relay::DEFAULT_CAPACITY);
        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.execute(op, tx, cancel).await });
        (handle, rx)
    }

    /// Point-in-time status of a deployment
    pub async fn status(&self, target: &WorkloadRef) -> Result<WorkloadStatus> {
        let deadline = Instant::now() + self.config.budgets.status;
        let workload = bounded(
            deadline,
            "reading deployment status",
            self.gateway.get_workload(&target.namespace, &target.name),
        )
        .await?;
        Ok(workload.summary())
    }

    /// Rollout history, ascending by revision
    pub async fn revisions(&self, target: &WorkloadRef) -> Result<RevisionListing> {
        let deadline = Instant::now() + self.config.budgets.revisions;
        let workload = bounded(
            deadline,
            "reading deployment",
            self.gateway.get_workload(&target.namespace, &target.name),
        )
        .await?;
        let snapshots = bounded(
            deadline,
            "listing revisions",
            self.gateway
                .list_revision_snapshots(&target.namespace, &target.name),
        )
        .await?;

        Ok(RevisionListing {
            target: target.clone(),
            current: workload.revision,
            snapshots,
        })
    }

    /// Pods selected by a deployment
    pub async fn pods(&self, target: &WorkloadRef) -> Result<Vec<PodSummary>> {
        let deadline = Instant::now() + self.config.budgets.status;
        bounded(
            deadline,
            "listing pods",
            self.gateway.list_pods(&target.namespace, &target.name),
        )
        .await
    }

    /// Lifecycle phase of one pod (`Running`, `Pending`, ...)
    pub async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<String> {
        let deadline = Instant::now() + self.config.budgets.status;
        bounded(
            deadline,
            "reading pod",
            self.gateway.get_pod_phase(namespace, pod),
        )
        .await
    }

    /// Logs of one pod
    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String> {
        let deadline = Instant::now() + self.config.budgets.status;
        bounded(
            deadline,
            "fetching pod logs",
            self.gateway.stream_pod_logs(namespace, pod, options),
        )
        .await
    }
}

/// Final message for an operation result
fn summarize(op: &Operation, result: &Result<String>) -> String {
    match result {
        Ok(detail) => detail.clone(),
        Err(Error::Timeout(_)) => format!(
            "{} of {} timed out after {}s; the change may have been applied, re-check status",
            op.kind.name(),
            op.target,
            op.budget.as_secs()
        ),
        Err(Error::Cancelled) => format!("{} of {} cancelled", op.kind.name(), op.target),
        Err(e) if e.is_not_found() => format!("cannot {} {}: {e}", op.kind.name(), op.target),
        Err(e) => format!("{} of {} failed: {e}", op.kind.name(), op.target),
    }
}

/// State shared by the steps of one operation
struct Run<'a> {
    gateway: &'a dyn ClusterGateway,
    config: &'a LifecycleConfig,
    metrics: &'a OpsMetrics,
    target: &'a WorkloadRef,
    deadline: Instant,
    cancel: &'a CancellationToken,
    progress: &'a ProgressSender,
}

impl Run<'_> {
    /// Emit progress unless cancelled; a send stalled on a full relay is
    /// abandoned as soon as the token fires
    async fn emit(&self, state: OperationState, message: impl Into<String>) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.progress.emit(state, message) => {}
        }
    }

    /// Await a gateway call under the deadline, giving up early on cancellation
    async fn call<T, F>(&self, activity: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = bounded(self.deadline, activity, call) => result,
        }
    }

    async fn pause(&self, delay: Duration, activity: &str) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = sleep_until(self.deadline) => Err(Error::timeout(activity)),
            _ = sleep(delay) => Ok(()),
        }
    }

    async fn read(&self) -> Result<Workload> {
        self.call(
            "reading deployment",
            self.gateway
                .get_workload(&self.target.namespace, &self.target.name),
        )
        .await
    }

    /// Poll until `done` holds, checking once immediately.
    ///
    /// Transient read failures skip a poll rather than ending the operation.
    async fn converge<D, S>(&self, activity: &str, done: D, describe: S) -> Result<Workload>
    where
        D: Fn(&Workload) -> bool,
        S: Fn(&Workload) -> String,
    {
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.read().await {
                Ok(workload) => {
                    self.emit(OperationState::Converging, describe(&workload))
                        .await;
                    if done(&workload) {
                        debug!(
                            namespace = %self.target.namespace,
                            name = %self.target.name,
                            polls,
                            "Deployment converged"
                        );
                        return Ok(workload);
                    }
                }
                Err(e @ Error::Transient(_)) => {
                    warn!(
                        namespace = %self.target.namespace,
                        name = %self.target.name,
                        error = %e,
                        "Poll failed, retrying on next interval"
                    );
                }
                Err(e) => return Err(e),
            }
            self.pause(self.config.poll_interval, activity).await?;
        }
    }

    async fn scale(&self, replicas: i32) -> Result<String> {
        if replicas < 0 {
            return Err(Error::invalid_target(format!(
                "replica count must be non-negative, got {replicas}"
            )));
        }

        self.emit(OperationState::Pending, format!("checking {}", self.target))
            .await;
        let current = self.read().await?;

        self.emit(
            OperationState::Mutating,
            format!(
                "scaling {} from {} to {} replicas",
                self.target, current.desired_replicas, replicas
            ),
        )
        .await;
        let set_replicas = move |mut w: Workload| {
            w.desired_replicas = replicas;
            w
        };
        self.call(
            "updating deployment",
            self.gateway
                .update_workload(&self.target.namespace, &self.target.name, &set_replicas),
        )
        .await?;

        let workload = self
            .converge(
                "waiting for replicas",
                |w| scale_converged(w, replicas),
                |w| describe_scale(w, replicas),
            )
            .await?;

        Ok(format!(
            "{} scaled to {} replicas ({} available)",
            self.target, replicas, workload.status.available
        ))
    }

    async fn restart(&self) -> Result<String> {
        self.emit(OperationState::Pending, format!("checking {}", self.target))
            .await;
        self.read().await?;

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.emit(
            OperationState::Mutating,
            format!("restarting {} (restartedAt {stamp})", self.target),
        )
        .await;
        let annotate = {
            let stamp = stamp.clone();
            move |mut w: Workload| {
                w.set_template_annotation(RESTARTED_AT_ANNOTATION, stamp.clone());
                w
            }
        };
        self.call(
            "updating deployment",
            self.gateway
                .update_workload(&self.target.namespace, &self.target.name, &annotate),
        )
        .await?;

        let workload = self
            .converge("waiting for rollout", rollout_converged, describe_rollout)
            .await?;

        Ok(format!(
            "{} restarted, {}/{} replicas available",
            self.target, workload.status.available, workload.desired_replicas
        ))
    }

    async fn rollback(&self, requested: RollbackTarget) -> Result<String> {
        self.emit(
            OperationState::Pending,
            format!("resolving {requested} of {}", self.target),
        )
        .await;
        let current = self.read().await?;
        let snapshots = self
            .call(
                "listing revisions",
                self.gateway
                    .list_revision_snapshots(&self.target.namespace, &self.target.name),
            )
            .await?;
        let chosen = resolve_with_policy(
            &snapshots,
            current.revision,
            requested,
            self.config.rollback_policy,
        )?
        .clone();

        let from = current
            .revision
            .map(|r| format!("revision {r}"))
            .unwrap_or_else(|| "unknown revision".to_string());
        self.emit(
            OperationState::Mutating,
            format!(
                "rolling back {} from {} to revision {} ({})",
                self.target, from, chosen.revision, chosen.image
            ),
        )
        .await;

        let template = chosen.template.clone();
        let replace_template = move |mut w: Workload| {
            w.template = template.clone();
            w
        };

        let attempts = self.config.conflict_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let update = self.call(
                "updating deployment",
                self.gateway.update_workload(
                    &self.target.namespace,
                    &self.target.name,
                    &replace_template,
                ),
            );
            match update.await {
                Ok(_) => break,
                Err(e) if e.is_conflict() && attempt < attempts => {
                    self.metrics.inc_conflict_retries();
                    warn!(
                        namespace = %self.target.namespace,
                        name = %self.target.name,
                        attempt,
                        max_attempts = attempts,
                        "Conflict updating deployment, retrying with a fresh read"
                    );
                    self.emit(
                        OperationState::Mutating,
                        format!(
                            "{} was modified concurrently, retrying ({attempt}/{attempts})",
                            self.target
                        ),
                    )
                    .await;
                    self.pause(self.config.conflict_backoff, "retrying after conflict")
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        let workload = self
            .converge("waiting for rollback", rollback_converged, describe_rollout)
            .await?;

        Ok(format!(
            "{} rolled back to revision {} ({}), {}/{} replicas available",
            self.target,
            chosen.revision,
            chosen.image,
            workload.status.available,
            workload.desired_replicas
        ))
    }
}
