//! In-memory gateway used by unit tests
//!
//! Simulates just enough of the deployment controller: updates bump the
//! generation, and status counters catch up with the desired state after a
//! configurable number of reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

use super::{ClusterGateway, LogOptions, Mutation};
use crate::error::{Error, Result};
use crate::models::{PodSummary, ReplicaCounts, RevisionSnapshot, Workload};

#[derive(Default)]
struct FakeState {
    workloads: HashMap<String, Workload>,
    snapshots: HashMap<String, Vec<RevisionSnapshot>>,
    pods: HashMap<String, Vec<PodSummary>>,
    /// Reads left before the status converges on the current spec
    reads_until_converged: HashMap<String, u32>,
    converge_after_reads: u32,
    frozen: bool,
    conflicts_remaining: u32,
    get_error: Option<Error>,
    get_calls: u32,
    update_calls: u32,
    successful_updates: u32,
}

pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

pub(crate) fn pod_template(image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

/// A settled workload: status already matches spec
pub(crate) fn workload(namespace: &str, name: &str, replicas: i32, image: &str) -> Workload {
    Workload {
        namespace: namespace.to_string(),
        name: name.to_string(),
        generation: 1,
        desired_replicas: replicas,
        selector: BTreeMap::from([("app".to_string(), name.to_string())]),
        revision: Some(1),
        template: pod_template(image),
        status: ReplicaCounts {
            replicas,
            updated: replicas,
            ready: replicas,
            available: replicas,
            unavailable: 0,
            observed_generation: 1,
        },
    }
}

pub(crate) fn snapshot(revision: i64, image: &str) -> RevisionSnapshot {
    RevisionSnapshot {
        revision,
        replica_set: format!("web-{revision}"),
        image: image.to_string(),
        created_at: None,
        replicas: 0,
        ready_replicas: 0,
        template: pod_template(image),
    }
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                converge_after_reads: 1,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn with_workload(self, workload: Workload) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let k = key(&workload.namespace, &workload.name);
            state.workloads.insert(k, workload);
        }
        self
    }

    pub(crate) fn with_snapshots(self, namespace: &str, name: &str, snaps: Vec<RevisionSnapshot>) -> Self {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert(key(namespace, name), snaps);
        self
    }

    pub(crate) fn with_pods(self, namespace: &str, name: &str, pods: Vec<PodSummary>) -> Self {
        self.state.lock().unwrap().pods.insert(key(namespace, name), pods);
        self
    }

    /// Number of post-update reads that still report the old status
    pub(crate) fn converge_after(self, reads: u32) -> Self {
        self.state.lock().unwrap().converge_after_reads = reads;
        self
    }

    /// Status never catches up with the desired state
    pub(crate) fn frozen(self) -> Self {
        self.state.lock().unwrap().frozen = true;
        self
    }

    /// The next `n` updates fail with a conflict
    pub(crate) fn with_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().conflicts_remaining = n;
        self
    }

    pub(crate) fn fail_reads_with(&self, err: Option<Error>) {
        self.state.lock().unwrap().get_error = err;
    }

    pub(crate) fn current(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&key(namespace, name))
            .cloned()
    }

    pub(crate) fn get_calls(&self) -> u32 {
        self.state.lock().unwrap().get_calls
    }

    pub(crate) fn update_calls(&self) -> u32 {
        self.state.lock().unwrap().update_calls
    }

    pub(crate) fn successful_updates(&self) -> u32 {
        self.state.lock().unwrap().successful_updates
    }
}

fn not_found(namespace: &str, name: &str) -> Error {
    Error::not_found(format!(r#"deployments.apps "{name}" not found in {namespace}"#))
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if let Some(err) = state.get_error.clone() {
            return Err(err);
        }

        let k = key(namespace, name);
        let frozen = state.frozen;
        let should_converge = match state.reads_until_converged.get_mut(&k) {
            Some(0) => !frozen,
            Some(left) => {
                *left -= 1;
                *left == 0 && !frozen
            }
            None => false,
        };

        let workload = state
            .workloads
            .get_mut(&k)
            .ok_or_else(|| not_found(namespace, name))?;

        if should_converge {
            let desired = workload.desired_replicas;
            workload.status = ReplicaCounts {
                replicas: desired,
                updated: desired,
                ready: desired,
                available: desired,
                unavailable: 0,
                observed_generation: workload.generation,
            };
        }

        Ok(workload.clone())
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutation<'_>,
    ) -> Result<Workload> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;

        let k = key(namespace, name);
        let current = state
            .workloads
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found(namespace, name))?;

        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(Error::conflict(
                "the object has been modified; please apply your changes to the latest version",
            ));
        }

        let mut updated = mutate(current.clone());
        if updated.template != current.template || updated.desired_replicas != current.desired_replicas {
            updated.generation = current.generation + 1;
            if updated.template != current.template {
                updated.revision = current.revision.map(|r| r + 1);
                updated.status.updated = 0;
            }
            let reads = state.converge_after_reads;
            state.reads_until_converged.insert(k.clone(), reads);
        }

        state.successful_updates += 1;
        state.workloads.insert(k, updated.clone());
        Ok(updated)
    }

    async fn list_revision_snapshots(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Vec<RevisionSnapshot>> {
        let state = self.state.lock().unwrap();
        let k = key(namespace, workload);
        if !state.workloads.contains_key(&k) {
            return Err(not_found(namespace, workload));
        }
        let mut snaps = state.snapshots.get(&k).cloned().unwrap_or_default();
        snaps.sort_by_key(|s| s.revision);
        Ok(snaps)
    }

    async fn list_pods(&self, namespace: &str, workload: &str) -> Result<Vec<PodSummary>> {
        let state = self.state.lock().unwrap();
        let k = key(namespace, workload);
        if !state.workloads.contains_key(&k) {
            return Err(not_found(namespace, workload));
        }
        Ok(state.pods.get(&k).cloned().unwrap_or_default())
    }

    async fn get_pod_phase(&self, namespace: &str, pod: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{namespace}/");
        state
            .pods
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .flat_map(|(_, pods)| pods)
            .find(|p| p.name == pod)
            .map(|p| p.phase.clone())
            .ok_or_else(|| Error::not_found(format!(r#"pods "{pod}" not found in {namespace}"#)))
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String> {
        let phase = self.get_pod_phase(namespace, pod).await?;
        Ok(format!("{pod} ({phase}) previous={}\n", options.previous))
    }
}
