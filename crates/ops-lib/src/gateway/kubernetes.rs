//! Cluster gateway backed by the Kubernetes API via kube-rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use super::{ClusterGateway, LogOptions, Mutation};
use crate::error::{Error, Result};
use crate::models::{
    template_image, PodSummary, ReplicaCounts, RevisionSnapshot, Workload, REVISION_ANNOTATION,
};

/// Label the deployment controller adds to replica set templates
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Where cluster credentials come from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KubeSource {
    /// Explicit kubeconfig file
    Kubeconfig(PathBuf),
    /// Service account credentials mounted into the pod
    InCluster,
    /// `KUBECONFIG`, then `~/.kube/config`, then in-cluster
    #[default]
    Infer,
}

/// [`ClusterGateway`] implementation talking to a real API server
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the given credential source
    pub async fn connect(source: &KubeSource) -> Result<Self> {
        let config = match source {
            KubeSource::Kubeconfig(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!("failed to read kubeconfig {}: {e}", path.display()))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("invalid kubeconfig: {e}")))?
            }
            KubeSource::InCluster => Config::incluster()
                .map_err(|e| Error::config(format!("in-cluster config unavailable: {e}")))?,
            KubeSource::Infer => Config::infer()
                .await
                .map_err(|e| Error::config(format!("could not infer cluster config: {e}")))?,
        };

        info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API");
        let client = Client::try_from(config)
            .map_err(|e| Error::config(format!("failed to build client: {e}")))?;

        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn selector_for(&self, namespace: &str, workload: &str) -> Result<String> {
        let deployment = self.deployments(namespace).get(workload).await?;
        deployment_selector(namespace, deployment)
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        let deployment = self.deployments(namespace).get(name).await?;
        Ok(workload_from_deployment(deployment))
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutation<'_>,
    ) -> Result<Workload> {
        let api = self.deployments(namespace);

        // The read carries metadata.resourceVersion, so the replace below
        // fails with 409 if anyone wrote in between.
        let mut deployment = api.get(name).await?;
        let mutated = mutate(workload_from_deployment(deployment.clone()));
        apply_workload(&mut deployment, mutated);

        let updated = api
            .replace(name, &PostParams::default(), &deployment)
            .await?;
        debug!(namespace = %namespace, name = %name, "Deployment updated");

        Ok(workload_from_deployment(updated))
    }

    async fn list_revision_snapshots(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Vec<RevisionSnapshot>> {
        let deployment = self.deployments(namespace).get(workload).await?;
        let uid = deployment.metadata.uid.clone();
        let selector = deployment_selector(namespace, deployment)?;
        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = replica_sets
            .list(&ListParams::default().labels(&selector))
            .await?;

        debug!(
            namespace = %namespace,
            workload = %workload,
            selector = %selector,
            replica_sets = list.items.len(),
            "Listed replica sets"
        );

        // A broader selector of another deployment can match these labels too
        let mut snapshots: Vec<RevisionSnapshot> = list
            .items
            .into_iter()
            .filter(|rs| uid.as_deref().map_or(true, |uid| controlled_by(rs, uid)))
            .filter_map(snapshot_from_replica_set)
            .collect();
        snapshots.sort_by_key(|s| s.revision);
        Ok(snapshots)
    }

    async fn list_pods(&self, namespace: &str, workload: &str) -> Result<Vec<PodSummary>> {
        let selector = self.selector_for(namespace, workload).await?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(&selector)).await?;

        let mut summaries: Vec<PodSummary> = list.items.iter().map(pod_summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    async fn get_pod_phase(&self, namespace: &str, pod: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(pod).await?;
        Ok(pod
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string()))
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            previous: options.previous,
            tail_lines: options.tail_lines,
            since_seconds: options.since_seconds,
            timestamps: options.timestamps,
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }
}

fn parse_revision(annotations: Option<&BTreeMap<String, String>>) -> Option<i64> {
    annotations
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.trim().parse().ok())
}

fn selector_string(labels: &BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn deployment_selector(namespace: &str, deployment: Deployment) -> Result<String> {
    let workload = workload_from_deployment(deployment);
    selector_string(&workload.selector).ok_or_else(|| {
        Error::failed(format!(
            "deployment {namespace}/{} has no matchLabels selector",
            workload.name
        ))
    })
}

/// Whether the deployment with `uid` is the controlling owner of `rs`
fn controlled_by(rs: &ReplicaSet, uid: &str) -> bool {
    rs.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.kind == "Deployment" && owner.uid == uid)
}

fn workload_from_deployment(deployment: Deployment) -> Workload {
    let meta = deployment.metadata;
    let spec = deployment.spec.unwrap_or_default();
    let status = deployment.status.unwrap_or_default();

    Workload {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        generation: meta.generation.unwrap_or(0),
        desired_replicas: spec.replicas.unwrap_or(1),
        selector: spec.selector.match_labels.unwrap_or_default(),
        revision: parse_revision(meta.annotations.as_ref()),
        template: spec.template,
        status: ReplicaCounts {
            replicas: status.replicas.unwrap_or(0),
            updated: status.updated_replicas.unwrap_or(0),
            ready: status.ready_replicas.unwrap_or(0),
            available: status.available_replicas.unwrap_or(0),
            unavailable: status.unavailable_replicas.unwrap_or(0),
            observed_generation: status.observed_generation.unwrap_or(0),
        },
    }
}

/// Copy the writable parts of a workload back onto the deployment it was read from
fn apply_workload(deployment: &mut Deployment, workload: Workload) {
    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(workload.desired_replicas);
    spec.template = workload.template;
}

fn snapshot_from_replica_set(rs: ReplicaSet) -> Option<RevisionSnapshot> {
    let revision = parse_revision(rs.metadata.annotations.as_ref())?;
    let mut template = rs
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .unwrap_or_default();
    strip_template_hash(&mut template);

    let status = rs.status.unwrap_or_default();

    Some(RevisionSnapshot {
        revision,
        replica_set: rs.metadata.name.unwrap_or_default(),
        image: template_image(&template).unwrap_or_default().to_string(),
        created_at: rs.metadata.creation_timestamp.map(|t| t.0),
        replicas: status.replicas,
        ready_replicas: status.ready_replicas.unwrap_or(0),
        template,
    })
}

// Same normalisation `kubectl rollout undo` applies before copying a template back.
fn strip_template_hash(template: &mut PodTemplateSpec) {
    if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
        labels.remove(POD_TEMPLATE_HASH_LABEL);
    }
}

fn pod_summary(pod: &Pod) -> PodSummary {
    let status = pod.status.as_ref();
    let container_statuses = status.and_then(|s| s.container_statuses.as_ref());

    PodSummary {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready: container_statuses
            .map(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready))
            .unwrap_or(false),
        restarts: container_statuses
            .map(|cs| cs.iter().map(|c| c.restart_count).sum())
            .unwrap_or(0),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, ReplicaSetSpec, ReplicaSetStatus,
    };
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelector, ObjectMeta, OwnerReference, Time,
    };

    fn template(image: &str, hash: Option<&str>) -> PodTemplateSpec {
        let mut labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
        if let Some(hash) = hash {
            labels.insert(POD_TEMPLATE_HASH_LABEL.to_string(), hash.to_string());
        }
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn replica_set(name: &str, revision: Option<&str>, image: &str) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: revision.map(|r| {
                    BTreeMap::from([(REVISION_ANNOTATION.to_string(), r.to_string())])
                }),
                creation_timestamp: Some(Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                template: Some(template(image, Some("abc123"))),
                ..Default::default()
            }),
            status: Some(ReplicaSetStatus {
                replicas: 2,
                ready_replicas: Some(1),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_workload_from_deployment_reads_counters() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("prod".to_string()),
                generation: Some(4),
                annotations: Some(BTreeMap::from([(
                    REVISION_ANNOTATION.to_string(),
                    "3".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                    ..Default::default()
                },
                template: template("web:v3", None),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(2),
                updated_replicas: Some(3),
                replicas: Some(3),
                unavailable_replicas: Some(1),
                observed_generation: Some(4),
                ..Default::default()
            }),
        };

        let workload = workload_from_deployment(deployment);
        assert_eq!(workload.reference().to_string(), "prod/web");
        assert_eq!(workload.revision, Some(3));
        assert_eq!(workload.desired_replicas, 3);
        assert_eq!(workload.status.available, 2);
        assert_eq!(workload.status.unavailable, 1);
        assert_eq!(workload.image(), Some("web:v3"));
        assert_eq!(selector_string(&workload.selector).as_deref(), Some("app=web"));
    }

    #[test]
    fn test_apply_workload_writes_replicas_and_template() {
        let mut deployment = Deployment::default();
        let workload = Workload {
            namespace: "prod".to_string(),
            name: "web".to_string(),
            generation: 1,
            desired_replicas: 5,
            selector: BTreeMap::new(),
            revision: None,
            template: template("web:v9", None),
            status: ReplicaCounts::default(),
        };

        apply_workload(&mut deployment, workload);
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(5));
        assert_eq!(template_image(&spec.template), Some("web:v9"));
    }

    #[test]
    fn test_snapshot_skips_unannotated_replica_sets() {
        assert!(snapshot_from_replica_set(replica_set("web-1", None, "web:v1")).is_none());
        assert!(snapshot_from_replica_set(replica_set("web-1", Some("x"), "web:v1")).is_none());
    }

    #[test]
    fn test_snapshot_strips_template_hash() {
        let snapshot = snapshot_from_replica_set(replica_set("web-2", Some("2"), "web:v2")).unwrap();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.replica_set, "web-2");
        assert_eq!(snapshot.image, "web:v2");
        assert_eq!(snapshot.replicas, 2);
        assert_eq!(snapshot.ready_replicas, 1);

        let labels = snapshot.template.metadata.unwrap().labels.unwrap();
        assert!(!labels.contains_key(POD_TEMPLATE_HASH_LABEL));
        assert_eq!(labels.get("app").map(String::as_str), Some("web"));
    }

    fn owner(kind: &str, uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: "web".to_string(),
            uid: uid.to_string(),
            controller: Some(controller),
            ..Default::default()
        }
    }

    #[test]
    fn test_replica_sets_of_other_deployments_are_excluded() {
        let mut own = replica_set("web-2", Some("2"), "web:v2");
        own.metadata.owner_references = Some(vec![owner("Deployment", "uid-web", true)]);

        let mut canary = replica_set("web-canary-1", Some("7"), "web:canary");
        canary.metadata.owner_references = Some(vec![owner("Deployment", "uid-canary", true)]);

        let mut adopted = replica_set("web-3", Some("3"), "web:v3");
        adopted.metadata.owner_references = Some(vec![owner("Deployment", "uid-web", false)]);

        let orphan = replica_set("web-4", Some("4"), "web:v4");

        assert!(controlled_by(&own, "uid-web"));
        assert!(!controlled_by(&canary, "uid-web"));
        assert!(!controlled_by(&adopted, "uid-web"));
        assert!(!controlled_by(&orphan, "uid-web"));
    }
}
