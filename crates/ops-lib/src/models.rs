//! Core data models for lifecycle control and duty lookup

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Annotation the deployment controller stamps on deployments and replica sets
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Pod template annotation used to force a rollout without changing the image
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Identity of a deployment: `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`, or a bare `name` placed in `default_namespace`.
    pub fn parse_with_default(s: &str, default_namespace: &str) -> Result<Self, Error> {
        if s.contains('/') {
            return s.parse();
        }
        if s.trim().is_empty() {
            return Err(Error::invalid_target("empty deployment name"));
        }
        Ok(Self::new(default_namespace, s.trim()))
    }
}

impl FromStr for WorkloadRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::invalid_target(format!("expected namespace/name, got '{s}'")))?;

        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(Error::invalid_target(format!(
                "expected namespace/name, got '{s}'"
            )));
        }

        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Status counters reported by the deployment controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaCounts {
    pub replicas: i32,
    pub updated: i32,
    pub ready: i32,
    pub available: i32,
    pub unavailable: i32,
    pub observed_generation: i64,
}

/// A replicated deployment as seen through the cluster gateway.
///
/// Only `desired_replicas` and `template` are written back on update; every
/// other field is read-only observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub generation: i64,
    pub desired_replicas: i32,
    /// `matchLabels` of the deployment selector
    pub selector: BTreeMap<String, String>,
    /// Value of the revision annotation, if the controller has set one
    pub revision: Option<i64>,
    pub template: PodTemplateSpec,
    pub status: ReplicaCounts,
}

impl Workload {
    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef::new(&self.namespace, &self.name)
    }

    /// Image of the first container in the pod template
    pub fn image(&self) -> Option<&str> {
        template_image(&self.template)
    }

    pub fn template_annotation(&self, key: &str) -> Option<&str> {
        self.template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn set_template_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.into());
    }

    /// Point-in-time summary used by the status command
    pub fn summary(&self) -> WorkloadStatus {
        WorkloadStatus {
            target: self.reference(),
            desired_replicas: self.desired_replicas,
            counts: self.status,
            generation: self.generation,
            revision: self.revision,
            image: self.image().map(str::to_string),
        }
    }
}

/// Image of the first container of a pod template
pub fn template_image(template: &PodTemplateSpec) -> Option<&str> {
    template
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
}

/// Read-only view returned by the status operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub target: WorkloadRef,
    pub desired_replicas: i32,
    pub counts: ReplicaCounts,
    pub generation: i64,
    pub revision: Option<i64>,
    pub image: Option<String>,
}

impl WorkloadStatus {
    pub fn is_settled(&self) -> bool {
        self.counts.observed_generation >= self.generation
            && self.counts.available == self.desired_replicas
            && self.counts.updated == self.desired_replicas
            && self.counts.unavailable == 0
    }
}

/// Immutable record of one entry in a deployment's rollout history,
/// derived from a replica set.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionSnapshot {
    pub revision: i64,
    pub replica_set: String,
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
    pub replicas: i32,
    pub ready_replicas: i32,
    /// Pod template captured by the replica set, with the
    /// `pod-template-hash` label already removed
    pub template: PodTemplateSpec,
}

/// Summary of a pod belonging to a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restarts: i32,
    pub node: Option<String>,
}

/// An on-call user resolved from a label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DutyUser {
    pub id: u64,
    pub login: String,
}
