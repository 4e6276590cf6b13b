//! Per-job service dashboard: pods, resource usage against limits, restarts
//! and the job's active alerts

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Alert, MonitoringClient, QueryResult, Sample};
use crate::error::{Error, Result};

/// Status of one scrape job and its pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDashboard {
    pub job: String,
    pub namespace: Option<String>,
    pub alerts: Vec<Alert>,
    /// Sorted by pod name
    pub pods: Vec<PodUsage>,
}

/// Resource usage of one pod; metrics Prometheus has no series for stay zero
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub name: String,
    pub phase: Option<String>,
    pub ready: bool,
    pub cpu_usage_cores: f64,
    pub cpu_limit_cores: f64,
    pub memory_usage_bytes: f64,
    pub memory_limit_bytes: f64,
    pub restarts: i64,
    pub oom_killed: bool,
}

impl PodUsage {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// CPU usage as a fraction of the limit, when a limit is set
    pub fn cpu_ratio(&self) -> Option<f64> {
        (self.cpu_limit_cores > 0.0).then(|| self.cpu_usage_cores / self.cpu_limit_cores)
    }

    pub fn memory_ratio(&self) -> Option<f64> {
        (self.memory_limit_bytes > 0.0).then(|| self.memory_usage_bytes / self.memory_limit_bytes)
    }
}

/// Label matchers restricting a series to the given pods
fn pod_matchers(pods: &BTreeSet<String>, namespace: Option<&str>) -> String {
    let names: Vec<&str> = pods.iter().map(String::as_str).collect();
    let mut matchers = format!("pod=~\"{}\"", names.join("|"));
    if let Some(ns) = namespace {
        matchers.push_str(&format!(", namespace=\"{ns}\""));
    }
    matchers
}

fn job_matchers(job: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("job=\"{job}\", namespace=\"{ns}\""),
        None => format!("job=\"{job}\""),
    }
}

fn sample_value(sample: &Sample) -> Option<f64> {
    sample.value()?.parse().ok()
}

/// Apply each series of `result` to the pod named by its `pod` label.
/// A failed query is logged and leaves the pods untouched.
fn for_each_pod(
    pods: &mut BTreeMap<String, PodUsage>,
    job: &str,
    metric: &str,
    result: Result<QueryResult>,
    mut apply: impl FnMut(&mut PodUsage, &Sample),
) {
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            warn!(job = %job, metric = metric, error = %e, "Dashboard query failed");
            return;
        }
    };
    if result.result_type != "vector" {
        return;
    }
    for sample in &result.series {
        let Some(pod) = sample.metric.get("pod") else {
            continue;
        };
        if let Some(usage) = pods.get_mut(pod) {
            apply(usage, sample);
        }
    }
}

fn alert_matches(alert: &Alert, job: &str, namespace: Option<&str>) -> bool {
    alert.labels.get("job").map(String::as_str) == Some(job)
        && namespace.map_or(true, |ns| {
            alert.labels.get("namespace").map(String::as_str) == Some(ns)
        })
}

impl MonitoringClient {
    /// Pods scraped under `job`, taken from the `pod` label of `up`
    async fn pods_for_job(&self, job: &str, namespace: Option<&str>) -> Result<BTreeSet<String>> {
        let result = self
            .query(&format!("up{{{}}}", job_matchers(job, namespace)))
            .await?;
        if result.result_type != "vector" {
            return Err(Error::monitoring(format!(
                "unexpected result type for pods of job {job}: {}",
                result.result_type
            )));
        }
        Ok(result
            .series
            .iter()
            .filter_map(|s| s.metric.get("pod").cloned())
            .collect())
    }

    /// Build the dashboard of one scrape job.
    ///
    /// Listing the job's pods must succeed; the usage queries and the alert
    /// fetch are best effort and only logged when they fail.
    pub async fn dashboard(&self, job: &str, namespace: Option<&str>) -> Result<ServiceDashboard> {
        let names = self.pods_for_job(job, namespace).await?;
        let mut dashboard = ServiceDashboard {
            job: job.to_string(),
            namespace: namespace.map(str::to_string),
            alerts: Vec::new(),
            pods: Vec::new(),
        };
        if names.is_empty() {
            return Ok(dashboard);
        }

        let sel = pod_matchers(&names, namespace);
        let cpu = format!(
            "sum(rate(container_cpu_usage_seconds_total{{{sel}, container!=\"\", image!~\".*pause.*\"}}[5m])) by (pod)"
        );
        let cpu_limit =
            format!("sum(kube_pod_container_resource_limits{{{sel}, resource=\"cpu\"}}) by (pod)");
        let memory = format!(
            "sum(container_memory_working_set_bytes{{{sel}, container!=\"\", image!~\".*pause.*\"}}) by (pod)"
        );
        let memory_limit = format!(
            "sum(kube_pod_container_resource_limits{{{sel}, resource=\"memory\"}}) by (pod)"
        );
        let restarts = format!("sum(kube_pod_container_status_restarts_total{{{sel}}}) by (pod)");
        let ready = format!("kube_pod_status_ready{{condition=\"true\", {sel}}}");
        let phase = format!("kube_pod_status_phase{{{sel}}} > 0");
        let oom = format!(
            "kube_pod_container_status_last_terminated_reason{{{sel}, reason=\"OOMKilled\"}}"
        );

        let (alerts, cpu, cpu_limit, memory, memory_limit, restarts, ready, phase, oom) = tokio::join!(
            self.active_alerts(),
            self.query(&cpu),
            self.query(&cpu_limit),
            self.query(&memory),
            self.query(&memory_limit),
            self.query(&restarts),
            self.query(&ready),
            self.query(&phase),
            self.query(&oom),
        );

        match alerts {
            Ok(alerts) => {
                dashboard.alerts = alerts
                    .into_iter()
                    .filter(|a| alert_matches(a, job, namespace))
                    .collect();
            }
            Err(e) => warn!(job = %job, error = %e, "Could not fetch alerts for dashboard"),
        }

        let mut pods: BTreeMap<String, PodUsage> = names
            .into_iter()
            .map(|name| (name.clone(), PodUsage::new(name)))
            .collect();

        for_each_pod(&mut pods, job, "cpu usage", cpu, |p, s| {
            if let Some(v) = sample_value(s) {
                p.cpu_usage_cores = v;
            }
        });
        for_each_pod(&mut pods, job, "cpu limit", cpu_limit, |p, s| {
            if let Some(v) = sample_value(s) {
                p.cpu_limit_cores = v;
            }
        });
        for_each_pod(&mut pods, job, "memory usage", memory, |p, s| {
            if let Some(v) = sample_value(s) {
                p.memory_usage_bytes = v;
            }
        });
        for_each_pod(&mut pods, job, "memory limit", memory_limit, |p, s| {
            if let Some(v) = sample_value(s) {
                p.memory_limit_bytes = v;
            }
        });
        for_each_pod(&mut pods, job, "restarts", restarts, |p, s| {
            if let Some(v) = sample_value(s) {
                p.restarts = v as i64;
            }
        });
        for_each_pod(&mut pods, job, "ready", ready, |p, s| {
            p.ready = sample_value(s) == Some(1.0);
        });
        for_each_pod(&mut pods, job, "phase", phase, |p, s| {
            p.phase = s.metric.get("phase").cloned();
        });
        for_each_pod(&mut pods, job, "oom killed", oom, |p, _| {
            p.oom_killed = true;
        });

        dashboard.pods = pods.into_values().collect();
        Ok(dashboard)
    }
}
