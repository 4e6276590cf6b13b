//! Prometheus and Alertmanager access
//!
//! - [`MonitoringClient`]: HTTP client for instant queries, metric name
//!   listing and active alerts
//! - [`Alert`]: an active alert, decoded from either the Alertmanager v2 or
//!   the Prometheus alerts shape
//! - [`AlertSource`]: what the duty bridge needs from a monitoring backend
//! - [`ServiceDashboard`]: pods, usage against limits and alerts of one job

mod client;
mod dashboard;

pub use client::{MonitoringClient, MonitoringConfig};
pub use dashboard::{PodUsage, ServiceDashboard};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Source of currently firing alerts
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn active_alerts(&self) -> Result<Vec<Alert>>;
}

/// An active alert.
///
/// Labels and annotations are ordered maps, so iteration order is stable
/// (sorted by key) regardless of the order the backend sent them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAlert")]
pub struct Alert {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// `active`/`suppressed` from Alertmanager, `firing`/`pending` from Prometheus
    pub state: String,
    pub active_at: Option<DateTime<Utc>>,
    pub value: Option<String>,
}

impl Alert {
    pub fn new(labels: BTreeMap<String, String>, annotations: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            annotations,
            state: "active".to_string(),
            active_at: None,
            value: None,
        }
    }

    /// `alertname` label, or `unknown`
    pub fn name(&self) -> &str {
        self.labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    pub fn severity(&self) -> Option<&str> {
        self.labels.get("severity").map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlert {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    status: Option<RawAlertStatus>,
    #[serde(default)]
    active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RawAlertStatus {
    #[serde(default)]
    state: Option<String>,
}

impl From<RawAlert> for Alert {
    fn from(raw: RawAlert) -> Self {
        let state = raw
            .state
            .or_else(|| raw.status.and_then(|s| s.state))
            .unwrap_or_else(|| "active".to_string());
        Self {
            labels: raw.labels,
            annotations: raw.annotations,
            state,
            active_at: raw.active_at.or(raw.starts_at),
            value: raw.value,
        }
    }
}

/// One series of an instant-query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: BTreeMap<String, String>,
    /// `(unix timestamp, value)` pairs; one for vectors and scalars
    pub points: Vec<(f64, String)>,
}

impl Sample {
    /// Most recent value
    pub fn value(&self) -> Option<&str> {
        self.points.last().map(|(_, v)| v.as_str())
    }
}

/// Decoded Prometheus query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub result_type: String,
    pub series: Vec<Sample>,
}

/// Query selecting `metric` for one scrape job
pub fn job_selector(metric: &str, job: &str) -> String {
    format!("{metric}{{job=\"{job}\"}}")
}
