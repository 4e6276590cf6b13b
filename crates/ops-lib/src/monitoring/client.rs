//! HTTP client for the Prometheus and Alertmanager APIs

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{Alert, AlertSource, QueryResult, Sample};
use crate::error::{Error, Result};

/// Connection settings for [`MonitoringClient`]
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub prometheus_url: Option<String>,
    pub alertmanager_url: Option<String>,
    /// Per-request timeout (default: 10 seconds)
    pub timeout: Duration,
    /// Skip TLS certificate verification, for clusters with self-signed ingress
    pub accept_invalid_certs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_url: None,
            alertmanager_url: None,
            timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
        }
    }
}

/// Client for instant queries, metric listing and active alerts.
///
/// Either backend may be left unconfigured; calls against it then fail with
/// `Error::Config`.
#[derive(Debug, Clone)]
pub struct MonitoringClient {
    http: Client,
    prometheus: Option<String>,
    alertmanager: Option<String>,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

fn validate_base(kind: &str, raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(raw).map_err(|e| Error::config(format!("invalid {kind} URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!(
            "invalid {kind} URL '{raw}': unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(Some(raw.trim_end_matches('/').to_string()))
}

impl MonitoringClient {
    /// Client with default timeout; empty URLs leave that backend unconfigured
    pub fn new(prometheus_url: Option<&str>, alertmanager_url: Option<&str>) -> Result<Self> {
        Self::from_config(&MonitoringConfig {
            prometheus_url: prometheus_url.map(str::to_string),
            alertmanager_url: alertmanager_url.map(str::to_string),
            ..Default::default()
        })
    }

    pub fn from_config(config: &MonitoringConfig) -> Result<Self> {
        let prometheus = validate_base("prometheus", config.prometheus_url.as_deref())?;
        let alertmanager = validate_base("alertmanager", config.alertmanager_url.as_deref())?;

        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            prometheus,
            alertmanager,
        })
    }

    pub fn has_prometheus(&self) -> bool {
        self.prometheus.is_some()
    }

    pub fn has_alertmanager(&self) -> bool {
        self.alertmanager.is_some()
    }

    fn prometheus_endpoint(&self, path: &str) -> Result<String> {
        self.prometheus
            .as_deref()
            .map(|base| format!("{base}{path}"))
            .ok_or_else(|| Error::config("prometheus URL is not configured"))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        backend: &str,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!(endpoint = %endpoint, "Monitoring request");
        let response = self.http.get(endpoint).query(query).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::monitoring(format!(
                "{backend} returned {status}: {}",
                body.trim()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::monitoring(format!("failed to decode {backend} response: {e}")))
    }

    /// Unwrap a Prometheus `{status, data}` envelope
    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T> {
        if envelope.status != "success" {
            return Err(Error::monitoring(format!(
                "prometheus returned status {}: {}",
                envelope.status,
                envelope.error.unwrap_or_default()
            )));
        }
        envelope
            .data
            .ok_or_else(|| Error::monitoring("prometheus response has no data"))
    }

    /// Run an instant query
    pub async fn query(&self, promql: &str) -> Result<QueryResult> {
        let endpoint = self.prometheus_endpoint("/api/v1/query")?;
        let envelope: ApiEnvelope<RawQueryData> = self
            .get_json("prometheus", &endpoint, &[("query", promql)])
            .await?;
        let data = Self::unwrap_envelope(envelope)?;
        decode_query(data)
    }

    /// Metric names exported by a scrape job
    pub async fn list_metrics(&self, job: &str) -> Result<Vec<String>> {
        let endpoint = self.prometheus_endpoint("/api/v1/label/__name__/values")?;
        let matcher = format!("{{job=\"{job}\"}}");
        let envelope: ApiEnvelope<Vec<String>> = self
            .get_json("prometheus", &endpoint, &[("match[]", matcher.as_str())])
            .await?;
        Self::unwrap_envelope(envelope)
    }

    /// Alerts currently known to Alertmanager
    pub async fn active_alerts(&self) -> Result<Vec<Alert>> {
        let base = self
            .alertmanager
            .as_deref()
            .ok_or_else(|| Error::config("alertmanager URL is not configured"))?;
        let endpoint = format!("{base}/api/v2/alerts");
        self.get_json("alertmanager", &endpoint, &[]).await
    }
}

fn decode_query(data: RawQueryData) -> Result<QueryResult> {
    let bad = |e: serde_json::Error| {
        Error::monitoring(format!(
            "unexpected {} result from prometheus: {e}",
            data.result_type
        ))
    };

    let series = match data.result_type.as_str() {
        "vector" | "matrix" => {
            let raw: Vec<RawSeries> = serde_json::from_value(data.result.clone()).map_err(bad)?;
            raw.into_iter()
                .map(|s| {
                    let mut points = s.values;
                    points.extend(s.value);
                    Sample {
                        metric: s.metric,
                        points,
                    }
                })
                .collect()
        }
        "scalar" | "string" => {
            let point: (f64, String) = serde_json::from_value(data.result.clone()).map_err(bad)?;
            vec![Sample {
                metric: BTreeMap::new(),
                points: vec![point],
            }]
        }
        other => {
            return Err(Error::monitoring(format!(
                "unsupported result type '{other}'"
            )))
        }
    };

    Ok(QueryResult {
        result_type: data.result_type,
        series,
    })
}

#[async_trait]
impl AlertSource for MonitoringClient {
    async fn active_alerts(&self) -> Result<Vec<Alert>> {
        MonitoringClient::active_alerts(self).await
    }
}
