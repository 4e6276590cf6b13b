//! Daemon configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ops_lib::duty::PollerConfig;
use ops_lib::monitoring::MonitoringConfig;
use ops_lib::{KubeSource, LifecycleConfig, OperationBudgets, RollbackPolicy};
use serde::Deserialize;

/// Daemon configuration, read from `OPS_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for health, metrics and the operations API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Explicit kubeconfig; otherwise inferred
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub prometheus_url: Option<String>,

    #[serde(default)]
    pub alertmanager_url: Option<String>,

    /// Skip TLS verification towards Prometheus/Alertmanager
    #[serde(default)]
    pub monitoring_insecure_tls: bool,

    /// Alert polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bound on one alert fetch in seconds
    #[serde(default = "default_alert_fetch_timeout")]
    pub alert_fetch_timeout_secs: u64,

    /// JSON duty roster; alert polling is disabled without it
    #[serde(default)]
    pub roster_path: Option<String>,

    /// Deliver notifications here instead of logging them
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bound on one webhook delivery in seconds
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    #[serde(default = "default_scale_timeout")]
    pub scale_timeout_secs: u64,

    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    #[serde(default = "default_rollback_timeout")]
    pub rollback_timeout_secs: u64,

    #[serde(default)]
    pub rollback_policy: RollbackPolicy,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ops-daemon".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    40
}

fn default_alert_fetch_timeout() -> u64 {
    10
}

fn default_webhook_timeout() -> u64 {
    5
}

fn default_scale_timeout() -> u64 {
    20
}

fn default_restart_timeout() -> u64 {
    10
}

fn default_rollback_timeout() -> u64 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            kubeconfig: None,
            prometheus_url: None,
            alertmanager_url: None,
            monitoring_insecure_tls: false,
            poll_interval_secs: default_poll_interval(),
            alert_fetch_timeout_secs: default_alert_fetch_timeout(),
            roster_path: None,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
            scale_timeout_secs: default_scale_timeout(),
            restart_timeout_secs: default_restart_timeout(),
            rollback_timeout_secs: default_rollback_timeout(),
            rollback_policy: RollbackPolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("OPS")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read OPS_* environment")?;

        config
            .try_deserialize()
            .context("Invalid OPS_* configuration")
    }

    pub fn kube_source(&self) -> KubeSource {
        match self.kubeconfig.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => KubeSource::Kubeconfig(PathBuf::from(path)),
            None => KubeSource::Infer,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig::default()
            .with_rollback_policy(self.rollback_policy)
            .with_budgets(OperationBudgets {
                scale: Duration::from_secs(self.scale_timeout_secs),
                restart: Duration::from_secs(self.restart_timeout_secs),
                rollback: Duration::from_secs(self.rollback_timeout_secs),
                ..Default::default()
            })
    }

    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            prometheus_url: self.prometheus_url.clone(),
            alertmanager_url: self.alertmanager_url.clone(),
            accept_invalid_certs: self.monitoring_insecure_tls,
            ..Default::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        }
    }

    pub fn alert_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_fetch_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs.max(1))
    }
}
