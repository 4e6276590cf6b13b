//! Command implementations

pub mod inspect;
pub mod lifecycle;
pub mod monitoring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ops_lib::monitoring::{MonitoringClient, MonitoringConfig};
use ops_lib::{KubeGateway, KubeSource, LifecycleConfig, LifecycleController, WorkloadRef};

use crate::output::OutputFormat;

/// Everything a command needs, resolved from flags, environment and the
/// config file
pub struct Session {
    pub format: OutputFormat,
    pub default_namespace: String,
    pub kube_source: KubeSource,
    pub lifecycle: LifecycleConfig,
    pub monitoring: MonitoringConfig,
}

impl Session {
    /// Parse `namespace/name`, or a bare name in the default namespace
    pub fn target(&self, raw: &str) -> Result<WorkloadRef> {
        WorkloadRef::parse_with_default(raw, &self.default_namespace)
            .with_context(|| format!("Invalid deployment '{raw}'"))
    }

    pub async fn controller(&self) -> Result<LifecycleController> {
        let gateway = KubeGateway::connect(&self.kube_source)
            .await
            .context("Failed to connect to the cluster")?;
        Ok(LifecycleController::new(
            Arc::new(gateway),
            self.lifecycle.clone(),
        ))
    }

    pub fn monitoring_client(&self) -> Result<MonitoringClient> {
        MonitoringClient::from_config(&self.monitoring).context("Invalid monitoring configuration")
    }
}

pub fn kube_source(kubeconfig: Option<&str>) -> KubeSource {
    match kubeconfig.filter(|p| !p.is_empty()) {
        Some(path) => KubeSource::Kubeconfig(PathBuf::from(path)),
        None => KubeSource::Infer,
    }
}
