//! Ops daemon
//!
//! Serves the lifecycle operations API with health and metrics endpoints,
//! and, when Alertmanager and a duty roster are configured, polls active
//! alerts and notifies whoever is on duty.

use std::sync::Arc;

use anyhow::{Context, Result};
use ops_agent::{api, config::DaemonConfig};
use ops_lib::{
    duty::{AlertPoller, Alerter, DutyFinder, LogSink, NotificationSink, StaticDutyRoster, WebhookSink},
    health::{components, HealthRegistry},
    monitoring::MonitoringClient,
    observability::StructuredLogger,
    KubeGateway, LifecycleController,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ops-agent");

    let config = DaemonConfig::load()?;
    info!(instance = %config.instance_name, "Daemon configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER_GATEWAY).await;

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(DAEMON_VERSION, config.poll_interval_secs);

    let gateway = KubeGateway::connect(&config.kube_source())
        .await
        .context("Failed to connect to the cluster")?;
    let lifecycle = LifecycleController::new(Arc::new(gateway), config.lifecycle_config());

    let shutdown = CancellationToken::new();
    let mut app_state = api::AppState::new(health_registry.clone(), lifecycle, logger.clone())
        .with_shutdown(shutdown.clone());

    let monitoring = MonitoringClient::from_config(&config.monitoring_config())
        .context("Invalid monitoring configuration")?;
    if monitoring.has_prometheus() || monitoring.has_alertmanager() {
        health_registry.register(components::MONITORING).await;
        app_state = app_state.with_monitoring(monitoring.clone());
    }

    let poller = match (&config.roster_path, monitoring.has_alertmanager()) {
        (Some(path), true) => {
            let roster = StaticDutyRoster::load(path)
                .await
                .with_context(|| format!("Failed to load duty roster {path}"))?;
            let sink: Arc<dyn NotificationSink> = match config.webhook_url.as_deref() {
                Some(url) => Arc::new(WebhookSink::new(url, config.webhook_timeout())?),
                None => Arc::new(LogSink),
            };
            let duty: Arc<dyn DutyFinder> = Arc::new(roster);
            let alerter = Alerter::new(Arc::new(monitoring), duty, sink)
                .with_fetch_timeout(config.alert_fetch_timeout());

            health_registry.register(components::ALERT_POLLER).await;
            health_registry.register(components::NOTIFIER).await;
            Some(
                AlertPoller::new(Arc::new(alerter), config.poller_config())
                    .with_health(health_registry.clone())
                    .start_with(shutdown.child_token()),
            )
        }
        (Some(_), false) => {
            warn!("Duty roster configured without OPS_ALERTMANAGER_URL; alert polling disabled");
            None
        }
        (None, _) => {
            info!("No duty roster configured; alert polling disabled");
            None
        }
    };

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        Arc::new(app_state),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    shutdown.cancel();

    if let Some(poller) = poller {
        poller.stop().await;
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
