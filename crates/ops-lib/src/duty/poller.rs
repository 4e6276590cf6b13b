//! Fixed-interval alert polling

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Alerter;
use crate::health::{components, HealthRegistry};

/// Configuration for the alert poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between cycles (default: 40 seconds)
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(40),
        }
    }
}

/// Runs [`Alerter`] cycles: once immediately, then on every tick
pub struct AlertPoller {
    alerter: Arc<Alerter>,
    config: PollerConfig,
    health: Option<HealthRegistry>,
}

/// Running poller; dropping it leaves the task running until cancelled
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AlertPoller {
    pub fn new(alerter: Arc<Alerter>, config: PollerConfig) -> Self {
        Self {
            alerter,
            config,
            health: None,
        }
    }

    /// Report cycle results into a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawn the polling task
    pub fn start(self) -> PollerHandle {
        self.start_with(CancellationToken::new())
    }

    /// Spawn the polling task under an existing token (e.g. daemon shutdown)
    pub fn start_with(self, cancel: CancellationToken) -> PollerHandle {
        let task = tokio::spawn(self.run(cancel.clone()));
        PollerHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting alert poller"
        );
        if let Some(health) = &self.health {
            health.register(components::ALERT_POLLER).await;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Alert poller stopping");
                    break;
                }
                // first tick completes immediately
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }

        if let Some(health) = &self.health {
            health
                .set_degraded(components::ALERT_POLLER, "poller stopped")
                .await;
        }
    }

    /// One cycle; runs to completion even if cancellation arrives meanwhile
    async fn cycle(&self) {
        match self.alerter.check_and_notify().await {
            Ok(report) => {
                info!(
                    alerts = report.alerts,
                    notified = report.notified,
                    skipped = report.skipped,
                    failed_deliveries = report.failed_deliveries,
                    "Alert cycle complete"
                );
                if let Some(health) = &self.health {
                    health.set_healthy(components::MONITORING).await;
                    if report.failed_deliveries > 0 {
                        health
                            .set_degraded(
                                components::NOTIFIER,
                                format!("{} notifications failed", report.failed_deliveries),
                            )
                            .await;
                    } else {
                        health.set_healthy(components::NOTIFIER).await;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Error checking alerts");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::MONITORING, e.to_string())
                        .await;
                }
            }
        }
    }
}

impl PollerHandle {
    /// Cancel and wait for the task, including any in-flight cycle
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Alert poller task failed");
        }
    }
}
