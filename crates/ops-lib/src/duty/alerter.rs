//! One alert check-and-notify cycle

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DutyFinder, Notification, NotificationSink};
use crate::error::{Error, Result};
use crate::models::DutyUser;
use crate::monitoring::{Alert, AlertSource};
use crate::observability::OpsMetrics;

/// Default bound on the alert fetch
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Active alerts fetched
    pub alerts: usize,
    /// Notifications delivered
    pub notified: usize,
    /// Alerts with no duty user on any label
    pub skipped: usize,
    /// Notifications the sink rejected
    pub failed_deliveries: usize,
}

/// Resolves duty users for active alerts and notifies them
pub struct Alerter {
    source: Arc<dyn AlertSource>,
    duty: Arc<dyn DutyFinder>,
    sink: Arc<dyn NotificationSink>,
    fetch_timeout: Duration,
    metrics: OpsMetrics,
}

impl Alerter {
    pub fn new(
        source: Arc<dyn AlertSource>,
        duty: Arc<dyn DutyFinder>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            source,
            duty,
            sink,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            metrics: OpsMetrics::new(),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Run one cycle.
    ///
    /// A failed alert fetch aborts the cycle with an error. Lookup failures
    /// for individual labels and rejected deliveries are logged and counted,
    /// never fatal.
    pub async fn check_and_notify(&self) -> Result<CycleReport> {
        debug!("Checking for active alerts");

        let alerts = match tokio::time::timeout(self.fetch_timeout, self.source.active_alerts()).await
        {
            Ok(Ok(alerts)) => alerts,
            Ok(Err(e)) => {
                self.metrics.record_alert_cycle("fetch_error");
                return Err(e);
            }
            Err(_) => {
                self.metrics.record_alert_cycle("fetch_error");
                return Err(Error::timeout("fetching active alerts"));
            }
        };

        let mut report = CycleReport {
            alerts: alerts.len(),
            ..Default::default()
        };
        if alerts.is_empty() {
            debug!("No active alerts");
            self.metrics.record_alert_cycle("ok");
            return Ok(report);
        }

        for alert in &alerts {
            let Some((label, users)) = self.resolve_duty(alert).await else {
                info!(
                    alert = %alert.name(),
                    labels = ?alert.labels,
                    "No duty users found for alert, skipping"
                );
                report.skipped += 1;
                continue;
            };

            for user in users {
                let notification = Notification {
                    recipient_id: user.id,
                    recipient_login: user.login.clone(),
                    alert_name: alert.name().to_string(),
                    matched_label: label.clone(),
                    text: format_notification(&user.login, alert),
                };
                match self.sink.deliver(&notification).await {
                    Ok(()) => report.notified += 1,
                    Err(e) => {
                        report.failed_deliveries += 1;
                        self.metrics.inc_notification_failures();
                        warn!(
                            recipient = %user.login,
                            alert = %alert.name(),
                            error = %e,
                            "Failed to deliver duty notification"
                        );
                    }
                }
            }
        }

        self.metrics.record_alert_cycle("ok");
        self.metrics.add_notifications_sent(report.notified as u64);
        Ok(report)
    }

    /// First label (in key order) that yields at least one duty user
    async fn resolve_duty(&self, alert: &Alert) -> Option<(String, Vec<DutyUser>)> {
        for (key, value) in &alert.labels {
            let label = format!("{key}={value}");
            match self.duty.duty_users_by_label(&label).await {
                Ok(users) if !users.is_empty() => {
                    debug!(label = %label, users = users.len(), "Found duty users");
                    return Some((label, users));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(label = %label, error = %e, "Duty lookup failed, trying next label");
                }
            }
        }
        None
    }
}

/// Notification text for one duty user
pub fn format_notification(login: &str, alert: &Alert) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "NOTIFICATION FOR: @{login}");
    let _ = writeln!(text, "==================================");
    let _ = writeln!(text, "Alert firing: {}", alert.name());
    let _ = writeln!(text);
    let _ = writeln!(text, "Summary: {}", alert.annotation("summary").unwrap_or(""));
    let _ = writeln!(
        text,
        "Description: {}",
        alert.annotation("description").unwrap_or("")
    );
    let _ = writeln!(text);
    let _ = writeln!(text, "Labels:");
    for (key, value) in &alert.labels {
        let _ = writeln!(text, "- {key}: {value}");
    }
    text.push_str("==================================");
    text
}

/// Human-readable list of active alerts
pub fn summarize_alerts(alerts: &[Alert]) -> String {
    if alerts.is_empty() {
        return "No active alerts".to_string();
    }

    let mut text = format!("Active alerts ({}):\n", alerts.len());
    for alert in alerts {
        let _ = writeln!(text, "> {}", alert.name());
        if let Some(description) = alert.annotation("description") {
            let _ = writeln!(text, "  {description}");
        }
        if let Some(severity) = alert.severity() {
            let _ = writeln!(text, "  Severity: {severity}");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    struct StaticAlerts(Result<Vec<Alert>>);

    #[async_trait]
    impl AlertSource for StaticAlerts {
        async fn active_alerts(&self) -> Result<Vec<Alert>> {
            self.0.clone()
        }
    }

    struct SlowAlerts;

    #[async_trait]
    impl AlertSource for SlowAlerts {
        async fn active_alerts(&self) -> Result<Vec<Alert>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MapDuty {
        users: HashMap<String, Vec<DutyUser>>,
        failing: Vec<String>,
        lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DutyFinder for MapDuty {
        async fn duty_users_by_label(&self, label: &str) -> Result<Vec<DutyUser>> {
            self.lookups.lock().unwrap().push(label.to_string());
            if self.failing.iter().any(|l| l == label) {
                return Err(Error::failed("roster unavailable"));
            }
            Ok(self.users.get(label).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Notification>>,
        reject: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, notification: &Notification) -> Result<()> {
            if self.reject {
                return Err(Error::failed("webhook returned 502"));
            }
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn alert(labels: &[(&str, &str)]) -> Alert {
        let labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let annotations = BTreeMap::from([
            ("summary".to_string(), "p99 latency above 2s".to_string()),
            ("description".to_string(), "checkout is slow".to_string()),
        ]);
        Alert::new(labels, annotations)
    }

    fn user(id: u64, login: &str) -> DutyUser {
        DutyUser {
            id,
            login: login.to_string(),
        }
    }

    fn alerter(
        alerts: Result<Vec<Alert>>,
        duty: Arc<MapDuty>,
        sink: Arc<RecordingSink>,
    ) -> Alerter {
        Alerter::new(Arc::new(StaticAlerts(alerts)), duty, sink)
    }

    #[tokio::test]
    async fn test_notifies_user_of_first_matching_label() {
        let duty = Arc::new(MapDuty {
            users: HashMap::from([("severity=critical".to_string(), vec![user(7, "oncall-sre")])]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let alerter = alerter(
            Ok(vec![alert(&[("job", "checkout"), ("severity", "critical")])]),
            duty.clone(),
            sink.clone(),
        );

        let report = alerter.check_and_notify().await.unwrap();

        assert_eq!(report.alerts, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.skipped, 0);
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient_id, 7);
        assert_eq!(delivered[0].recipient_login, "oncall-sre");
        assert_eq!(delivered[0].matched_label, "severity=critical");
        assert_eq!(
            *duty.lookups.lock().unwrap(),
            vec!["job=checkout".to_string(), "severity=critical".to_string()]
        );
    }

    #[tokio::test]
    async fn test_zero_alerts_is_quiet_success() {
        let duty = Arc::new(MapDuty::default());
        let sink = Arc::new(RecordingSink::default());
        let report = alerter(Ok(Vec::new()), duty.clone(), sink.clone())
            .check_and_notify()
            .await
            .unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(sink.delivered.lock().unwrap().is_empty());
        assert!(duty.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stops_at_first_label_with_users() {
        let duty = Arc::new(MapDuty {
            users: HashMap::from([
                ("alertname=HighLatency".to_string(), vec![user(1, "alice"), user(2, "bob")]),
                ("severity=critical".to_string(), vec![user(3, "carol")]),
            ]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let report = alerter(
            Ok(vec![alert(&[("severity", "critical"), ("alertname", "HighLatency")])]),
            duty.clone(),
            sink.clone(),
        )
        .check_and_notify()
        .await
        .unwrap();

        assert_eq!(report.notified, 2);
        let logins: Vec<String> = sink
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.recipient_login.clone())
            .collect();
        assert_eq!(logins, vec!["alice", "bob"]);
        assert_eq!(duty.lookups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_error_moves_to_next_label() {
        let duty = Arc::new(MapDuty {
            users: HashMap::from([("team=payments".to_string(), vec![user(4, "dave")])]),
            failing: vec!["service=checkout".to_string()],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let report = alerter(
            Ok(vec![alert(&[("service", "checkout"), ("team", "payments")])]),
            duty,
            sink.clone(),
        )
        .check_and_notify()
        .await
        .unwrap();

        assert_eq!(report.notified, 1);
        assert_eq!(sink.delivered.lock().unwrap()[0].recipient_login, "dave");
    }

    #[tokio::test]
    async fn test_unmatched_alert_is_skipped() {
        let duty = Arc::new(MapDuty {
            users: HashMap::from([("job=api".to_string(), vec![user(5, "erin")])]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let report = alerter(
            Ok(vec![alert(&[("job", "batch")]), alert(&[("job", "api")])]),
            duty,
            sink.clone(),
        )
        .check_and_notify()
        .await
        .unwrap();

        assert_eq!(report.alerts, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.notified, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle() {
        let duty = Arc::new(MapDuty::default());
        let sink = Arc::new(RecordingSink::default());
        let err = alerter(
            Err(Error::monitoring("alertmanager returned 502")),
            duty.clone(),
            sink,
        )
        .check_and_notify()
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Monitoring(_)));
        assert!(duty.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_is_bounded() {
        let alerter = Alerter::new(
            Arc::new(SlowAlerts),
            Arc::new(MapDuty::default()),
            Arc::new(RecordingSink::default()),
        )
        .with_fetch_timeout(Duration::from_secs(5));

        let err = alerter.check_and_notify().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_counted_not_fatal() {
        let duty = Arc::new(MapDuty {
            users: HashMap::from([("job=checkout".to_string(), vec![user(1, "alice")])]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink {
            reject: true,
            ..Default::default()
        });
        let report = alerter(Ok(vec![alert(&[("job", "checkout")])]), duty, sink)
            .check_and_notify()
            .await
            .unwrap();

        assert_eq!(report.notified, 0);
        assert_eq!(report.failed_deliveries, 1);
    }

    #[test]
    fn test_format_notification() {
        let text = format_notification(
            "alice",
            &alert(&[("alertname", "HighLatency"), ("service", "checkout")]),
        );
        assert!(text.starts_with("NOTIFICATION FOR: @alice\n"));
        assert!(text.contains("Alert firing: HighLatency"));
        assert!(text.contains("Summary: p99 latency above 2s"));
        assert!(text.contains("Description: checkout is slow"));
        assert!(text.contains("- alertname: HighLatency\n- service: checkout\n"));
    }

    #[test]
    fn test_summarize_alerts() {
        assert_eq!(summarize_alerts(&[]), "No active alerts");

        let summary = summarize_alerts(&[alert(&[
            ("alertname", "HighLatency"),
            ("severity", "warning"),
        ])]);
        assert_eq!(
            summary,
            "Active alerts (1):\n> HighLatency\n  checkout is slow\n  Severity: warning\n"
        );
    }
}
