//! Observability for lifecycle operations and the alert bridge
//!
//! Provides:
//! - Prometheus metrics (operation outcomes and durations, conflict retries,
//!   alert cycles, notifications)
//! - Structured event logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for operation durations (in seconds); budgets run up to 30s
const OPERATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 4.0, 6.0, 10.0, 15.0, 20.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<OpsMetricsInner> = OnceLock::new();

struct OpsMetricsInner {
    operations_total: IntCounterVec,
    operation_duration_seconds: HistogramVec,
    conflict_retries_total: IntCounter,
    alert_cycles_total: IntCounterVec,
    notifications_sent_total: IntCounter,
    notification_failures_total: IntCounter,
}

impl OpsMetricsInner {
    fn new() -> Self {
        Self {
            operations_total: register_int_counter_vec!(
                "kube_chatops_operations_total",
                "Lifecycle operations by kind and terminal state",
                &["kind", "outcome"]
            )
            .expect("Failed to register operations_total"),

            operation_duration_seconds: register_histogram_vec!(
                "kube_chatops_operation_duration_seconds",
                "Wall-clock time from validation to terminal state",
                &["kind"],
                OPERATION_BUCKETS.to_vec()
            )
            .expect("Failed to register operation_duration_seconds"),

            conflict_retries_total: register_int_counter!(
                "kube_chatops_conflict_retries_total",
                "Rollback updates retried after an optimistic-concurrency conflict"
            )
            .expect("Failed to register conflict_retries_total"),

            alert_cycles_total: register_int_counter_vec!(
                "kube_chatops_alert_cycles_total",
                "Alert polling cycles by result",
                &["result"]
            )
            .expect("Failed to register alert_cycles_total"),

            notifications_sent_total: register_int_counter!(
                "kube_chatops_notifications_sent_total",
                "Duty notifications handed to the sink"
            )
            .expect("Failed to register notifications_sent_total"),

            notification_failures_total: register_int_counter!(
                "kube_chatops_notification_failures_total",
                "Duty notifications the sink failed to deliver"
            )
            .expect("Failed to register notification_failures_total"),
        }
    }
}

/// Handle to the process-wide metrics; clones share the same collectors.
#[derive(Clone, Debug)]
pub struct OpsMetrics {
    _private: (),
}

impl Default for OpsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OpsMetrics {
    /// Create a handle, registering the collectors on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OpsMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OpsMetricsInner {
        GLOBAL_METRICS.get_or_init(OpsMetricsInner::new)
    }

    /// Record a finished operation
    pub fn record_operation(&self, kind: &str, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .operations_total
            .with_label_values(&[kind, outcome])
            .inc();
        inner
            .operation_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn inc_conflict_retries(&self) {
        self.inner().conflict_retries_total.inc();
    }

    /// `result` is one of `ok`, `fetch_error`
    pub fn record_alert_cycle(&self, result: &str) {
        self.inner()
            .alert_cycles_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn add_notifications_sent(&self, count: u64) {
        self.inner().notifications_sent_total.inc_by(count);
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures_total.inc();
    }
}

/// Structured logger for daemon-level events
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, poll_interval_secs: u64) {
        info!(
            event = "daemon_started",
            instance = %self.instance,
            version = %version,
            poll_interval_secs,
            "Ops daemon started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "daemon_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Ops daemon shutting down"
        );
    }

    /// Log an API-triggered operation before it starts
    pub fn log_operation_request(&self, target: &str, operation: &str, requested_by: Option<&str>) {
        info!(
            event = "operation_requested",
            instance = %self.instance,
            deployment = %target,
            operation = %operation,
            requested_by = requested_by.unwrap_or("anonymous"),
            "Lifecycle operation requested"
        );
    }

    pub fn log_alert_cycle(&self, alerts: usize, notified: usize, skipped: usize) {
        if skipped > 0 && notified == 0 && alerts > 0 {
            warn!(
                event = "alert_cycle",
                instance = %self.instance,
                alerts,
                notified,
                skipped,
                "No duty user found for any active alert"
            );
        } else {
            info!(
                event = "alert_cycle",
                instance = %self.instance,
                alerts,
                notified,
                skipped,
                "Alert cycle complete"
            );
        }
    }
}
