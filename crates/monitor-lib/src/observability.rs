//! Observability for the monitoring core
//!
//! Provides:
//! - Prometheus metrics (tick outcomes, anomalies, stream health, workflows, deliveries)
//! - Structured JSON logging of lifecycle events with tracing

use crate::models::{AlertNotification, Anomaly};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick durations (in seconds)
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    ticks: IntCounterVec,
    tick_failures: IntCounterVec,
    tick_duration_seconds: HistogramVec,
    anomalies_created: IntCounterVec,
    active_anomalies: IntGauge,
    stream_checks: IntCounterVec,
    stale_streams_reset: IntCounter,
    workflow_executions: IntCounter,
    action_failures: IntCounterVec,
    notifications_created: IntCounter,
    channel_deliveries: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            ticks: register_int_counter_vec!(
                "surveillance_monitor_ticks_total",
                "Periodic task ticks run",
                &["task"]
            )
            .expect("Failed to register ticks_total"),

            tick_failures: register_int_counter_vec!(
                "surveillance_monitor_tick_failures_total",
                "Periodic task ticks that reported a failure",
                &["task"]
            )
            .expect("Failed to register tick_failures_total"),

            tick_duration_seconds: register_histogram_vec!(
                "surveillance_monitor_tick_duration_seconds",
                "Wall time of one periodic task tick",
                &["task"],
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            anomalies_created: register_int_counter_vec!(
                "surveillance_monitor_anomalies_created_total",
                "Anomaly records created",
                &["type"]
            )
            .expect("Failed to register anomalies_created_total"),

            active_anomalies: register_int_gauge!(
                "surveillance_monitor_active_anomalies",
                "Active anomalies seen at the last detection cycle"
            )
            .expect("Failed to register active_anomalies"),

            stream_checks: register_int_counter_vec!(
                "surveillance_monitor_stream_checks_total",
                "Stream health checks by outcome",
                &["outcome"]
            )
            .expect("Failed to register stream_checks_total"),

            stale_streams_reset: register_int_counter!(
                "surveillance_monitor_stale_streams_reset_total",
                "Streams reset to idle after sitting in a transitional state"
            )
            .expect("Failed to register stale_streams_reset_total"),

            workflow_executions: register_int_counter!(
                "surveillance_monitor_workflow_executions_total",
                "Alert workflows fired"
            )
            .expect("Failed to register workflow_executions_total"),

            action_failures: register_int_counter_vec!(
                "surveillance_monitor_action_failures_total",
                "Workflow actions that failed",
                &["action"]
            )
            .expect("Failed to register action_failures_total"),

            notifications_created: register_int_counter!(
                "surveillance_monitor_notifications_created_total",
                "Alert notifications persisted"
            )
            .expect("Failed to register notifications_created_total"),

            channel_deliveries: register_int_counter_vec!(
                "surveillance_monitor_channel_deliveries_total",
                "External channel deliveries by channel and outcome",
                &["channel", "outcome"]
            )
            .expect("Failed to register channel_deliveries_total"),
        }
    }
}

/// Handle to the process-wide monitor metrics
///
/// Clones share the same underlying Prometheus collectors.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_tick(&self, task: &str, duration_secs: f64, success: bool) {
        let inner = self.inner();
        inner.ticks.with_label_values(&[task]).inc();
        inner
            .tick_duration_seconds
            .with_label_values(&[task])
            .observe(duration_secs);
        if !success {
            inner.tick_failures.with_label_values(&[task]).inc();
        }
    }

    pub fn inc_anomalies_created(&self, anomaly_type: &str) {
        self.inner()
            .anomalies_created
            .with_label_values(&[anomaly_type])
            .inc();
    }

    pub fn set_active_anomalies(&self, count: i64) {
        self.inner().active_anomalies.set(count);
    }

    /// `outcome` is one of `healthy`, `restarted`, `failed`
    pub fn inc_stream_checks(&self, outcome: &str) {
        self.inner().stream_checks.with_label_values(&[outcome]).inc();
    }

    pub fn inc_stale_streams_reset(&self) {
        self.inner().stale_streams_reset.inc();
    }

    pub fn inc_workflow_executions(&self) {
        self.inner().workflow_executions.inc();
    }

    pub fn inc_action_failures(&self, action: &str) {
        self.inner().action_failures.with_label_values(&[action]).inc();
    }

    pub fn inc_notifications_created(&self) {
        self.inner().notifications_created.inc();
    }

    pub fn inc_channel_delivery(&self, channel: &str, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.inner()
            .channel_deliveries
            .with_label_values(&[channel, outcome])
            .inc();
    }
}

/// Structured logger for monitor lifecycle events
///
/// Every record carries an `event` field so log pipelines can route on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("surveillance-monitor")
    }
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            "Surveillance monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Surveillance monitor shutting down"
        );
    }

    pub fn log_anomaly_created(&self, anomaly: &Anomaly) {
        warn!(
            event = "anomaly_created",
            instance = %self.instance,
            anomaly_id = %anomaly.id,
            anomaly_type = %anomaly.anomaly_type,
            entity_id = %anomaly.entity_id,
            organization_id = ?anomaly.organization_id,
            severity = %anomaly.severity,
            message = %anomaly.details.message,
            "Anomaly detected"
        );
    }

    pub fn log_anomaly_transition(&self, anomaly: &Anomaly, actor: &str) {
        info!(
            event = "anomaly_status_changed",
            instance = %self.instance,
            anomaly_id = %anomaly.id,
            anomaly_type = %anomaly.anomaly_type,
            status = %anomaly.status,
            actor = %actor,
            "Anomaly status changed"
        );
    }

    pub fn log_workflow_fired(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        signal_id: &str,
        actions_run: usize,
        actions_failed: usize,
    ) {
        if actions_failed == 0 {
            info!(
                event = "workflow_fired",
                instance = %self.instance,
                workflow_id = %workflow_id,
                workflow_name = %workflow_name,
                signal_id = %signal_id,
                actions_run = actions_run,
                "Alert workflow fired"
            );
        } else {
            warn!(
                event = "workflow_fired",
                instance = %self.instance,
                workflow_id = %workflow_id,
                workflow_name = %workflow_name,
                signal_id = %signal_id,
                actions_run = actions_run,
                actions_failed = actions_failed,
                "Alert workflow fired with failed actions"
            );
        }
    }

    pub fn log_stream_restart(&self, stream_id: &str, attempt: u32, error: Option<&str>) {
        match error {
            None => info!(
                event = "stream_restarted",
                instance = %self.instance,
                stream_id = %stream_id,
                attempt = attempt,
                "Stream restart accepted"
            ),
            Some(error) => warn!(
                event = "stream_restart_failed",
                instance = %self.instance,
                stream_id = %stream_id,
                attempt = attempt,
                error = %error,
                "Stream restart failed"
            ),
        }
    }

    pub fn log_notification(&self, notification: &AlertNotification, delivered: usize, failed: usize) {
        info!(
            event = "notification_created",
            instance = %self.instance,
            notification_id = %notification.id,
            organization_id = %notification.organization_id,
            user_id = %notification.user_id,
            severity = %notification.severity,
            channels_delivered = delivered,
            channels_failed = failed,
            "Alert notification created"
        );
    }
}
