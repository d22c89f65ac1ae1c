//! Periodic stream health monitor
//!
//! A cycle runs three independent sub-tasks concurrently:
//! - health check: poll every live stream, restart the ones that stopped answering
//! - keep-alive: touch the serving layer so idle proxies are not torn down
//! - cleanup: reset streams stuck in a transitional state to idle
//!
//! Every sub-task runs to completion on its own spawned task. Their outcomes
//! are settled into one [`MonitorReport`]; a sub-task's error or panic becomes
//! a report entry instead of failing the cycle.

use super::{record_callback, StreamControl};
use crate::alerting::Signal;
use crate::clock::{span, Clock};
use crate::health::components;
use crate::models::{Anomaly, AnomalyDetails, AnomalyType, Severity, Stream, StreamStatus};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::scheduler::PeriodicJob;
use crate::store::{Filter, Stores};
use crate::tracker::StateTracker;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HEALTHY_SCORE: f64 = 100.0;
const RESTARTED_SCORE: f64 = 50.0;
const FAILURE_PENALTY: f64 = 50.0;

const HEALTH_CHECK: &str = "health_check";
const KEEP_ALIVE: &str = "keep_alive";
const CLEANUP: &str = "cleanup";

/// Configuration for the stream health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Cycle interval (default: 300 seconds)
    pub interval: Duration,
    /// Age after which a transitional stream is reset (default: 24 hours)
    pub staleness_threshold: Duration,
    /// Restart attempts before a stream is marked degraded (default: 3)
    pub restart_attempts: u32,
    /// Pause between restart attempts (default: 2 seconds)
    pub restart_backoff: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            staleness_threshold: Duration::from_secs(24 * 60 * 60),
            restart_attempts: 3,
            restart_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub restarted: usize,
    pub failed: usize,
    /// Stream or anomaly records that could not be written
    pub failed_writes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepAliveSummary {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupSummary {
    pub reset: Vec<String>,
    /// Streams whose reset could not be written
    pub failed_writes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubTaskFailure {
    pub sub_task: &'static str,
    pub error: String,
}

/// Settled outcome of one monitor cycle
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub health_check: Option<HealthCheckSummary>,
    pub keep_alive: Option<KeepAliveSummary>,
    pub cleanup: Option<CleanupSummary>,
    pub errors: Vec<SubTaskFailure>,
}

enum CheckOutcome {
    Healthy,
    Restarted,
    Failed,
}

impl CheckOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Healthy => "healthy",
            CheckOutcome::Restarted => "restarted",
            CheckOutcome::Failed => "failed",
        }
    }
}

struct Inner {
    stores: Stores,
    control: Arc<dyn StreamControl>,
    tracker: Arc<StateTracker>,
    clock: Arc<dyn Clock>,
    config: HealthMonitorConfig,
    signals: Option<mpsc::Sender<Signal>>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

/// Periodic stream health check, recovery and stale cleanup
pub struct StreamHealthMonitor {
    inner: Arc<Inner>,
}

impl StreamHealthMonitor {
    pub fn new(
        stores: Stores,
        control: Arc<dyn StreamControl>,
        tracker: Arc<StateTracker>,
        clock: Arc<dyn Clock>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self::build(stores, control, tracker, clock, config, None)
    }

    /// Same as [`new`](Self::new), forwarding stream_degraded anomalies to the rule engine
    pub fn with_signals(
        stores: Stores,
        control: Arc<dyn StreamControl>,
        tracker: Arc<StateTracker>,
        clock: Arc<dyn Clock>,
        config: HealthMonitorConfig,
        signals: mpsc::Sender<Signal>,
    ) -> Self {
        Self::build(stores, control, tracker, clock, config, Some(signals))
    }

    fn build(
        stores: Stores,
        control: Arc<dyn StreamControl>,
        tracker: Arc<StateTracker>,
        clock: Arc<dyn Clock>,
        config: HealthMonitorConfig,
        signals: Option<mpsc::Sender<Signal>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                control,
                tracker,
                clock,
                config,
                signals,
                metrics: MonitorMetrics::new(),
                logger: StructuredLogger::default(),
            }),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.inner.config
    }

    /// Run all three sub-tasks and wait for every one of them to settle
    pub async fn run_cycle(&self) -> MonitorReport {
        let health = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.health_check().await })
        };
        let keep_alive = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.keep_alive().await })
        };
        let cleanup = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.cleanup().await })
        };

        let (health, keep_alive, cleanup) = tokio::join!(health, keep_alive, cleanup);

        let mut report = MonitorReport::default();
        report.health_check = settle(HEALTH_CHECK, health, &mut report.errors);
        report.keep_alive = settle(KEEP_ALIVE, keep_alive, &mut report.errors);
        report.cleanup = settle(CLEANUP, cleanup, &mut report.errors);

        // A sub-task that finished but lost writes still counts as failed
        if let Some(summary) = &report.health_check {
            report_writes(HEALTH_CHECK, &summary.failed_writes, &mut report.errors);
        }
        if let Some(summary) = &report.cleanup {
            report_writes(CLEANUP, &summary.failed_writes, &mut report.errors);
        }

        info!(
            health_check = ?report.health_check,
            cleanup_reset = report.cleanup.as_ref().map_or(0, |c| c.reset.len()),
            failed_sub_tasks = report.errors.len(),
            "Stream health cycle complete"
        );
        report
    }
}

fn settle<T>(
    sub_task: &'static str,
    joined: Result<Result<T>, tokio::task::JoinError>,
    errors: &mut Vec<SubTaskFailure>,
) -> Option<T> {
    let error = match joined {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) => format!("sub-task panicked: {}", e),
    };

    error!(sub_task = sub_task, error = %error, "Stream health sub-task failed");
    errors.push(SubTaskFailure { sub_task, error });
    None
}

fn report_writes(sub_task: &'static str, failed: &[String], errors: &mut Vec<SubTaskFailure>) {
    if failed.is_empty() {
        return;
    }

    let error = failed.join("; ");
    error!(sub_task = sub_task, error = %error, "Stream health sub-task lost writes");
    errors.push(SubTaskFailure { sub_task, error });
}

impl Inner {
    async fn health_check(&self) -> Result<HealthCheckSummary> {
        let live = self
            .stores
            .streams
            .filter(&Filter::new().eq("status", StreamStatus::Live.as_str()))
            .await
            .context("Failed to fetch live streams")?;

        let mut summary = HealthCheckSummary::default();
        for stream in live {
            summary.checked += 1;
            let outcome = self.check_stream(stream, &mut summary.failed_writes).await;
            self.metrics.inc_stream_checks(outcome.as_str());
            match outcome {
                CheckOutcome::Healthy => summary.healthy += 1,
                CheckOutcome::Restarted => summary.restarted += 1,
                CheckOutcome::Failed => summary.failed += 1,
            }
        }

        Ok(summary)
    }

    async fn check_stream(&self, mut stream: Stream, failed_writes: &mut Vec<String>) -> CheckOutcome {
        let reason = match self.control.stream_status(&stream.id).await {
            Ok(state) if state.status == StreamStatus::Live => {
                let now = self.clock.now();
                stream.health_score = HEALTHY_SCORE;
                stream.last_heartbeat = Some(now);
                stream.last_error = None;
                stream.updated_at = now;
                self.save(stream, failed_writes).await;
                return CheckOutcome::Healthy;
            }
            Ok(state) => format!("stream reported {}", state.status),
            Err(e) => e.to_string(),
        };

        debug!(stream_id = %stream.id, reason = %reason, "Stream unhealthy, attempting restart");
        self.recover(stream, reason, failed_writes).await
    }

    async fn recover(
        &self,
        mut stream: Stream,
        reason: String,
        failed_writes: &mut Vec<String>,
    ) -> CheckOutcome {
        let attempts = self.config.restart_attempts.max(1);
        let mut last_error = reason;

        for attempt in 1..=attempts {
            match self.control.restart_stream(&stream.id).await {
                Ok(state) => {
                    let now = self.clock.now();
                    record_callback(&self.stores, now, &stream.id, Some(&stream.camera_id), "restart", Ok(())).await;
                    self.logger.log_stream_restart(&stream.id, attempt, None);

                    stream.status = state.status;
                    stream.health_score = RESTARTED_SCORE;
                    stream.last_error = Some(last_error);
                    stream.updated_at = now;
                    self.save(stream, failed_writes).await;
                    return CheckOutcome::Restarted;
                }
                Err(e) => {
                    last_error = e.to_string();
                    record_callback(
                        &self.stores,
                        self.clock.now(),
                        &stream.id,
                        Some(&stream.camera_id),
                        "restart",
                        Err(last_error.clone()),
                    )
                    .await;
                    self.logger.log_stream_restart(&stream.id, attempt, Some(&last_error));

                    if attempt < attempts && !self.config.restart_backoff.is_zero() {
                        tokio::time::sleep(self.config.restart_backoff).await;
                    }
                }
            }
        }

        let now = self.clock.now();
        stream.status = StreamStatus::Error;
        stream.health_score = (stream.health_score - FAILURE_PENALTY).max(0.0);
        stream.last_error = Some(last_error.clone());
        stream.updated_at = now;

        let candidate = Anomaly::open(
            AnomalyType::StreamDegraded,
            &stream.id,
            AnomalyDetails {
                message: format!(
                    "Stream {} for camera {} did not recover after {} restart attempts: {}",
                    stream.id, stream.camera_id, attempts, last_error
                ),
                ..Default::default()
            },
            now,
        )
        .with_entity_name(stream.camera_id.clone())
        .with_organization(stream.organization_id.clone())
        .with_severity(Severity::High);

        let stream_id = stream.id.clone();
        self.save(stream, failed_writes).await;

        match self.tracker.open_if_absent(candidate).await {
            Ok(Some(anomaly)) => self.publish(&anomaly),
            Ok(None) => {}
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Failed to record stream_degraded anomaly");
                failed_writes.push(format!("stream_degraded anomaly for {}: {:#}", stream_id, e));
            }
        }

        CheckOutcome::Failed
    }

    async fn keep_alive(&self) -> Result<KeepAliveSummary> {
        self.control
            .keep_alive()
            .await
            .context("Stream keep-alive failed")?;
        Ok(KeepAliveSummary {
            at: self.clock.now(),
        })
    }

    async fn cleanup(&self) -> Result<CleanupSummary> {
        let now = self.clock.now();
        let cutoff = now - span(self.config.staleness_threshold);

        let candidates = self
            .stores
            .streams
            .filter(&Filter::new().before("updated_at", cutoff))
            .await
            .context("Failed to fetch stale streams")?;

        let mut summary = CleanupSummary::default();
        for mut stream in candidates {
            if !stream.status.is_transitional() {
                continue;
            }

            let previous = stream.status;
            stream.status_reason = Some(format!(
                "Reset from {} after {}h without a transition",
                previous,
                self.config.staleness_threshold.as_secs() / 3600
            ));
            stream.status = StreamStatus::Idle;
            stream.updated_at = now;

            let stream_id = stream.id.clone();
            match self.stores.streams.update(stream).await {
                Ok(_) => {
                    info!(stream_id = %stream_id, from = %previous, "Reset stale stream to idle");
                    self.metrics.inc_stale_streams_reset();
                    summary.reset.push(stream_id);
                }
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "Failed to reset stale stream");
                    summary.failed_writes.push(format!("reset {}: {:#}", stream_id, e));
                }
            }
        }

        Ok(summary)
    }

    async fn save(&self, stream: Stream, failed_writes: &mut Vec<String>) {
        let stream_id = stream.id.clone();
        if let Err(e) = self.stores.streams.update(stream).await {
            warn!(stream_id = %stream_id, error = %e, "Failed to persist stream health");
            failed_writes.push(format!("stream {}: {:#}", stream_id, e));
        }
    }

    fn publish(&self, anomaly: &Anomaly) {
        if let Some(signals) = &self.signals {
            if let Err(e) = signals.try_send(Signal::from_anomaly(anomaly)) {
                warn!(anomaly_id = %anomaly.id, error = %e, "Rule engine queue unavailable");
            }
        }
    }
}

#[async_trait]
impl PeriodicJob for StreamHealthMonitor {
    fn name(&self) -> &'static str {
        components::STREAM_HEALTH_MONITOR
    }

    async fn run_once(&self) -> Result<()> {
        let report = self.run_cycle().await;
        if report.errors.is_empty() {
            return Ok(());
        }

        let failed: Vec<String> = report
            .errors
            .iter()
            .map(|f| format!("{}: {}", f.sub_task, f.error))
            .collect();
        anyhow::bail!("{}", failed.join("; "))
    }
}
