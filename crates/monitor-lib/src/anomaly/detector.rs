//! Periodic anomaly detection
//!
//! One tick reads the active anomaly set once, then runs the event-spike and
//! camera-offline checks concurrently. Each check isolates its own failures:
//! a store error in one check lands in the report and the other check still
//! runs to completion.

use super::{
    BaselineCalculator, OfflineDetector, SpikeDetector, DEFAULT_ABSOLUTE_FLOOR, DEFAULT_LOOKBACK,
    DEFAULT_OFFLINE_THRESHOLD, DEFAULT_RATE_WINDOW, DEFAULT_THRESHOLD_MULTIPLIER,
};
use crate::alerting::Signal;
use crate::clock::{span, Clock};
use crate::health::components;
use crate::models::{Anomaly, AnomalyType, CameraStatus, Severity};
use crate::scheduler::PeriodicJob;
use crate::store::{Filter, Stores};
use crate::tracker::StateTracker;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for the anomaly detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Tick interval (default: 60 seconds)
    pub interval: Duration,
    /// Window the current event rate is counted over (default: 10 minutes)
    pub recent_window: Duration,
    /// Baseline history span (default: 7 days)
    pub lookback: Duration,
    /// Events per window below which no spike is flagged (default: 10)
    pub absolute_floor: f64,
    /// Baseline multiple a spike must exceed (default: 3)
    pub threshold_multiplier: f64,
    /// Heartbeat age that marks a camera offline (default: 5 minutes)
    pub offline_threshold: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            recent_window: DEFAULT_RATE_WINDOW,
            lookback: DEFAULT_LOOKBACK,
            absolute_floor: DEFAULT_ABSOLUTE_FLOOR,
            threshold_multiplier: DEFAULT_THRESHOLD_MULTIPLIER,
            offline_threshold: DEFAULT_OFFLINE_THRESHOLD,
        }
    }
}

impl DetectorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_offline_threshold(mut self, threshold: Duration) -> Self {
        self.offline_threshold = threshold;
        self
    }

    pub fn with_spike_thresholds(mut self, absolute_floor: f64, threshold_multiplier: f64) -> Self {
        self.absolute_floor = absolute_floor;
        self.threshold_multiplier = threshold_multiplier;
        self
    }
}

/// A check that could not complete this tick
#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailure {
    pub check: &'static str,
    pub error: String,
}

/// Outcome of one detection tick
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub created: Vec<Anomaly>,
    /// Candidates dropped because an active record already held the slot
    pub suppressed: usize,
    pub errors: Vec<CheckFailure>,
}

impl DetectionReport {
    pub fn created_of(&self, anomaly_type: AnomalyType) -> impl Iterator<Item = &Anomaly> {
        self.created
            .iter()
            .filter(move |a| a.anomaly_type == anomaly_type)
    }
}

#[derive(Debug, Default)]
struct CheckOutcome {
    created: Vec<Anomaly>,
    suppressed: usize,
    /// Entities the check could not evaluate or record
    failures: Vec<String>,
}

const SPIKE_CHECK: &str = "event_spike";
const OFFLINE_CHECK: &str = "camera_offline";

/// Spike and offline detection over cameras and their event history
pub struct AnomalyDetector {
    stores: Stores,
    tracker: Arc<StateTracker>,
    clock: Arc<dyn Clock>,
    config: DetectorConfig,
    baseline: BaselineCalculator,
    spikes: SpikeDetector,
    offline: OfflineDetector,
    signals: Option<mpsc::Sender<Signal>>,
}

impl AnomalyDetector {
    pub fn new(
        stores: Stores,
        tracker: Arc<StateTracker>,
        clock: Arc<dyn Clock>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            baseline: BaselineCalculator::new(config.lookback, config.recent_window),
            spikes: SpikeDetector::new(config.absolute_floor, config.threshold_multiplier),
            offline: OfflineDetector::new(config.offline_threshold),
            stores,
            tracker,
            clock,
            config,
            signals: None,
        }
    }

    /// Forward every created anomaly to the rule engine
    pub fn with_signal_sender(mut self, signals: mpsc::Sender<Signal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run one detection cycle. Never fails: every error ends up in the report.
    pub async fn run_tick(&self) -> DetectionReport {
        let now = self.clock.now();
        let mut report = DetectionReport::default();

        // Without the active set there is nothing to dedupe against, so skip rather than duplicate
        let active = match self.tracker.active_anomalies().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "Skipping detection tick, active anomalies unavailable");
                report.errors.push(CheckFailure {
                    check: "active_anomalies",
                    error: format!("{:#}", e),
                });
                return report;
            }
        };

        let (spikes, offline) = tokio::join!(
            self.check_event_spikes(&active, now),
            self.check_offline_cameras(&active, now)
        );

        for (check, result) in [(SPIKE_CHECK, spikes), (OFFLINE_CHECK, offline)] {
            match result {
                Ok(outcome) => {
                    report.suppressed += outcome.suppressed;
                    report.created.extend(outcome.created);
                    report
                        .errors
                        .extend(outcome.failures.into_iter().map(|error| CheckFailure { check, error }));
                }
                Err(e) => {
                    error!(check = check, error = %e, "Anomaly check failed");
                    report.errors.push(CheckFailure {
                        check,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            created = report.created.len(),
            suppressed = report.suppressed,
            failed_checks = report.errors.len(),
            "Detection tick complete"
        );
        report
    }

    async fn check_event_spikes(&self, active: &[Anomaly], now: DateTime<Utc>) -> Result<CheckOutcome> {
        let recent = self
            .stores
            .events
            .filter(&Filter::new().since("created_at", now - span(self.config.recent_window)))
            .await
            .context("Failed to fetch recent events")?;

        // entity -> (count, organization)
        let mut per_camera: BTreeMap<String, (u64, Option<String>)> = BTreeMap::new();
        for event in &recent {
            if let Some(camera_id) = &event.camera_id {
                let entry = per_camera
                    .entry(camera_id.clone())
                    .or_insert((0, event.organization_id.clone()));
                entry.0 += 1;
                if entry.1.is_none() {
                    entry.1 = event.organization_id.clone();
                }
            }
        }

        let mut outcome = CheckOutcome::default();
        for (camera_id, (count, organization_id)) in per_camera {
            let current_rate = count as f64;
            if self.spikes.below_floor(current_rate) {
                continue;
            }

            let baseline = match self
                .baseline
                .compute(self.stores.events.as_ref(), &camera_id, now)
                .await
            {
                Ok(baseline) => baseline,
                Err(e) => {
                    warn!(camera_id = %camera_id, error = %e, "Baseline unavailable, skipping entity");
                    outcome
                        .failures
                        .push(format!("baseline for {}: {:#}", camera_id, e));
                    continue;
                }
            };

            let Some(spike) = self.spikes.detect(current_rate, &baseline) else {
                debug!(
                    camera_id = %camera_id,
                    current_rate,
                    baseline_rate = baseline.average_rate,
                    "Rate within baseline"
                );
                continue;
            };

            let mut candidate = Anomaly::open(AnomalyType::EventSpike, &camera_id, spike.details(), now)
                .with_organization(organization_id)
                .with_severity(spike.severity());
            if let Ok(Some(camera)) = self.stores.cameras.get(&camera_id).await {
                candidate = candidate.with_entity_name(camera.name);
            }

            self.open(candidate, active, &mut outcome).await;
        }

        Ok(outcome)
    }

    async fn check_offline_cameras(&self, active: &[Anomaly], now: DateTime<Utc>) -> Result<CheckOutcome> {
        let cameras = self
            .stores
            .cameras
            .filter(&Filter::new().eq("status", CameraStatus::Active.as_str()))
            .await
            .context("Failed to fetch active cameras")?;

        let mut outcome = CheckOutcome::default();
        for camera in &cameras {
            let Some(offline) = self.offline.detect(camera, now) else {
                continue;
            };

            let candidate = Anomaly::open(AnomalyType::CameraOffline, &offline.camera_id, offline.details(), now)
                .with_entity_name(offline.camera_name.clone())
                .with_organization(offline.organization_id.clone())
                .with_severity(Severity::High);

            self.open(candidate, active, &mut outcome).await;
        }

        Ok(outcome)
    }

    async fn open(&self, candidate: Anomaly, active: &[Anomaly], outcome: &mut CheckOutcome) {
        let entity_id = candidate.entity_id.clone();
        match self.tracker.open_anomaly(candidate, active).await {
            Ok(Some(created)) => {
                self.publish(&created);
                outcome.created.push(created);
            }
            Ok(None) => outcome.suppressed += 1,
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Failed to record anomaly");
                outcome
                    .failures
                    .push(format!("record anomaly for {}: {:#}", entity_id, e));
            }
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
impl PeriodicJob for AnomalyDetector {
    fn name(&self) -> &'static str {
        components::ANOMALY_DETECTOR
    }

    async fn run_once(&self) -> Result<()> {
        let report = self.run_tick().await;
        if report.errors.is_empty() {
            return Ok(());
        }

        let failed: Vec<String> = report
            .errors
            .iter()
            .map(|f| format!("{}: {}", f.check, f.error))
            .collect();
        anyhow::bail!("{}", failed.join("; "))
    }
}
