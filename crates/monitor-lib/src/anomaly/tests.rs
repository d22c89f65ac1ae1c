//! Detection scenarios against in-memory stores

use super::*;
use crate::alerting::SignalSource;
use crate::clock::ManualClock;
use crate::models::{AnomalyStatus, AnomalyType, Camera, CameraStatus, Event, Severity};
use crate::store::{Entity, Filter, MemoryRepository, Repository, Stores};
use crate::tracker::StateTracker;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 14, 0, 0).unwrap()
}

struct Harness {
    stores: Stores,
    clock: Arc<ManualClock>,
    tracker: Arc<StateTracker>,
}

impl Harness {
    fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    fn with_stores(stores: Stores) -> Self {
        let clock = Arc::new(ManualClock::new(now()));
        let tracker = Arc::new(StateTracker::new(stores.clone(), clock.clone()));
        Self {
            stores,
            clock,
            tracker,
        }
    }

    fn detector(&self, config: DetectorConfig) -> AnomalyDetector {
        AnomalyDetector::new(
            self.stores.clone(),
            self.tracker.clone(),
            self.clock.clone(),
            config,
        )
    }

    async fn add_camera(&self, id: &str, name: &str, status: CameraStatus, heartbeat_age: Option<i64>) {
        self.stores
            .cameras
            .create(Camera {
                id: id.to_string(),
                organization_id: Some("org-1".to_string()),
                name: name.to_string(),
                status,
                last_heartbeat: heartbeat_age.map(|secs| now() - ChronoDuration::seconds(secs)),
            })
            .await
            .unwrap();
    }

    async fn add_events(&self, camera_id: &str, count: usize, age: ChronoDuration) {
        for i in 0..count {
            self.stores
                .events
                .create(Event {
                    id: format!("{}-{}-{}", camera_id, age.num_seconds(), i),
                    organization_id: Some("org-1".to_string()),
                    camera_id: Some(camera_id.to_string()),
                    event_type: "motion".to_string(),
                    severity: Severity::Medium,
                    confidence: 0.8,
                    title: None,
                    description: None,
                    created_at: now() - age,
                })
                .await
                .unwrap();
        }
    }

    async fn stored(&self, anomaly_type: AnomalyType) -> Vec<crate::models::Anomaly> {
        self.stores
            .anomalies
            .filter(&Filter::new().eq("type", anomaly_type.as_str()))
            .await
            .unwrap()
    }
}

/// Repository whose every call fails
struct FailingRepository;

#[async_trait]
impl<T: Entity> Repository<T> for FailingRepository {
    async fn filter(&self, _filter: &Filter) -> Result<Vec<T>> {
        anyhow::bail!("entity API unavailable")
    }

    async fn get(&self, _id: &str) -> Result<Option<T>> {
        anyhow::bail!("entity API unavailable")
    }

    async fn create(&self, _record: T) -> Result<T> {
        anyhow::bail!("entity API unavailable")
    }

    async fn update(&self, _record: T) -> Result<T> {
        anyhow::bail!("entity API unavailable")
    }
}

/// Reads succeed, writes are refused
struct ReadOnlyRepository<T: Entity>(MemoryRepository<T>);

#[async_trait]
impl<T: Entity> Repository<T> for ReadOnlyRepository<T> {
    async fn filter(&self, filter: &Filter) -> Result<Vec<T>> {
        self.0.filter(filter).await
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        self.0.get(id).await
    }

    async fn create(&self, _record: T) -> Result<T> {
        anyhow::bail!("entity API rejected write")
    }

    async fn update(&self, _record: T) -> Result<T> {
        anyhow::bail!("entity API rejected write")
    }
}

#[tokio::test]
async fn test_one_stale_camera_among_fifteen() {
    let harness = Harness::new();
    for i in 0..14 {
        harness
            .add_camera(&format!("cam-{:02}", i), &format!("Aisle {}", i), CameraStatus::Active, Some(30))
            .await;
    }
    harness
        .add_camera("cam-14", "Loading Dock", CameraStatus::Active, Some(6 * 60))
        .await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    assert!(report.errors.is_empty());
    let offline: Vec<_> = report.created_of(AnomalyType::CameraOffline).collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].entity_id, "cam-14");
    assert_eq!(offline[0].entity_name.as_deref(), Some("Loading Dock"));
    assert!(offline[0].details.message.contains("Loading Dock"));
    assert!(offline[0].details.message.contains("cam-14"));
    assert_eq!(offline[0].severity, Severity::High);
    assert_eq!(harness.stored(AnomalyType::CameraOffline).await.len(), 1);
}

#[tokio::test]
async fn test_missing_heartbeat_flagged_on_first_tick() {
    let harness = Harness::new();
    harness.add_camera("cam-new", "Lobby", CameraStatus::Active, None).await;
    harness
        .add_camera("cam-off", "Archive", CameraStatus::Inactive, None)
        .await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    let offline: Vec<_> = report.created_of(AnomalyType::CameraOffline).collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].entity_id, "cam-new");
    assert!(offline[0].details.offline_since.is_none());
}

#[tokio::test]
async fn test_heartbeat_at_threshold_is_not_offline() {
    let harness = Harness::new();
    harness
        .add_camera("cam-1", "Gate", CameraStatus::Active, Some(5 * 60))
        .await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    assert!(report.created.is_empty());
}

#[tokio::test]
async fn test_zero_baseline_spike_reports_hundred_percent() {
    let harness = Harness::new();
    harness.add_events("cam-1", 12, ChronoDuration::minutes(2)).await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    let spikes: Vec<_> = report.created_of(AnomalyType::EventSpike).collect();
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].entity_id, "cam-1");
    assert_eq!(spikes[0].details.baseline_rate, Some(0.0));
    assert_eq!(spikes[0].details.spike_percentage, Some(100.0));
    assert!(spikes[0].details.message.contains("100%"));
    assert_eq!(spikes[0].organization_id.as_deref(), Some("org-1"));
}

#[tokio::test]
async fn test_count_at_floor_is_not_a_spike() {
    let harness = Harness::new();
    harness.add_events("cam-1", 10, ChronoDuration::minutes(2)).await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    assert!(report.created.is_empty());
}

#[tokio::test]
async fn test_spike_compared_against_history() {
    let harness = Harness::new();
    // one hour of history at 10 minute windows gives five baseline windows
    let config = DetectorConfig {
        lookback: Duration::from_secs(60 * 60),
        ..DetectorConfig::default()
    };
    harness.add_events("cam-quiet", 25, ChronoDuration::minutes(30)).await;
    harness.add_events("cam-quiet", 12, ChronoDuration::minutes(1)).await;
    harness.add_events("cam-busy", 25, ChronoDuration::minutes(30)).await;
    harness.add_events("cam-busy", 16, ChronoDuration::minutes(1)).await;
    harness
        .add_camera("cam-busy", "Parking", CameraStatus::Maintenance, None)
        .await;

    let report = harness.detector(config).run_tick().await;

    // baseline 5/window: 12 is under 15, 16 is over
    let spikes: Vec<_> = report.created_of(AnomalyType::EventSpike).collect();
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].entity_id, "cam-busy");
    assert_eq!(spikes[0].entity_name.as_deref(), Some("Parking"));
    assert_eq!(spikes[0].details.baseline_rate, Some(5.0));
    let pct = spikes[0].details.spike_percentage.unwrap();
    assert!((pct - 220.0).abs() < 1e-9);
    assert_eq!(spikes[0].severity, Severity::Medium);
}

#[tokio::test]
async fn test_repeat_tick_suppresses_duplicate() {
    let harness = Harness::new();
    harness.add_camera("cam-1", "Gate", CameraStatus::Active, None).await;
    harness.add_events("cam-2", 20, ChronoDuration::minutes(3)).await;
    let detector = harness.detector(DetectorConfig::default());

    let first = detector.run_tick().await;
    let second = detector.run_tick().await;

    assert_eq!(first.created.len(), 2);
    assert!(second.created.is_empty());
    assert_eq!(second.suppressed, 2);
    assert_eq!(harness.stores.anomalies.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_acknowledged_condition_opens_new_anomaly() {
    let harness = Harness::new();
    harness.add_events("cam-1", 20, ChronoDuration::minutes(3)).await;
    let detector = harness.detector(DetectorConfig::default());

    let first = detector.run_tick().await;
    let original = first.created[0].clone();

    harness.clock.advance(Duration::from_secs(60));
    let acked = harness.tracker.acknowledge(&original.id, "operator-1").await.unwrap();
    assert_eq!(acked.created_at, original.created_at);

    let second = detector.run_tick().await;

    assert_eq!(second.created.len(), 1);
    assert_ne!(second.created[0].id, original.id);

    let stored = harness.stored(AnomalyType::EventSpike).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(
        stored
            .iter()
            .filter(|a| a.status == AnomalyStatus::Active)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_failing_check_does_not_abort_sibling() {
    let mut stores = Stores::in_memory();
    stores.cameras = Arc::new(FailingRepository);
    let harness = Harness::with_stores(stores);
    harness.add_events("cam-1", 20, ChronoDuration::minutes(3)).await;

    let report = harness.detector(DetectorConfig::default()).run_tick().await;

    assert_eq!(report.created_of(AnomalyType::EventSpike).count(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].check, "camera_offline");
    assert!(report.errors[0].error.contains("entity API unavailable"));
}

#[tokio::test]
async fn test_unreadable_active_set_skips_tick() {
    let mut stores = Stores::in_memory();
    stores.anomalies = Arc::new(FailingRepository);
    let harness = Harness::with_stores(stores);
    harness.add_camera("cam-1", "Gate", CameraStatus::Active, None).await;
    let detector = harness.detector(DetectorConfig::default());

    let report = detector.run_tick().await;

    assert!(report.created.is_empty());
    assert_eq!(report.errors[0].check, "active_anomalies");
    assert!(crate::scheduler::PeriodicJob::run_once(&detector).await.is_err());
}

#[tokio::test]
async fn test_created_anomalies_are_forwarded() {
    let harness = Harness::new();
    harness.add_camera("cam-1", "Gate", CameraStatus::Active, None).await;
    let (tx, mut rx) = mpsc::channel(8);
    let detector = harness
        .detector(DetectorConfig::default())
        .with_signal_sender(tx);

    let report = detector.run_tick().await;

    let signal = rx.try_recv().unwrap();
    assert_eq!(signal.source, SignalSource::Anomaly);
    assert_eq!(signal.id, report.created[0].id);
    assert_eq!(signal.kind, "camera_offline");
    assert_eq!(signal.severity, Severity::High);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_anomaly_write_degrades_tick() {
    let mut stores = Stores::in_memory();
    stores.anomalies = Arc::new(ReadOnlyRepository(MemoryRepository::new()));
    let harness = Harness::with_stores(stores);
    harness.add_camera("cam-1", "Gate", CameraStatus::Active, None).await;
    let detector = harness.detector(DetectorConfig::default());

    let report = detector.run_tick().await;

    assert!(report.created.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].check, "camera_offline");
    assert!(report.errors[0].error.contains("cam-1"));
    assert!(report.errors[0].error.contains("rejected write"));

    let err = crate::scheduler::PeriodicJob::run_once(&detector).await.unwrap_err();
    assert!(err.to_string().contains("camera_offline"));
}
