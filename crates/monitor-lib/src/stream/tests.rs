//! Health monitor and watchdog scenarios against a fake serving layer

use super::*;
use crate::clock::ManualClock;
use crate::models::{AnomalyType, Camera, CameraStatus, Stream};
use crate::store::{Entity, Filter, MemoryRepository, Repository};
use crate::tracker::StateTracker;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 3, 3, 0, 0).unwrap()
}

fn unavailable() -> StreamApiError {
    StreamApiError::Status {
        status: 503,
        body: "media server unavailable".to_string(),
    }
}

/// In-process stand-in for the stream-serving layer
#[derive(Default)]
struct FakeControl {
    reported: HashMap<String, StreamStatus>,
    unreachable: HashSet<String>,
    restart_fails: HashSet<String>,
    camera_streams: HashMap<String, Vec<StreamState>>,
    keep_alive_fails: bool,
    keep_alive_panics: bool,
    restarts: Mutex<Vec<String>>,
}

impl FakeControl {
    fn reporting(mut self, stream_id: &str, status: StreamStatus) -> Self {
        self.reported.insert(stream_id.to_string(), status);
        self
    }

    fn unreachable(mut self, stream_id: &str) -> Self {
        self.unreachable.insert(stream_id.to_string());
        self
    }

    fn failing_restart(mut self, stream_id: &str) -> Self {
        self.restart_fails.insert(stream_id.to_string());
        self
    }

    fn with_camera_stream(mut self, camera_id: &str, stream_id: &str, status: StreamStatus) -> Self {
        self.camera_streams
            .entry(camera_id.to_string())
            .or_default()
            .push(StreamState {
                id: stream_id.to_string(),
                camera_id: Some(camera_id.to_string()),
                status,
                message: None,
            });
        self
    }

    fn restart_count(&self, stream_id: &str) -> usize {
        self.restarts
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == stream_id)
            .count()
    }
}

#[async_trait]
impl StreamControl for FakeControl {
    async fn stream_status(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        if self.unreachable.contains(stream_id) {
            return Err(unavailable());
        }
        Ok(StreamState {
            id: stream_id.to_string(),
            camera_id: None,
            status: self
                .reported
                .get(stream_id)
                .copied()
                .unwrap_or(StreamStatus::Live),
            message: None,
        })
    }

    async fn streams_for_camera(&self, camera_id: &str) -> Result<Vec<StreamState>, StreamApiError> {
        self.camera_streams
            .get(camera_id)
            .cloned()
            .ok_or_else(unavailable)
    }

    async fn restart_stream(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        self.restarts.lock().unwrap().push(stream_id.to_string());
        if self.restart_fails.contains(stream_id) {
            return Err(unavailable());
        }
        Ok(StreamState {
            id: stream_id.to_string(),
            camera_id: None,
            status: StreamStatus::Starting,
            message: None,
        })
    }

    async fn keep_alive(&self) -> Result<(), StreamApiError> {
        if self.keep_alive_panics {
            panic!("proxy client poisoned");
        }
        if self.keep_alive_fails {
            return Err(unavailable());
        }
        Ok(())
    }
}

/// Reads succeed, writes are refused
struct ReadOnlyRepository<T: Entity>(MemoryRepository<T>);

#[async_trait]
impl<T: Entity> Repository<T> for ReadOnlyRepository<T> {
    async fn filter(&self, filter: &Filter) -> anyhow::Result<Vec<T>> {
        self.0.filter(filter).await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<T>> {
        self.0.get(id).await
    }

    async fn create(&self, _record: T) -> anyhow::Result<T> {
        anyhow::bail!("entity API rejected write")
    }

    async fn update(&self, _record: T) -> anyhow::Result<T> {
        anyhow::bail!("entity API rejected write")
    }
}

fn stream(id: &str, status: StreamStatus, updated_at: DateTime<Utc>) -> Stream {
    Stream {
        id: id.to_string(),
        camera_id: format!("cam-{}", id),
        organization_id: Some("org-1".to_string()),
        status,
        health_score: 100.0,
        last_heartbeat: Some(updated_at),
        last_error: None,
        status_reason: None,
        updated_at,
    }
}

struct Harness {
    stores: Stores,
    clock: Arc<ManualClock>,
    control: Arc<FakeControl>,
}

impl Harness {
    async fn new(control: FakeControl, streams: Vec<Stream>) -> Self {
        let stores = Stores::in_memory();
        for s in streams {
            stores.streams.create(s).await.unwrap();
        }
        Self {
            stores,
            clock: Arc::new(ManualClock::new(now())),
            control: Arc::new(control),
        }
    }

    fn monitor(&self) -> StreamHealthMonitor {
        let tracker = Arc::new(StateTracker::new(self.stores.clone(), self.clock.clone()));
        let config = HealthMonitorConfig {
            restart_backoff: Duration::ZERO,
            ..HealthMonitorConfig::default()
        };
        StreamHealthMonitor::new(
            self.stores.clone(),
            self.control.clone(),
            tracker,
            self.clock.clone(),
            config,
        )
    }

    fn watchdog(&self) -> StreamWatchdog {
        StreamWatchdog::new(
            self.stores.clone(),
            self.control.clone(),
            self.clock.clone(),
            WatchdogConfig::default(),
        )
    }

    async fn stream(&self, id: &str) -> Stream {
        self.stores.streams.get(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_keep_alive_failure_is_isolated() {
    let control = FakeControl {
        keep_alive_fails: true,
        ..Default::default()
    };
    let harness = Harness::new(
        control,
        vec![
            stream("s-live", StreamStatus::Live, now() - ChronoDuration::minutes(5)),
            stream("s-stuck", StreamStatus::Starting, now() - ChronoDuration::hours(30)),
        ],
    )
    .await;

    let report = harness.monitor().run_cycle().await;

    assert_eq!(
        report.health_check,
        Some(HealthCheckSummary {
            checked: 1,
            healthy: 1,
            restarted: 0,
            failed: 0,
            failed_writes: Vec::new(),
        })
    );
    assert_eq!(report.cleanup.unwrap().reset, vec!["s-stuck".to_string()]);
    assert!(report.keep_alive.is_none());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].sub_task, "keep_alive");
    assert!(report.errors[0].error.contains("503"));
}

#[tokio::test]
async fn test_panicking_sub_task_is_captured() {
    let control = FakeControl {
        keep_alive_panics: true,
        ..Default::default()
    };
    let harness = Harness::new(
        control,
        vec![stream("s-live", StreamStatus::Live, now())],
    )
    .await;

    let report = harness.monitor().run_cycle().await;

    assert!(report.health_check.is_some());
    assert!(report.cleanup.is_some());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].error.contains("panicked"));
}

#[tokio::test]
async fn test_healthy_stream_refreshes_heartbeat() {
    let harness = Harness::new(
        FakeControl::default(),
        vec![stream("s-1", StreamStatus::Live, now() - ChronoDuration::minutes(10))],
    )
    .await;

    harness.monitor().run_cycle().await;

    let stored = harness.stream("s-1").await;
    assert_eq!(stored.health_score, 100.0);
    assert_eq!(stored.last_heartbeat, Some(now()));
    assert_eq!(harness.control.restart_count("s-1"), 0);
}

#[tokio::test]
async fn test_unhealthy_stream_is_restarted() {
    let control = FakeControl::default().reporting("s-1", StreamStatus::Error);
    let harness = Harness::new(control, vec![stream("s-1", StreamStatus::Live, now())]).await;

    let report = harness.monitor().run_cycle().await;

    assert_eq!(report.health_check.unwrap().restarted, 1);
    let stored = harness.stream("s-1").await;
    assert_eq!(stored.status, StreamStatus::Starting);
    assert_eq!(stored.health_score, 50.0);
    assert_eq!(stored.last_error.as_deref(), Some("stream reported error"));

    let logs = harness.stores.callback_logs.list().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
    assert_eq!(logs[0].action, "restart");
    assert_eq!(logs[0].camera_id.as_deref(), Some("cam-s-1"));
}

#[tokio::test]
async fn test_exhausted_restarts_degrade_stream() {
    let control = FakeControl::default()
        .unreachable("s-1")
        .failing_restart("s-1");
    let harness = Harness::new(control, vec![stream("s-1", StreamStatus::Live, now())]).await;
    let monitor = harness.monitor();

    let report = monitor.run_cycle().await;

    assert_eq!(report.health_check.unwrap().failed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(harness.control.restart_count("s-1"), 3);

    let stored = harness.stream("s-1").await;
    assert_eq!(stored.status, StreamStatus::Error);
    assert_eq!(stored.health_score, 50.0);

    let logs = harness.stores.callback_logs.list().await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| !l.success));

    let degraded = harness
        .stores
        .anomalies
        .filter(&Filter::new().eq("type", AnomalyType::StreamDegraded.as_str()))
        .await
        .unwrap();
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].entity_id, "s-1");
    assert!(degraded[0].details.message.contains("3 restart attempts"));
}

#[tokio::test]
async fn test_cleanup_only_resets_old_transitional_streams() {
    let harness = Harness::new(
        FakeControl::default(),
        vec![
            stream("s-error", StreamStatus::Error, now() - ChronoDuration::hours(25)),
            stream("s-fresh", StreamStatus::Starting, now() - ChronoDuration::hours(2)),
            stream("s-stopped", StreamStatus::Stopped, now() - ChronoDuration::days(3)),
        ],
    )
    .await;

    let report = harness.monitor().run_cycle().await;

    assert_eq!(report.cleanup.unwrap().reset, vec!["s-error".to_string()]);
    let reset = harness.stream("s-error").await;
    assert_eq!(reset.status, StreamStatus::Idle);
    assert!(reset.status_reason.unwrap().contains("error"));
    assert_eq!(reset.updated_at, now());
    assert_eq!(harness.stream("s-fresh").await.status, StreamStatus::Starting);
    assert_eq!(harness.stream("s-stopped").await.status, StreamStatus::Stopped);
}

#[tokio::test]
async fn test_watchdog_revives_streams_of_active_cameras() {
    let control = FakeControl::default()
        .with_camera_stream("cam-a", "s-a1", StreamStatus::Stopped)
        .with_camera_stream("cam-a", "s-a2", StreamStatus::Live)
        .with_camera_stream("cam-b", "s-b1", StreamStatus::Idle);
    let harness = Harness::new(
        control,
        vec![stream("s-a1", StreamStatus::Stopped, now() - ChronoDuration::hours(1))],
    )
    .await;
    for (id, status) in [("cam-a", CameraStatus::Active), ("cam-b", CameraStatus::Inactive)] {
        harness
            .stores
            .cameras
            .create(Camera {
                id: id.to_string(),
                organization_id: Some("org-1".to_string()),
                name: id.to_uppercase(),
                status,
                last_heartbeat: None,
            })
            .await
            .unwrap();
    }

    let report = harness.watchdog().run_tick().await.unwrap();

    assert!(report.keep_alive_ok);
    assert_eq!(report.revived, vec!["s-a1".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(harness.control.restart_count("s-b1"), 0);

    let synced = harness.stream("s-a1").await;
    assert_eq!(synced.status, StreamStatus::Starting);
    assert_eq!(synced.status_reason.as_deref(), Some("Restarted by watchdog"));

    let logs = harness.stores.callback_logs.list().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "watchdog_restart");
}

#[tokio::test]
async fn test_watchdog_tolerates_unlisted_camera() {
    let control = FakeControl {
        keep_alive_fails: true,
        ..Default::default()
    };
    let harness = Harness::new(control, vec![]).await;
    harness
        .stores
        .cameras
        .create(Camera {
            id: "cam-x".to_string(),
            organization_id: None,
            name: "Roof".to_string(),
            status: CameraStatus::Active,
            last_heartbeat: None,
        })
        .await
        .unwrap();

    let report = harness.watchdog().run_tick().await.unwrap();

    assert!(!report.keep_alive_ok);
    assert_eq!(report.unreachable_cameras, vec!["cam-x".to_string()]);
}

#[tokio::test]
async fn test_lost_stream_write_fails_health_check() {
    let mut harness = Harness::new(FakeControl::default(), vec![]).await;
    harness.stores.streams = Arc::new(ReadOnlyRepository(MemoryRepository::with_records(vec![
        stream("s-live", StreamStatus::Live, now() - ChronoDuration::minutes(5)),
    ])));

    let report = harness.monitor().run_cycle().await;

    let summary = report.health_check.unwrap();
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.failed_writes.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].sub_task, "health_check");
    assert!(report.errors[0].error.contains("s-live"));
    assert!(report.errors[0].error.contains("rejected write"));
}

#[tokio::test]
async fn test_lost_degraded_anomaly_is_reported() {
    let control = FakeControl::default()
        .unreachable("s-1")
        .failing_restart("s-1");
    let mut harness = Harness::new(control, vec![stream("s-1", StreamStatus::Live, now())]).await;
    harness.stores.anomalies = Arc::new(ReadOnlyRepository(MemoryRepository::new()));
    let monitor = harness.monitor();

    let report = monitor.run_cycle().await;

    assert_eq!(report.health_check.as_ref().unwrap().failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].sub_task, "health_check");
    assert!(report.errors[0].error.contains("stream_degraded anomaly for s-1"));
    assert!(crate::scheduler::PeriodicJob::run_once(&monitor).await.is_err());
}

#[tokio::test]
async fn test_lost_cleanup_write_fails_cleanup() {
    let mut harness = Harness::new(FakeControl::default(), vec![]).await;
    harness.stores.streams = Arc::new(ReadOnlyRepository(MemoryRepository::with_records(vec![
        stream("s-stuck", StreamStatus::Starting, now() - ChronoDuration::hours(30)),
    ])));

    let report = harness.monitor().run_cycle().await;

    let cleanup = report.cleanup.unwrap();
    assert!(cleanup.reset.is_empty());
    assert_eq!(cleanup.failed_writes.len(), 1);
    assert!(report
        .errors
        .iter()
        .any(|e| e.sub_task == "cleanup" && e.error.contains("s-stuck")));
}
