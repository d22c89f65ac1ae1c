//! Stream watchdog
//!
//! Runs on its own timer, separate from the health monitor. Each tick pings
//! the serving layer and restarts any stream that is stopped or idle while
//! its camera is declared active.

use super::{record_callback, StreamControl, StreamState};
use crate::clock::Clock;
use crate::health::components;
use crate::models::{Camera, CameraStatus, StreamStatus};
use crate::observability::StructuredLogger;
use crate::scheduler::PeriodicJob;
use crate::store::{Filter, Stores};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Tick interval (default: 300 seconds)
    pub interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchdogReport {
    pub keep_alive_ok: bool,
    pub revived: Vec<String>,
    pub failed: Vec<String>,
    /// Cameras whose streams could not be listed
    pub unreachable_cameras: Vec<String>,
}

/// Revives stopped or idle streams of active cameras
pub struct StreamWatchdog {
    stores: Stores,
    control: Arc<dyn StreamControl>,
    clock: Arc<dyn Clock>,
    config: WatchdogConfig,
    logger: StructuredLogger,
}

impl StreamWatchdog {
    pub fn new(
        stores: Stores,
        control: Arc<dyn StreamControl>,
        clock: Arc<dyn Clock>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            stores,
            control,
            clock,
            config,
            logger: StructuredLogger::default(),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// One pass over the streams of every active camera
    pub async fn run_tick(&self) -> Result<WatchdogReport> {
        let mut report = WatchdogReport::default();

        match self.control.keep_alive().await {
            Ok(()) => report.keep_alive_ok = true,
            Err(e) => warn!(error = %e, "Watchdog keep-alive failed"),
        }

        let cameras = self
            .stores
            .cameras
            .filter(&Filter::new().eq("status", CameraStatus::Active.as_str()))
            .await
            .context("Failed to fetch active cameras")?;

        for camera in &cameras {
            let streams = match self.control.streams_for_camera(&camera.id).await {
                Ok(streams) => streams,
                Err(e) => {
                    warn!(camera_id = %camera.id, error = %e, "Failed to list camera streams");
                    report.unreachable_cameras.push(camera.id.clone());
                    continue;
                }
            };

            for state in streams
                .iter()
                .filter(|s| matches!(s.status, StreamStatus::Stopped | StreamStatus::Idle))
            {
                if self.revive(camera, state).await {
                    report.revived.push(state.id.clone());
                } else {
                    report.failed.push(state.id.clone());
                }
            }
        }

        info!(
            cameras = cameras.len(),
            revived = report.revived.len(),
            failed = report.failed.len(),
            keep_alive_ok = report.keep_alive_ok,
            "Watchdog tick complete"
        );
        Ok(report)
    }

    async fn revive(&self, camera: &Camera, state: &StreamState) -> bool {
        debug!(stream_id = %state.id, status = %state.status, "Reviving stream of active camera");

        let result = self.control.restart_stream(&state.id).await;
        let now = self.clock.now();
        let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        record_callback(&self.stores, now, &state.id, Some(&camera.id), "watchdog_restart", outcome).await;

        match result {
            Ok(restarted) => {
                self.logger.log_stream_restart(&state.id, 1, None);
                self.sync_record(&restarted, now).await;
                true
            }
            Err(e) => {
                self.logger.log_stream_restart(&state.id, 1, Some(&e.to_string()));
                false
            }
        }
    }

    /// Mirror the serving layer's new status onto the stored record, if there is one
    async fn sync_record(&self, state: &StreamState, now: DateTime<Utc>) {
        let mut stream = match self.stores.streams.get(&state.id).await {
            Ok(Some(stream)) => stream,
            Ok(None) => return,
            Err(e) => {
                warn!(stream_id = %state.id, error = %e, "Failed to load stream record");
                return;
            }
        };

        stream.status = state.status;
        stream.status_reason = Some("Restarted by watchdog".to_string());
        stream.updated_at = now;
        if let Err(e) = self.stores.streams.update(stream).await {
            warn!(stream_id = %state.id, error = %e, "Failed to persist revived stream");
        }
    }
}

#[async_trait]
impl PeriodicJob for StreamWatchdog {
    fn name(&self) -> &'static str {
        components::STREAM_WATCHDOG
    }

    async fn run_once(&self) -> Result<()> {
        self.run_tick().await.map(|_| ())
    }
}
