//! Stream health and self-healing
//!
//! This module provides:
//! - A client for the stream-serving control API (token cache, re-auth on 401)
//! - The periodic health monitor (health check, keep-alive, stale-state cleanup)
//! - The watchdog that revives stopped streams of active cameras

mod client;
mod monitor;
mod watchdog;

#[cfg(test)]
mod tests;

pub use client::{StreamApiClient, StreamApiConfig};
pub use monitor::{
    CleanupSummary, HealthCheckSummary, HealthMonitorConfig, KeepAliveSummary, MonitorReport,
    StreamHealthMonitor, SubTaskFailure,
};
pub use watchdog::{StreamWatchdog, WatchdogConfig, WatchdogReport};

use crate::error::StreamApiError;
use crate::models::{StreamCallbackLog, StreamStatus};
use crate::store::Stores;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stream state as reported by the serving layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub id: String,
    #[serde(default)]
    pub camera_id: Option<String>,
    pub status: StreamStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Control surface of the stream-serving layer
#[async_trait]
pub trait StreamControl: Send + Sync {
    async fn stream_status(&self, stream_id: &str) -> Result<StreamState, StreamApiError>;

    async fn streams_for_camera(&self, camera_id: &str) -> Result<Vec<StreamState>, StreamApiError>;

    /// Ask the serving layer to (re)start a stream
    async fn restart_stream(&self, stream_id: &str) -> Result<StreamState, StreamApiError>;

    async fn keep_alive(&self) -> Result<(), StreamApiError>;
}

/// Append an audit entry for a control call. A failed write is logged, never raised.
pub(crate) async fn record_callback(
    stores: &Stores,
    at: DateTime<Utc>,
    stream_id: &str,
    camera_id: Option<&str>,
    action: &str,
    outcome: Result<(), String>,
) {
    let (success, message) = match outcome {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e)),
    };

    let entry = StreamCallbackLog {
        id: uuid::Uuid::new_v4().to_string(),
        stream_id: stream_id.to_string(),
        camera_id: camera_id.map(str::to_string),
        action: action.to_string(),
        success,
        message,
        created_at: at,
    };

    if let Err(e) = stores.callback_logs.create(entry).await {
        warn!(stream_id = %stream_id, action = %action, error = %e, "Failed to record stream callback");
    }
}
