//! Camera heartbeat staleness

use crate::clock::span;
use crate::models::{AnomalyDetails, Camera, CameraStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default heartbeat age before a camera counts as offline (5 minutes)
pub const DEFAULT_OFFLINE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct OfflineDetector {
    pub threshold: Duration,
}

impl OfflineDetector {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Flag a camera declared active whose heartbeat is missing or too old
    pub fn detect(&self, camera: &Camera, now: DateTime<Utc>) -> Option<OfflineAnomaly> {
        if camera.status != CameraStatus::Active {
            return None;
        }

        let stale = match camera.last_heartbeat {
            None => true,
            Some(heartbeat) => now - heartbeat > span(self.threshold),
        };

        stale.then(|| OfflineAnomaly {
            camera_id: camera.id.clone(),
            camera_name: camera.name.clone(),
            organization_id: camera.organization_id.clone(),
            last_heartbeat: camera.last_heartbeat,
        })
    }
}

impl Default for OfflineDetector {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_THRESHOLD)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineAnomaly {
    pub camera_id: String,
    pub camera_name: String,
    pub organization_id: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl OfflineAnomaly {
    pub fn message(&self) -> String {
        match self.last_heartbeat {
            Some(heartbeat) => format!(
                "Camera '{}' ({}) has not sent a heartbeat since {}",
                self.camera_name,
                self.camera_id,
                heartbeat.to_rfc3339()
            ),
            None => format!(
                "Camera '{}' ({}) has never reported a heartbeat",
                self.camera_name, self.camera_id
            ),
        }
    }

    pub fn details(&self) -> AnomalyDetails {
        AnomalyDetails {
            message: self.message(),
            offline_since: self.last_heartbeat,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap()
    }

    fn camera(status: CameraStatus, heartbeat_secs_ago: Option<i64>) -> Camera {
        Camera {
            id: "cam-7".to_string(),
            organization_id: Some("org-1".to_string()),
            name: "Loading Dock".to_string(),
            status,
            last_heartbeat: heartbeat_secs_ago.map(|s| now() - chrono::Duration::seconds(s)),
        }
    }

    #[test]
    fn test_missing_heartbeat_is_offline() {
        let detector = OfflineDetector::default();
        let anomaly = detector
            .detect(&camera(CameraStatus::Active, None), now())
            .unwrap();

        assert!(anomaly.message().contains("never reported"));
        assert!(anomaly.details().offline_since.is_none());
    }

    #[test]
    fn test_threshold_boundary() {
        let detector = OfflineDetector::default();

        assert!(detector.detect(&camera(CameraStatus::Active, Some(300)), now()).is_none());
        assert!(detector.detect(&camera(CameraStatus::Active, Some(301)), now()).is_some());
    }

    #[test]
    fn test_inactive_cameras_ignored() {
        let detector = OfflineDetector::default();

        assert!(detector.detect(&camera(CameraStatus::Inactive, None), now()).is_none());
        assert!(detector
            .detect(&camera(CameraStatus::Maintenance, Some(86_400)), now())
            .is_none());
    }

    #[test]
    fn test_message_names_camera() {
        let anomaly = OfflineDetector::default()
            .detect(&camera(CameraStatus::Active, Some(360)), now())
            .unwrap();

        assert!(anomaly.message().contains("Loading Dock"));
        assert!(anomaly.message().contains("cam-7"));
    }
}
