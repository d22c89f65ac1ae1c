//! Anomaly and notification lifecycle
//!
//! Anomalies move `active -> acknowledged -> resolved` only on explicit
//! operator action. The detector never resolves a record when the
//! underlying condition clears.
//!
//! Duplicate suppression happens at creation time: a candidate is dropped
//! when an active record already exists for its `(type, entity_id)` pair.
//! The check is a read followed by a create, so two overlapping writers can
//! still race; the store offers no uniqueness constraint to close that gap.

use crate::clock::Clock;
use crate::error::MonitorError;
use crate::models::{AlertNotification, Anomaly, AnomalyStatus};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::{Filter, Stores};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Owns every status transition of anomaly and notification records
///
/// Shared between the detector, the health monitor and the operator API.
pub struct StateTracker {
    stores: Stores,
    clock: Arc<dyn Clock>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl StateTracker {
    /// Tracker reading "now" from `clock` for every stamp it writes
    pub fn new(stores: Stores, clock: Arc<dyn Clock>) -> Self {
        Self {
            stores,
            clock,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    /// Use `logger` for lifecycle records instead of the default instance
    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Every anomaly currently holding an active slot
    ///
    /// Also refreshes the active-anomalies gauge.
    pub async fn active_anomalies(&self) -> Result<Vec<Anomaly>> {
        let active = self
            .stores
            .anomalies
            .filter(&Filter::new().eq("status", AnomalyStatus::Active.as_str()))
            .await
            .context("Failed to fetch active anomalies")?;
        self.metrics.set_active_anomalies(active.len() as i64);
        Ok(active)
    }

    /// Persist `candidate` unless `active` already holds its slot
    ///
    /// Returns `Ok(None)` when suppressed as a duplicate.
    pub async fn open_anomaly(&self, candidate: Anomaly, active: &[Anomaly]) -> Result<Option<Anomaly>> {
        if active
            .iter()
            .any(|a| a.blocks(candidate.anomaly_type, &candidate.entity_id))
        {
            debug!(
                anomaly_type = %candidate.anomaly_type,
                entity_id = %candidate.entity_id,
                "Active anomaly already open, suppressing duplicate"
            );
            return Ok(None);
        }

        let created = self
            .stores
            .anomalies
            .create(candidate)
            .await
            .context("Failed to create anomaly")?;

        self.metrics.inc_anomalies_created(created.anomaly_type.as_str());
        self.logger.log_anomaly_created(&created);
        Ok(Some(created))
    }

    /// Like [`open_anomaly`](Self::open_anomaly), reading the pair's active records first
    pub async fn open_if_absent(&self, candidate: Anomaly) -> Result<Option<Anomaly>> {
        let existing = self
            .stores
            .anomalies
            .filter(
                &Filter::new()
                    .eq("type", candidate.anomaly_type.as_str())
                    .eq("entity_id", candidate.entity_id.as_str())
                    .eq("status", AnomalyStatus::Active.as_str()),
            )
            .await
            .context("Failed to check for an open anomaly")?;
        self.open_anomaly(candidate, &existing).await
    }

    /// `active -> acknowledged`, stamping actor and time
    ///
    /// Already-created records from the same cycle are left untouched.
    pub async fn acknowledge(&self, anomaly_id: &str, by: &str) -> Result<Anomaly> {
        if by.trim().is_empty() {
            return Err(MonitorError::MissingField("acknowledged_by").into());
        }

        let mut anomaly = self.load_anomaly(anomaly_id).await?;
        if anomaly.status != AnomalyStatus::Active {
            return Err(MonitorError::InvalidTransition {
                from: anomaly.status.to_string(),
                to: AnomalyStatus::Acknowledged.to_string(),
            }
            .into());
        }

        anomaly.status = AnomalyStatus::Acknowledged;
        anomaly.acknowledged_by = Some(by.to_string());
        anomaly.acknowledged_at = Some(self.clock.now());

        let updated = self
            .stores
            .anomalies
            .update(anomaly)
            .await
            .context("Failed to persist acknowledgment")?;
        self.logger.log_anomaly_transition(&updated, by);
        Ok(updated)
    }

    /// `active | acknowledged -> resolved`; manual only
    pub async fn resolve(&self, anomaly_id: &str, by: &str) -> Result<Anomaly> {
        if by.trim().is_empty() {
            return Err(MonitorError::MissingField("resolved_by").into());
        }

        let mut anomaly = self.load_anomaly(anomaly_id).await?;
        if anomaly.status == AnomalyStatus::Resolved {
            return Err(MonitorError::InvalidTransition {
                from: anomaly.status.to_string(),
                to: AnomalyStatus::Resolved.to_string(),
            }
            .into());
        }

        let now = self.clock.now();
        if anomaly.status == AnomalyStatus::Active {
            anomaly.acknowledged_by = Some(by.to_string());
            anomaly.acknowledged_at = Some(now);
        }
        anomaly.status = AnomalyStatus::Resolved;
        anomaly.resolved_by = Some(by.to_string());
        anomaly.resolved_at = Some(now);

        let updated = self
            .stores
            .anomalies
            .update(anomaly)
            .await
            .context("Failed to persist resolution")?;
        self.logger.log_anomaly_transition(&updated, by);
        Ok(updated)
    }

    /// Mark a notification read for its recipient. Idempotent: the first read time is kept.
    pub async fn mark_read(&self, notification_id: &str) -> Result<AlertNotification> {
        let mut notification = self.load_notification(notification_id).await?;
        if notification.is_read {
            return Ok(notification);
        }

        notification.is_read = true;
        notification.read_at = Some(self.clock.now());
        self.stores
            .notifications
            .update(notification)
            .await
            .context("Failed to mark notification read")
    }

    /// Record who acknowledged a notification; also marks it read
    pub async fn acknowledge_notification(
        &self,
        notification_id: &str,
        by: &str,
    ) -> Result<AlertNotification> {
        if by.trim().is_empty() {
            return Err(MonitorError::MissingField("acknowledged_by").into());
        }

        let mut notification = self.load_notification(notification_id).await?;
        if !notification.is_read {
            notification.is_read = true;
            notification.read_at = Some(self.clock.now());
        }
        notification.acknowledged_by = Some(by.to_string());

        self.stores
            .notifications
            .update(notification)
            .await
            .context("Failed to acknowledge notification")
    }

    async fn load_anomaly(&self, id: &str) -> Result<Anomaly> {
        self.stores
            .anomalies
            .get(id)
            .await
            .context("Failed to load anomaly")?
            .ok_or_else(|| {
                MonitorError::NotFound {
                    kind: "anomaly",
                    id: id.to_string(),
                }
                .into()
            })
    }

    async fn load_notification(&self, id: &str) -> Result<AlertNotification> {
        self.stores
            .notifications
            .get(id)
            .await
            .context("Failed to load notification")?
            .ok_or_else(|| {
                MonitorError::NotFound {
                    kind: "notification",
                    id: id.to_string(),
                }
                .into()
            })
    }
}
