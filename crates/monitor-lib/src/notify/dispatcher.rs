//! Notification dispatch
//!
//! Resolution order for the recipient: the request's explicit user, then the
//! current context's user (when it belongs to the same organization), then
//! the organization owner. A request whose organization cannot be resolved
//! fails with [`MonitorError::MissingOrganization`].

use super::{ContextProvider, NotificationChannel, UserContext};
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::models::{AlertNotification, Organization, Severity};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::Stores;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// A rendered alert waiting for a recipient
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub event_id: Option<String>,
    pub anomaly_id: Option<String>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            organization_id: None,
            user_id: None,
            event_id: None,
            anomaly_id: None,
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn for_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFailure {
    pub channel: &'static str,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub notification: AlertNotification,
    pub delivered: Vec<&'static str>,
    pub failed: Vec<ChannelFailure>,
}

/// Persists alert notifications and fans them out to delivery channels
pub struct NotificationDispatcher {
    stores: Stores,
    context: Arc<dyn ContextProvider>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    clock: Arc<dyn Clock>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl NotificationDispatcher {
    pub fn new(stores: Stores, context: Arc<dyn ContextProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            stores,
            context,
            channels: Vec::new(),
            clock,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    /// Add a delivery channel; persistence happens regardless of channels
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Persist a notification, then deliver it to the organization's channels
    pub async fn dispatch(&self, request: NotificationRequest) -> Result<DispatchReport> {
        if request.title.trim().is_empty() {
            return Err(MonitorError::MissingField("title").into());
        }

        let context = if request.organization_id.is_none() || request.user_id.is_none() {
            self.context
                .current()
                .await
                .context("Failed to resolve user context")?
        } else {
            UserContext::default()
        };

        let organization_id = request
            .organization_id
            .clone()
            .or_else(|| context.organization_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or(MonitorError::MissingOrganization)?;

        let organization = match self.stores.organizations.get(&organization_id).await {
            Ok(org) => org,
            Err(e) => {
                warn!(organization_id = %organization_id, error = %e, "Organization lookup failed");
                None
            }
        };

        let user_id = resolve_user(&request, &context, &organization_id, organization.as_ref())
            .ok_or(MonitorError::MissingField("user_id"))?;

        let notification = AlertNotification {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id,
            user_id,
            event_id: request.event_id,
            anomaly_id: request.anomaly_id,
            title: request.title,
            description: request.description,
            severity: request.severity,
            is_read: false,
            read_at: None,
            acknowledged_by: None,
            created_at: self.clock.now(),
        };

        let notification = self
            .stores
            .notifications
            .create(notification)
            .await
            .context("Failed to persist notification")?;
        self.metrics.inc_notifications_created();

        let mut report = DispatchReport {
            notification,
            delivered: Vec::new(),
            failed: Vec::new(),
        };

        match organization.as_ref() {
            Some(org) if org.channels_enabled => self.deliver(org, &mut report).await,
            _ => debug!(
                organization_id = %report.notification.organization_id,
                "External channels not enabled, stored only"
            ),
        }

        self.logger
            .log_notification(&report.notification, report.delivered.len(), report.failed.len());
        Ok(report)
    }

    async fn deliver(&self, organization: &Organization, report: &mut DispatchReport) {
        for channel in self.channels.iter().filter(|c| c.applies_to(organization)) {
            let name = channel.name();
            match channel.deliver(organization, &report.notification).await {
                Ok(()) => {
                    self.metrics.inc_channel_delivery(name, true);
                    report.delivered.push(name);
                }
                Err(e) => {
                    warn!(
                        channel = name,
                        notification_id = %report.notification.id,
                        error = %e,
                        "Channel delivery failed"
                    );
                    self.metrics.inc_channel_delivery(name, false);
                    report.failed.push(ChannelFailure {
                        channel: name,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
    }
}

fn resolve_user(
    request: &NotificationRequest,
    context: &UserContext,
    organization_id: &str,
    organization: Option<&Organization>,
) -> Option<String> {
    let context_user = context
        .user_id
        .clone()
        .filter(|_| context.organization_id.as_deref().map_or(true, |org| org == organization_id));

    request
        .user_id
        .clone()
        .or(context_user)
        .or_else(|| organization.and_then(|org| org.owner_user_id.clone()))
        .filter(|id| !id.trim().is_empty())
}
