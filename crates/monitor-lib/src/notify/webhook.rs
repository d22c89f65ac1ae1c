//! Webhook notification channel
//!
//! Delivers each stored notification as a JSON POST to the URL the
//! organization configured. Non-2xx responses count as failed deliveries.

use super::NotificationChannel;
use crate::models::{AlertNotification, Organization, Severity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    notification_id: &'a str,
    organization_id: &'a str,
    user_id: &'a str,
    title: &'a str,
    description: &'a str,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anomaly_id: Option<&'a str>,
    created_at: DateTime<Utc>,
}

/// POSTs the rendered notification as JSON to the organization's webhook URL
pub struct WebhookChannel {
    client: Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn applies_to(&self, organization: &Organization) -> bool {
        organization
            .webhook_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    async fn deliver(&self, organization: &Organization, notification: &AlertNotification) -> Result<()> {
        let url = organization
            .webhook_url
            .as_deref()
            .context("Organization has no webhook configured")?;

        let payload = WebhookPayload {
            notification_id: &notification.id,
            organization_id: &notification.organization_id,
            user_id: &notification.user_id,
            title: &notification.title,
            description: &notification.description,
            severity: notification.severity,
            event_id: notification.event_id.as_deref(),
            anomaly_id: notification.anomaly_id.as_deref(),
            created_at: notification.created_at,
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook rejected notification ({}): {}", status, body);
        }

        Ok(())
    }
}
