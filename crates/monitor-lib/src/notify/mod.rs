//! Notification delivery
//!
//! A notification is always persisted first. External channels are tried
//! afterwards, only for organizations that enabled them, and a channel
//! failure never rolls back the stored record.

mod dispatcher;
mod webhook;

pub use dispatcher::{ChannelFailure, DispatchReport, NotificationDispatcher, NotificationRequest};
pub use webhook::WebhookChannel;

use crate::models::{AlertNotification, Organization};
use anyhow::Result;
use async_trait::async_trait;

/// The caller's identity, when one is known
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
}

/// Resolves the current user and organization for requests that omit them
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn current(&self) -> Result<UserContext>;
}

/// Fixed context, e.g. the service identity the background tasks act as
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    context: UserContext,
}

impl StaticContextProvider {
    pub fn new(context: UserContext) -> Self {
        Self { context }
    }

    /// No ambient identity; recipients must come from the request or the organization
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn current(&self) -> Result<UserContext> {
        Ok(self.context.clone())
    }
}

/// An external delivery channel (webhook, chat, e-mail, ...)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Whether the organization has this channel configured
    fn applies_to(&self, organization: &Organization) -> bool;

    async fn deliver(&self, organization: &Organization, notification: &AlertNotification) -> Result<()>;
}
