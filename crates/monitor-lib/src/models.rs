//! Core data models for the monitoring core
//!
//! These mirror the records held by the remote entity API. Field names are
//! the wire names, so they double as filter keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Detection event produced upstream (computer-vision output, door sensor, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub organization_id: Option<String>,
    pub camera_id: Option<String>,
    pub event_type: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Declared operating status of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
    Maintenance,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Active => "active",
            CameraStatus::Inactive => "inactive",
            CameraStatus::Maintenance => "maintenance",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub organization_id: Option<String>,
    pub name: String,
    pub status: CameraStatus,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Stream lifecycle as reported by the stream-serving layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Live,
    Starting,
    Stopped,
    Error,
    Idle,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Live => "live",
            StreamStatus::Starting => "starting",
            StreamStatus::Stopped => "stopped",
            StreamStatus::Error => "error",
            StreamStatus::Idle => "idle",
        }
    }

    /// States a stream should only pass through on its way somewhere else
    pub fn is_transitional(&self) -> bool {
        matches!(self, StreamStatus::Starting | StreamStatus::Error)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource health record for a camera stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub camera_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub status: StreamStatus,
    /// 0 (dead) to 100 (fully healthy)
    pub health_score: f64,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    EventSpike,
    CameraOffline,
    StreamDegraded,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::EventSpike => "event_spike",
            AnomalyType::CameraOffline => "camera_offline",
            AnomalyType::StreamDegraded => "stream_degraded",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AnomalyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyStatus::Active => "active",
            AnomalyStatus::Acknowledged => "acknowledged",
            AnomalyStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetails {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spike_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_since: Option<DateTime<Utc>>,
}

/// Platform anomaly record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub entity_id: String,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub status: AnomalyStatus,
    #[serde(default = "default_anomaly_severity")]
    pub severity: Severity,
    pub details: AnomalyDetails,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

fn default_anomaly_severity() -> Severity {
    Severity::Medium
}

impl Anomaly {
    /// A fresh active anomaly with a new identity
    pub fn open(
        anomaly_type: AnomalyType,
        entity_id: impl Into<String>,
        details: AnomalyDetails,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_type,
            entity_id: entity_id.into(),
            entity_name: None,
            organization_id: None,
            status: AnomalyStatus::Active,
            severity: default_anomaly_severity(),
            details,
            created_at,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn with_entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_organization(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether this record occupies the active slot for `(anomaly_type, entity_id)`
    pub fn blocks(&self, anomaly_type: AnomalyType, entity_id: &str) -> bool {
        self.status == AnomalyStatus::Active
            && self.anomaly_type == anomaly_type
            && self.entity_id == entity_id
    }
}

/// One `{type, params}` entry of a workflow's trigger or action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl FlowStep {
    pub fn new(step_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            step_type: step_type.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub triggers: Vec<FlowStep>,
    #[serde(default)]
    pub actions: Vec<FlowStep>,
}

/// Operator-defined trigger -> action workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertWorkflow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub is_active: bool,
    pub flow_definition: FlowDefinition,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AlertWorkflow {
    /// Copy of this workflow with a new identity and reset lifecycle fields
    pub fn duplicate(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: self.organization_id.clone(),
            name: format!("{} (copy)", self.name),
            is_active: false,
            flow_definition: self.flow_definition.clone(),
            execution_count: 0,
            last_executed_at: None,
            created_at: now,
        }
    }
}

/// In-app alert delivered to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotification {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub anomaly_id: Option<String>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit trail entry for a stream control call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCallbackLog {
    pub id: String,
    pub stream_id: String,
    #[serde(default)]
    pub camera_id: Option<String>,
    pub action: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner_user_id: Option<String>,
    /// External channels are only used when this is set
    #[serde(default)]
    pub channels_enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Operator task opened by a workflow action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    pub priority: Severity,
    pub status: String,
    #[serde(default)]
    pub source_signal_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
