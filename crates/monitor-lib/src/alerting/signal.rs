//! Signals evaluated by the rule engine

use crate::models::{Anomaly, AnomalyType, Event, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum confidence a signal needs before any workflow sees it
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Event,
    Anomaly,
}

/// A new event or freshly created anomaly, normalized for trigger matching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Id of the originating event or anomaly
    pub id: String,
    pub source: SignalSource,
    pub organization_id: Option<String>,
    /// Event type, or the anomaly type name
    pub kind: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub camera_id: Option<String>,
    pub title: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

impl Signal {
    /// Anomalies are system-detected, so they carry full confidence
    pub fn from_anomaly(anomaly: &Anomaly) -> Self {
        let camera_id = match anomaly.anomaly_type {
            AnomalyType::EventSpike | AnomalyType::CameraOffline => Some(anomaly.entity_id.clone()),
            AnomalyType::StreamDegraded => None,
        };
        let subject = anomaly.entity_name.as_deref().unwrap_or(&anomaly.entity_id);

        Self {
            id: anomaly.id.clone(),
            source: SignalSource::Anomaly,
            organization_id: anomaly.organization_id.clone(),
            kind: anomaly.anomaly_type.as_str().to_string(),
            severity: anomaly.severity,
            confidence: 1.0,
            camera_id,
            title: format!("{}: {}", anomaly.anomaly_type, subject),
            description: anomaly.details.message.clone(),
            occurred_at: anomaly.created_at,
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        (self.source == SignalSource::Event).then_some(self.id.as_str())
    }

    pub fn anomaly_id(&self) -> Option<&str> {
        (self.source == SignalSource::Anomaly).then_some(self.id.as_str())
    }
}

impl From<&Event> for Signal {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            source: SignalSource::Event,
            organization_id: event.organization_id.clone(),
            kind: event.event_type.clone(),
            severity: event.severity,
            confidence: event.confidence,
            camera_id: event.camera_id.clone(),
            title: event
                .title
                .clone()
                .unwrap_or_else(|| format!("{} detected", event.event_type)),
            description: event.description.clone().unwrap_or_default(),
            occurred_at: event.created_at,
        }
    }
}

/// Why a signal was dropped before workflow evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoOrganization,
    LowConfidence(f64),
    LowSeverity(Severity),
}

/// Volume bound applied to every signal before evaluation
#[derive(Debug, Clone)]
pub struct GuardrailPolicy {
    pub min_confidence: f64,
    pub min_severity: Severity,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_severity: Severity::Medium,
        }
    }
}

impl GuardrailPolicy {
    pub fn check(&self, signal: &Signal) -> Result<(), Rejection> {
        if signal
            .organization_id
            .as_deref()
            .map_or(true, |org| org.trim().is_empty())
        {
            return Err(Rejection::NoOrganization);
        }
        if signal.confidence < self.min_confidence {
            return Err(Rejection::LowConfidence(signal.confidence));
        }
        if signal.severity < self.min_severity {
            return Err(Rejection::LowSeverity(signal.severity));
        }
        Ok(())
    }
}
