//! Trigger and action vocabulary for alert workflows
//!
//! Workflows store their steps as loose `{type, params}` documents. These
//! are parsed on every evaluation so a malformed step only disables the
//! workflow it belongs to.

use super::{Signal, SignalSource};
use crate::error::MonitorError;
use crate::models::{FlowStep, Severity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerCondition {
    SeverityAtLeast(Severity),
    ConfidenceAtLeast(f64),
    /// Matches event signals whose type is listed
    EventType(Vec<String>),
    /// Matches anomaly signals whose type is listed
    AnomalyType(Vec<String>),
    Camera(Vec<String>),
}

#[derive(Deserialize)]
struct SeverityParams {
    severity: String,
}

#[derive(Deserialize)]
struct ConfidenceParams {
    min: f64,
}

#[derive(Deserialize)]
struct TypesParams {
    types: Vec<String>,
}

#[derive(Deserialize)]
struct CameraParams {
    camera_ids: Vec<String>,
}

fn params<T: DeserializeOwned>(step: &FlowStep, wrap: fn(String) -> MonitorError) -> Result<T, MonitorError> {
    let value = if step.params.is_null() {
        Value::Object(Default::default())
    } else {
        step.params.clone()
    };
    serde_json::from_value(value).map_err(|e| wrap(format!("{}: {}", step.step_type, e)))
}

fn parse_severity(raw: &str, wrap: fn(String) -> MonitorError) -> Result<Severity, MonitorError> {
    raw.parse::<Severity>().map_err(wrap)
}

fn non_empty(list: Vec<String>, step: &FlowStep) -> Result<Vec<String>, MonitorError> {
    if list.is_empty() {
        return Err(MonitorError::InvalidTrigger(format!(
            "{}: list must not be empty",
            step.step_type
        )));
    }
    Ok(list)
}

impl TriggerCondition {
    pub fn parse(step: &FlowStep) -> Result<Self, MonitorError> {
        let wrap = MonitorError::InvalidTrigger;
        match step.step_type.as_str() {
            "severity_at_least" => {
                let p: SeverityParams = params(step, wrap)?;
                Ok(Self::SeverityAtLeast(parse_severity(&p.severity, wrap)?))
            }
            "confidence_at_least" => {
                let p: ConfidenceParams = params(step, wrap)?;
                if !(0.0..=1.0).contains(&p.min) {
                    return Err(wrap(format!("confidence_at_least: {} outside 0..=1", p.min)));
                }
                Ok(Self::ConfidenceAtLeast(p.min))
            }
            "event_type" => {
                let p: TypesParams = params(step, wrap)?;
                Ok(Self::EventType(non_empty(p.types, step)?))
            }
            "anomaly_type" => {
                let p: TypesParams = params(step, wrap)?;
                Ok(Self::AnomalyType(non_empty(p.types, step)?))
            }
            "camera" => {
                let p: CameraParams = params(step, wrap)?;
                Ok(Self::Camera(non_empty(p.camera_ids, step)?))
            }
            other => Err(wrap(format!("unknown trigger type '{}'", other))),
        }
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        match self {
            Self::SeverityAtLeast(min) => signal.severity >= *min,
            Self::ConfidenceAtLeast(min) => signal.confidence >= *min,
            Self::EventType(types) => {
                signal.source == SignalSource::Event && types.iter().any(|t| t == &signal.kind)
            }
            Self::AnomalyType(types) => {
                signal.source == SignalSource::Anomaly && types.iter().any(|t| t == &signal.kind)
            }
            Self::Camera(ids) => signal
                .camera_id
                .as_ref()
                .is_some_and(|camera| ids.contains(camera)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    Notify {
        title: Option<String>,
        user_id: Option<String>,
    },
    CreateTask {
        title: Option<String>,
        assignee_id: Option<String>,
        priority: Option<Severity>,
    },
    /// Notify the organization owner at a raised severity
    Escalate { severity: Severity },
    /// Empty means the signal's own camera
    Lockdown { camera_ids: Vec<String> },
}

#[derive(Deserialize)]
struct NotifyParams {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct TaskParams {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    assignee_id: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Deserialize)]
struct EscalateParams {
    #[serde(default)]
    severity: Option<String>,
}

#[derive(Deserialize)]
struct LockdownParams {
    #[serde(default)]
    camera_ids: Vec<String>,
}

impl ActionSpec {
    pub fn parse(step: &FlowStep) -> Result<Self, MonitorError> {
        let wrap = MonitorError::InvalidAction;
        match step.step_type.as_str() {
            "notify" => {
                let p: NotifyParams = params(step, wrap)?;
                Ok(Self::Notify {
                    title: p.title,
                    user_id: p.user_id,
                })
            }
            "create_task" => {
                let p: TaskParams = params(step, wrap)?;
                let priority = p
                    .priority
                    .as_deref()
                    .map(|raw| parse_severity(raw, wrap))
                    .transpose()?;
                Ok(Self::CreateTask {
                    title: p.title,
                    assignee_id: p.assignee_id,
                    priority,
                })
            }
            "escalate" => {
                let p: EscalateParams = params(step, wrap)?;
                let severity = match p.severity.as_deref() {
                    Some(raw) => parse_severity(raw, wrap)?,
                    None => Severity::Critical,
                };
                Ok(Self::Escalate { severity })
            }
            "lockdown" => {
                let p: LockdownParams = params(step, wrap)?;
                Ok(Self::Lockdown {
                    camera_ids: p.camera_ids,
                })
            }
            other => Err(wrap(format!("unknown action type '{}'", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::CreateTask { .. } => "create_task",
            Self::Escalate { .. } => "escalate",
            Self::Lockdown { .. } => "lockdown",
        }
    }
}
