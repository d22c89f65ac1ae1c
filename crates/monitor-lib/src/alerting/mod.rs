//! Trigger -> action workflows
//!
//! This module provides:
//! - Signals built from new events and freshly created anomalies
//! - The guardrail applied before any workflow sees a signal
//! - Trigger and action parsing for workflow definitions
//! - The rule engine and its channel-fed worker

mod engine;
mod rules;
mod signal;

#[cfg(test)]
mod tests;

pub use engine::{
    ActionFailure, AlertRuleEngine, EvaluationReport, ResponseActions, StoreResponseActions,
    WorkflowRun,
};
pub use rules::{ActionSpec, TriggerCondition};
pub use signal::{GuardrailPolicy, Rejection, Signal, SignalSource, DEFAULT_MIN_CONFIDENCE};
