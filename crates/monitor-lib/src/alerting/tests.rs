//! Rule engine scenarios against in-memory stores

use super::*;
use crate::clock::ManualClock;
use crate::error::MonitorError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{AlertWorkflow, Event, FlowDefinition, FlowStep, Organization, Severity};
use crate::notify::{NotificationDispatcher, StaticContextProvider};
use crate::store::{Filter, Stores};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 20, 23, 10, 0).unwrap()
}

struct Harness {
    stores: Stores,
    engine: Arc<AlertRuleEngine>,
}

impl Harness {
    async fn new() -> Self {
        let stores = Stores::in_memory();
        stores
            .organizations
            .create(Organization {
                id: "org-1".to_string(),
                name: "Northside Depot".to_string(),
                owner_user_id: Some("owner-1".to_string()),
                channels_enabled: false,
                webhook_url: None,
            })
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(now()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            stores.clone(),
            Arc::new(StaticContextProvider::anonymous()),
            clock.clone(),
        ));
        let engine = AlertRuleEngine::new(
            stores.clone(),
            dispatcher,
            Arc::new(StoreResponseActions::new(stores.clone())),
            clock,
        );

        Self {
            stores,
            engine: Arc::new(engine),
        }
    }

    async fn add_workflow(&self, id: &str, active: bool, triggers: Vec<FlowStep>, actions: Vec<FlowStep>) {
        self.stores
            .workflows
            .create(AlertWorkflow {
                id: id.to_string(),
                organization_id: "org-1".to_string(),
                name: format!("Workflow {}", id),
                is_active: active,
                flow_definition: FlowDefinition { triggers, actions },
                execution_count: 0,
                last_executed_at: None,
                created_at: now(),
            })
            .await
            .unwrap();
    }

    async fn workflow(&self, id: &str) -> AlertWorkflow {
        self.stores.workflows.get(id).await.unwrap().unwrap()
    }

    async fn notification_count(&self) -> usize {
        self.stores.notifications.list().await.unwrap().len()
    }
}

fn high_or_above() -> Vec<FlowStep> {
    vec![FlowStep::new("severity_at_least", json!({"severity": "high"}))]
}

fn notify() -> Vec<FlowStep> {
    vec![FlowStep::new("notify", json!({}))]
}

fn event_signal(severity: Severity, camera_id: &str) -> Signal {
    Signal::from(&Event {
        id: format!("evt-{}", severity),
        organization_id: Some("org-1".to_string()),
        camera_id: Some(camera_id.to_string()),
        event_type: "intrusion".to_string(),
        severity,
        confidence: 0.9,
        title: Some("Intrusion at east gate".to_string()),
        description: Some("Person climbing fence".to_string()),
        created_at: now(),
    })
}

#[tokio::test]
async fn test_severity_threshold_workflow() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-1", true, high_or_above(), notify()).await;

    let medium = harness
        .engine
        .handle_signal(&event_signal(Severity::Medium, "cam-1"))
        .await
        .unwrap();
    assert_eq!(medium.evaluated, 1);
    assert!(medium.fired.is_empty());
    assert_eq!(harness.workflow("wf-1").await.execution_count, 0);
    assert_eq!(harness.notification_count().await, 0);

    let critical = harness
        .engine
        .handle_signal(&event_signal(Severity::Critical, "cam-1"))
        .await
        .unwrap();
    assert_eq!(critical.fired.len(), 1);
    assert!(critical.fired[0].failures.is_empty());

    let workflow = harness.workflow("wf-1").await;
    assert_eq!(workflow.execution_count, 1);
    assert_eq!(workflow.last_executed_at, Some(now()));

    let notifications = harness.stores.notifications.list().await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, "owner-1");
    assert_eq!(notifications[0].title, "Intrusion at east gate");
    assert_eq!(notifications[0].event_id.as_deref(), Some("evt-critical"));
    assert_eq!(notifications[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_all_triggers_must_hold() {
    let harness = Harness::new().await;
    let mut triggers = high_or_above();
    triggers.push(FlowStep::new("camera", json!({"camera_ids": ["cam-1"]})));
    harness.add_workflow("wf-1", true, triggers, notify()).await;

    let other_camera = harness
        .engine
        .handle_signal(&event_signal(Severity::Critical, "cam-2"))
        .await
        .unwrap();
    let same_camera = harness
        .engine
        .handle_signal(&event_signal(Severity::Critical, "cam-1"))
        .await
        .unwrap();

    assert!(other_camera.fired.is_empty());
    assert_eq!(same_camera.fired.len(), 1);
}

#[tokio::test]
async fn test_workflows_fire_independently() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-high", true, high_or_above(), notify()).await;
    harness
        .add_workflow(
            "wf-intrusion",
            true,
            vec![FlowStep::new("event_type", json!({"types": ["intrusion"]}))],
            vec![FlowStep::new("create_task", json!({"assignee_id": "guard-3"}))],
        )
        .await;

    let report = harness
        .engine
        .handle_signal(&event_signal(Severity::Medium, "cam-1"))
        .await
        .unwrap();

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.fired.len(), 1);
    assert_eq!(report.fired[0].workflow_id, "wf-intrusion");

    let tasks = harness.stores.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].assignee_id.as_deref(), Some("guard-3"));
    assert_eq!(tasks[0].priority, Severity::Medium);
    assert_eq!(tasks[0].source_signal_id.as_deref(), Some("evt-medium"));
}

#[tokio::test]
async fn test_failed_action_does_not_block_the_rest() {
    let harness = Harness::new().await;
    harness
        .add_workflow(
            "wf-1",
            true,
            high_or_above(),
            vec![
                FlowStep::new("lockdown", json!({})),
                FlowStep::new("teleport", json!({})),
                FlowStep::new("notify", json!({"title": "Gate breach"})),
                FlowStep::new("create_task", json!({})),
            ],
        )
        .await;

    let report = harness
        .engine
        .handle_signal(&event_signal(Severity::High, "cam-1"))
        .await
        .unwrap();

    let run = &report.fired[0];
    assert_eq!(run.actions_run, 4);
    assert_eq!(run.failures.len(), 2);
    assert_eq!(run.failures[0].action, "lockdown");
    assert_eq!(run.failures[1].index, 1);

    let notifications = harness.stores.notifications.list().await.unwrap();
    assert_eq!(notifications[0].title, "Gate breach");
    assert_eq!(harness.stores.tasks.list().await.unwrap().len(), 1);
    assert_eq!(harness.workflow("wf-1").await.execution_count, 1);
}

#[tokio::test]
async fn test_escalate_notifies_owner_at_raised_severity() {
    let harness = Harness::new().await;
    harness
        .add_workflow(
            "wf-1",
            true,
            high_or_above(),
            vec![FlowStep::new("escalate", json!({}))],
        )
        .await;

    harness
        .engine
        .handle_signal(&event_signal(Severity::High, "cam-1"))
        .await
        .unwrap();

    let notifications = harness.stores.notifications.list().await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, "owner-1");
    assert_eq!(notifications[0].severity, Severity::Critical);
    assert!(notifications[0].title.starts_with("Escalated: "));
}

#[tokio::test]
async fn test_guardrail_drops_noisy_signal() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-1", true, vec![], notify()).await;
    let mut signal = event_signal(Severity::Critical, "cam-1");
    signal.confidence = 0.4;

    let report = harness.engine.handle_signal(&signal).await.unwrap();

    assert_eq!(report.rejected, Some(Rejection::LowConfidence(0.4)));
    assert_eq!(report.evaluated, 0);
}

#[tokio::test]
async fn test_workflows_that_never_fire() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-empty", true, vec![], notify()).await;
    harness
        .add_workflow(
            "wf-broken",
            true,
            vec![FlowStep::new("severity_at_least", json!({"level": 3}))],
            notify(),
        )
        .await;
    harness.add_workflow("wf-off", false, high_or_above(), notify()).await;

    let report = harness
        .engine
        .handle_signal(&event_signal(Severity::Critical, "cam-1"))
        .await
        .unwrap();

    assert_eq!(report.evaluated, 2);
    assert!(report.fired.is_empty());
    assert_eq!(harness.notification_count().await, 0);
}

#[tokio::test]
async fn test_set_active_toggles_evaluation() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-1", false, high_or_above(), notify()).await;

    let activated = harness.engine.set_active("wf-1", true).await.unwrap();
    assert!(activated.is_active);

    let report = harness
        .engine
        .handle_signal(&event_signal(Severity::High, "cam-1"))
        .await
        .unwrap();
    assert_eq!(report.fired.len(), 1);

    harness.engine.set_active("wf-1", false).await.unwrap();
    let report = harness
        .engine
        .handle_signal(&event_signal(Severity::High, "cam-1"))
        .await
        .unwrap();
    assert_eq!(report.evaluated, 0);
}

#[tokio::test]
async fn test_clone_resets_lifecycle() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-1", true, high_or_above(), notify()).await;
    harness
        .engine
        .handle_signal(&event_signal(Severity::Critical, "cam-1"))
        .await
        .unwrap();

    let copy = harness.engine.clone_workflow("wf-1").await.unwrap();

    assert_ne!(copy.id, "wf-1");
    assert!(!copy.is_active);
    assert_eq!(copy.execution_count, 0);
    assert!(copy.last_executed_at.is_none());
    assert_eq!(copy.flow_definition, harness.workflow("wf-1").await.flow_definition);
    assert_eq!(harness.workflow("wf-1").await.execution_count, 1);

    let stored = harness
        .stores
        .workflows
        .filter(&Filter::new().eq("organization_id", "org-1"))
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_clone_unknown_workflow() {
    let harness = Harness::new().await;

    let err = harness.engine.clone_workflow("wf-missing").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MonitorError>(),
        Some(MonitorError::NotFound { kind: "workflow", .. })
    ));
}

#[tokio::test]
async fn test_worker_consumes_until_channel_closes() {
    let harness = Harness::new().await;
    harness.add_workflow("wf-1", true, high_or_above(), notify()).await;
    let health = HealthRegistry::new();
    let (tx, rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tx.send(event_signal(Severity::Critical, "cam-1")).await.unwrap();
    tx.send(event_signal(Severity::Low, "cam-1")).await.unwrap();
    drop(tx);

    harness
        .engine
        .clone()
        .run(rx, health.clone(), shutdown_rx)
        .await;

    assert_eq!(harness.workflow("wf-1").await.execution_count, 1);
    let component = health.component(components::RULE_ENGINE).await.unwrap();
    assert_eq!(component.status, ComponentStatus::Healthy);
}
