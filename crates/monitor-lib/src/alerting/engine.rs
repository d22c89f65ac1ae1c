//! Alert rule engine
//!
//! Workflows are evaluated independently against each signal that passes
//! the guardrail. A workflow fires when every one of its triggers matches;
//! its actions then run in declared order, each isolated from the others.

use super::{ActionSpec, GuardrailPolicy, Rejection, Signal, TriggerCondition};
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::health::{components, HealthRegistry};
use crate::models::{AlertWorkflow, Severity, Task};
use crate::notify::{NotificationDispatcher, NotificationRequest};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::{Filter, Stores};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Collaborators for actions that leave the monitoring core
#[async_trait]
pub trait ResponseActions: Send + Sync {
    async fn create_task(&self, task: Task) -> Result<Task>;

    async fn lockdown(&self, organization_id: &str, camera_ids: &[String], signal: &Signal) -> Result<()>;
}

/// Persists tasks to the entity store. Has no lockdown integration.
pub struct StoreResponseActions {
    stores: Stores,
}

impl StoreResponseActions {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl ResponseActions for StoreResponseActions {
    async fn create_task(&self, task: Task) -> Result<Task> {
        self.stores.tasks.create(task).await.context("Failed to create task")
    }

    async fn lockdown(&self, organization_id: &str, camera_ids: &[String], _signal: &Signal) -> Result<()> {
        anyhow::bail!(
            "no lockdown integration configured (organization {}, cameras {:?})",
            organization_id,
            camera_ids
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    pub index: usize,
    pub action: String,
    pub error: String,
}

/// One fired workflow
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub actions_run: usize,
    pub failures: Vec<ActionFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    /// Set when the guardrail dropped the signal
    pub rejected: Option<Rejection>,
    pub evaluated: usize,
    pub fired: Vec<WorkflowRun>,
}

/// Evaluates active workflows against incoming signals
pub struct AlertRuleEngine {
    stores: Stores,
    dispatcher: Arc<NotificationDispatcher>,
    responses: Arc<dyn ResponseActions>,
    clock: Arc<dyn Clock>,
    guardrail: GuardrailPolicy,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl AlertRuleEngine {
    pub fn new(
        stores: Stores,
        dispatcher: Arc<NotificationDispatcher>,
        responses: Arc<dyn ResponseActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stores,
            dispatcher,
            responses,
            clock,
            guardrail: GuardrailPolicy::default(),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_guardrail(mut self, guardrail: GuardrailPolicy) -> Self {
        self.guardrail = guardrail;
        self
    }

    /// Evaluate every active workflow of the signal's organization
    pub async fn handle_signal(&self, signal: &Signal) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();

        if let Err(rejection) = self.guardrail.check(signal) {
            debug!(signal_id = %signal.id, reason = ?rejection, "Signal rejected by guardrail");
            report.rejected = Some(rejection);
            return Ok(report);
        }
        let organization_id = signal
            .organization_id
            .as_deref()
            .ok_or(MonitorError::MissingOrganization)?;

        let workflows = self
            .stores
            .workflows
            .filter(
                &Filter::new()
                    .eq("organization_id", organization_id)
                    .eq("is_active", true),
            )
            .await
            .context("Failed to fetch active workflows")?;

        for workflow in workflows {
            report.evaluated += 1;
            if self.evaluate(&workflow, signal) {
                report.fired.push(self.execute(workflow, signal).await);
            }
        }

        Ok(report)
    }

    /// Whether every trigger of `workflow` holds for `signal`
    ///
    /// Inactive workflows, workflows of other organizations, workflows
    /// without triggers and workflows with an unparseable trigger never match.
    pub fn evaluate(&self, workflow: &AlertWorkflow, signal: &Signal) -> bool {
        if !workflow.is_active
            || signal.organization_id.as_deref() != Some(workflow.organization_id.as_str())
        {
            return false;
        }

        let triggers = &workflow.flow_definition.triggers;
        if triggers.is_empty() {
            return false;
        }

        for step in triggers {
            match TriggerCondition::parse(step) {
                Ok(trigger) if trigger.matches(signal) => continue,
                Ok(_) => return false,
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "Workflow has an invalid trigger");
                    return false;
                }
            }
        }
        true
    }

    /// Run the workflow's actions in order and count the run
    pub async fn execute(&self, workflow: AlertWorkflow, signal: &Signal) -> WorkflowRun {
        let mut run = WorkflowRun {
            workflow_id: workflow.id.clone(),
            actions_run: 0,
            failures: Vec::new(),
        };

        for (index, step) in workflow.flow_definition.actions.iter().enumerate() {
            run.actions_run += 1;
            let outcome = match ActionSpec::parse(step) {
                Ok(action) => self.run_action(&action, signal).await,
                Err(e) => Err(e.into()),
            };

            if let Err(e) = outcome {
                warn!(
                    workflow_id = %workflow.id,
                    action = %step.step_type,
                    index,
                    error = %e,
                    "Workflow action failed"
                );
                self.metrics.inc_action_failures(&step.step_type);
                run.failures.push(ActionFailure {
                    index,
                    action: step.step_type.clone(),
                    error: format!("{:#}", e),
                });
            }
        }

        self.record_execution(&workflow).await;
        self.metrics.inc_workflow_executions();
        self.logger.log_workflow_fired(
            &workflow.id,
            &workflow.name,
            &signal.id,
            run.actions_run,
            run.failures.len(),
        );
        run
    }

    async fn run_action(&self, action: &ActionSpec, signal: &Signal) -> Result<()> {
        let organization_id = signal
            .organization_id
            .clone()
            .ok_or(MonitorError::MissingOrganization)?;

        match action {
            ActionSpec::Notify { title, user_id } => {
                let mut request = self.request_for(signal, signal.severity).for_organization(organization_id);
                if let Some(title) = title {
                    request.title = title.clone();
                }
                request.user_id = user_id.clone();
                self.dispatcher.dispatch(request).await.map(|_| ())
            }
            ActionSpec::CreateTask {
                title,
                assignee_id,
                priority,
            } => {
                let task = Task {
                    id: uuid::Uuid::new_v4().to_string(),
                    organization_id,
                    title: title
                        .clone()
                        .unwrap_or_else(|| format!("Investigate: {}", signal.title)),
                    description: signal.description.clone(),
                    assignee_id: assignee_id.clone(),
                    priority: priority.unwrap_or(signal.severity),
                    status: "open".to_string(),
                    source_signal_id: Some(signal.id.clone()),
                    created_at: self.clock.now(),
                };
                self.responses.create_task(task).await.map(|_| ())
            }
            ActionSpec::Escalate { severity } => {
                let owner = self
                    .stores
                    .organizations
                    .get(&organization_id)
                    .await
                    .context("Failed to load organization")?
                    .and_then(|org| org.owner_user_id)
                    .ok_or(MonitorError::MissingField("owner_user_id"))?;

                let mut request = self
                    .request_for(signal, *severity)
                    .for_organization(organization_id)
                    .for_user(owner);
                request.title = format!("Escalated: {}", signal.title);
                self.dispatcher.dispatch(request).await.map(|_| ())
            }
            ActionSpec::Lockdown { camera_ids } => {
                let targets: Vec<String> = if camera_ids.is_empty() {
                    signal.camera_id.iter().cloned().collect()
                } else {
                    camera_ids.clone()
                };
                if targets.is_empty() {
                    return Err(MonitorError::InvalidAction("lockdown without a camera".to_string()).into());
                }
                self.responses.lockdown(&organization_id, &targets, signal).await
            }
        }
    }

    fn request_for(&self, signal: &Signal, severity: Severity) -> NotificationRequest {
        let mut request = NotificationRequest::new(signal.title.clone(), signal.description.clone(), severity);
        request.event_id = signal.event_id().map(str::to_string);
        request.anomaly_id = signal.anomaly_id().map(str::to_string);
        request
    }

    /// Bump the counter on the freshest copy available
    async fn record_execution(&self, fired: &AlertWorkflow) {
        let mut workflow = match self.stores.workflows.get(&fired.id).await {
            Ok(Some(latest)) => latest,
            _ => fired.clone(),
        };
        workflow.execution_count += 1;
        workflow.last_executed_at = Some(self.clock.now());

        if let Err(e) = self.stores.workflows.update(workflow).await {
            warn!(workflow_id = %fired.id, error = %e, "Failed to record workflow execution");
        }
    }

    /// Copy a workflow as a new, inactive workflow with a zero execution count
    pub async fn clone_workflow(&self, workflow_id: &str) -> Result<AlertWorkflow> {
        let source = self.load_workflow(workflow_id).await?;
        let copy = source.duplicate(self.clock.now());
        let created = self
            .stores
            .workflows
            .create(copy)
            .await
            .context("Failed to create workflow copy")?;

        info!(source_id = %workflow_id, workflow_id = %created.id, "Workflow cloned");
        Ok(created)
    }

    /// Move a workflow between `inactive` and `active`
    pub async fn set_active(&self, workflow_id: &str, active: bool) -> Result<AlertWorkflow> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.is_active == active {
            return Ok(workflow);
        }

        workflow.is_active = active;
        let updated = self
            .stores
            .workflows
            .update(workflow)
            .await
            .context("Failed to update workflow")?;

        info!(workflow_id = %workflow_id, is_active = active, "Workflow activation changed");
        Ok(updated)
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<AlertWorkflow> {
        self.stores
            .workflows
            .get(workflow_id)
            .await
            .context("Failed to load workflow")?
            .ok_or_else(|| {
                MonitorError::NotFound {
                    kind: "workflow",
                    id: workflow_id.to_string(),
                }
                .into()
            })
    }

    /// Consume signals until the channel closes or shutdown is signalled
    pub async fn run(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<Signal>,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting rule engine worker");
        health.register(components::RULE_ENGINE).await;

        loop {
            tokio::select! {
                received = signals.recv() => {
                    let Some(signal) = received else {
                        info!("Signal channel closed, stopping rule engine worker");
                        break;
                    };

                    match self.handle_signal(&signal).await {
                        Ok(report) => {
                            debug!(
                                signal_id = %signal.id,
                                evaluated = report.evaluated,
                                fired = report.fired.len(),
                                "Signal evaluated"
                            );
                            health.set_healthy(components::RULE_ENGINE).await;
                        }
                        Err(e) => {
                            warn!(signal_id = %signal.id, error = %e, "Signal evaluation failed");
                            health
                                .set_degraded(components::RULE_ENGINE, e.to_string())
                                .await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down rule engine worker");
                    break;
                }
            }
        }
    }
}
