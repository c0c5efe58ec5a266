//! # Stage Runner
//!
//! Executes one node of a stage graph against the current execution context.
//!
//! Running a stage is safe to repeat. Before creating work the runner looks at
//! the newest task of the stage's type for this workflow:
//!
//! - completed: its result is adopted and no new task is created
//! - pending, running or retrying: the runner waits on it instead of
//!   dispatching a duplicate, first resubmitting it if it never reached a worker
//! - failed with retry budget left: the task is retried
//! - otherwise a fresh task is created for a newly selected agent
//!
//! A stage whose worker has not reported yet returns the context without
//! marking the stage complete; the executor turns that into an interruption.

use super::dispatch::{DispatchOutcome, WorkerDispatch};
use super::stage_graph::StageNode;
use crate::constants::events;
use crate::error::{OrchestratorError, Result};
use crate::logging::log_task_operation;
use crate::models::{Agent, ExecutionContext, JsonMap, StageKind, StageResult, Task, TaskPriority, Workflow};
use crate::services::AgentSelector;
use crate::state_machine::TaskStatus;
use crate::state_store::StateStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared-data key holding the aggregated results of a finished workflow
pub const FINAL_RESULTS_KEY: &str = "final_results";

/// Collect every stage result into `shared_data["final_results"]`
pub fn aggregate_final_results(context: &mut ExecutionContext) -> Result<()> {
    let mut results = JsonMap::new();
    for (stage, result) in &context.stage_results {
        results.insert(stage.to_string(), result.to_value()?);
    }
    context.set_shared(FINAL_RESULTS_KEY, Value::Object(results));
    Ok(())
}

#[derive(Clone)]
pub struct StageRunner {
    store: StateStore,
    selector: AgentSelector,
    dispatch: Arc<dyn WorkerDispatch>,
    stage_timeout: Duration,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("store", &self.store.provider_name())
            .field("stage_timeout", &self.stage_timeout)
            .finish()
    }
}

impl StageRunner {
    pub fn new(store: StateStore, dispatch: Arc<dyn WorkerDispatch>, stage_timeout: Duration) -> Self {
        Self {
            store,
            selector: AgentSelector::new(),
            dispatch,
            stage_timeout,
        }
    }

    /// Run `node` for `workflow`, returning the updated context
    pub async fn run(
        &self,
        workflow: &Workflow,
        node: &StageNode,
        mut context: ExecutionContext,
    ) -> Result<ExecutionContext> {
        let stage = node.kind;
        let prerequisite_tasks = self.check_prerequisites(workflow, node).await?;

        context.update_stage(stage.as_str());
        context.add_history(events::STAGE_STARTED, Some(stage), None);

        let Some(capability) = node.capability() else {
            // Stages without a capability are performed by the engine itself
            aggregate_final_results(&mut context)?;
            context.mark_stage_completed(stage);
            context.add_history(events::STAGE_COMPLETED, Some(stage), None);
            return Ok(context);
        };

        let existing = self
            .store
            .latest_task_of_type(&workflow.workflow_id, stage.task_type())
            .await?;

        let task = match existing {
            Some(task) if task.status == TaskStatus::Completed => {
                return self.adopt(stage, task, context);
            }
            Some(task) if task.status.is_in_flight() => {
                debug!(
                    workflow_id = %workflow.workflow_id,
                    stage = %stage,
                    task_id = %task.task_id,
                    status = %task.status,
                    submitted = task.submitted_at.is_some(),
                    "Stage already has work in flight"
                );
                context.add_pending_task(&task.task_id);
                if task.needs_submission() {
                    self.resubmit(workflow, stage, capability, task, &mut context)
                        .await?
                } else {
                    task
                }
            }
            Some(mut task) if task.can_retry() => {
                task.retry()?;
                self.dispatch_task(workflow, stage, capability, task, &mut context)
                    .await?
            }
            Some(task) if task.status == TaskStatus::Failed => {
                return Err(OrchestratorError::StageFailed {
                    stage: stage.to_string(),
                    reason: format!(
                        "task {} exhausted its retry budget ({} attempts)",
                        task.task_id, task.max_retries
                    ),
                });
            }
            _ => {
                let task = self.build_task(workflow, stage, &context, prerequisite_tasks);
                self.dispatch_task(workflow, stage, capability, task, &mut context)
                    .await?
            }
        };

        self.await_outcome(stage, task, context).await
    }

    /// Every prerequisite's newest task must be completed. Returns their ids.
    async fn check_prerequisites(&self, workflow: &Workflow, node: &StageNode) -> Result<Vec<String>> {
        let mut task_ids = Vec::with_capacity(node.prerequisites.len());
        for prerequisite in &node.prerequisites {
            let latest = self
                .store
                .latest_task_of_type(&workflow.workflow_id, prerequisite.task_type())
                .await?;
            let unmet = |reason: String| OrchestratorError::PrerequisiteNotMet {
                stage: node.kind.to_string(),
                prerequisite: prerequisite.to_string(),
                reason,
            };
            match latest {
                None => return Err(unmet("no task has been created".to_string())),
                Some(task) if task.status != TaskStatus::Completed => {
                    return Err(unmet(format!("task {} is {}", task.task_id, task.status)));
                }
                Some(task) => task_ids.push(task.task_id),
            }
        }
        Ok(task_ids)
    }

    fn adopt(&self, stage: StageKind, task: Task, mut context: ExecutionContext) -> Result<ExecutionContext> {
        let payload = task.result.clone().unwrap_or(Value::Null);
        let result = StageResult::from_payload(stage, payload)?;
        context.record_stage_result(result);
        context.mark_task_completed(&task.task_id);
        if let Some(agent_id) = &task.agent_id {
            context.mark_agent_completed(agent_id);
        }
        context.mark_stage_completed(stage);
        context.add_history(events::STAGE_ADOPTED, Some(stage), Some(task.task_id.clone()));
        debug!(stage = %stage, task_id = %task.task_id, "Adopted completed task");
        Ok(context)
    }

    fn build_task(
        &self,
        workflow: &Workflow,
        stage: StageKind,
        context: &ExecutionContext,
        dependencies: Vec<String>,
    ) -> Task {
        let mut inputs = JsonMap::new();
        for result in context.stage_results.values() {
            if let Ok(value) = result.to_value() {
                inputs.insert(result.stage().to_string(), value);
            }
        }

        let mut parameters = JsonMap::new();
        parameters.insert("stage".to_string(), json!(stage.as_str()));
        parameters.insert("title".to_string(), json!(workflow.title));
        parameters.insert("description".to_string(), json!(workflow.description));
        parameters.insert("genre".to_string(), json!(workflow.genre));
        parameters.insert(
            "target_duration_minutes".to_string(),
            json!(workflow.target_duration_minutes),
        );
        parameters.insert(
            "style_preferences".to_string(),
            Value::Object(workflow.style_preferences.clone()),
        );
        parameters.insert("variables".to_string(), Value::Object(context.variables.clone()));
        parameters.insert("inputs".to_string(), Value::Object(inputs));

        Task::new(
            &workflow.workflow_id,
            &workflow.project_id,
            stage.task_type(),
            stage.display_name(),
        )
        .with_description(format!("{} for {}", stage.display_name(), workflow.title))
        .with_priority(TaskPriority::from_workflow_priority(workflow.priority))
        .with_parameters(parameters)
        .with_dependencies(dependencies)
    }

    /// Assign, persist, start and submit a task
    async fn dispatch_task(
        &self,
        workflow: &Workflow,
        stage: StageKind,
        capability: &str,
        mut task: Task,
        context: &mut ExecutionContext,
    ) -> Result<Task> {
        let mut agent = self
            .selector
            .select_for_capability(&self.store, capability)
            .await?;
        task.agent_id = Some(agent.agent_id.clone());
        task.holds_agent_slot = false;

        if !self.store.save_task(&task).await? {
            return Err(OrchestratorError::StoreUnavailable(format!(
                "could not persist task {}",
                task.task_id
            )));
        }
        context.add_pending_task(&task.task_id);
        context.add_history(events::TASK_CREATED, Some(stage), Some(task.task_id.clone()));

        task.holds_agent_slot = self.reserve(&mut agent).await?;
        context.mark_agent_active(&agent.agent_id);

        task.start()?;
        self.store.save_task(&task).await?;
        self.submit(workflow, stage, &agent, &mut task, context).await?;
        Ok(task)
    }

    /// Hand an in-flight task that never reached its worker to an agent again
    async fn resubmit(
        &self,
        workflow: &Workflow,
        stage: StageKind,
        capability: &str,
        mut task: Task,
        context: &mut ExecutionContext,
    ) -> Result<Task> {
        let assigned = match task.agent_id.as_deref() {
            Some(agent_id) => self.store.get_agent(agent_id).await?,
            None => None,
        };
        let mut agent = match assigned {
            Some(agent) => agent,
            None => {
                let agent = self
                    .selector
                    .select_for_capability(&self.store, capability)
                    .await?;
                task.agent_id = Some(agent.agent_id.clone());
                task.holds_agent_slot = false;
                agent
            }
        };

        if !task.holds_agent_slot {
            task.holds_agent_slot = self.reserve(&mut agent).await?;
        }
        context.mark_agent_active(&agent.agent_id);

        if task.status != TaskStatus::Running {
            task.start()?;
        }
        self.store.save_task(&task).await?;
        info!(
            stage = %stage,
            task_id = %task.task_id,
            agent_id = %agent.agent_id,
            "Resubmitting task that never reached its worker"
        );
        self.submit(workflow, stage, &agent, &mut task, context).await?;
        Ok(task)
    }

    /// Take one unit of the agent's load. Returns false when it has none to give.
    async fn reserve(&self, agent: &mut Agent) -> Result<bool> {
        match agent.assign_task() {
            Ok(()) => {
                self.store.save_agent(agent).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    agent_id = %agent.agent_id,
                    error = %e,
                    "Dispatching to an agent without spare capacity"
                );
                Ok(false)
            }
        }
    }

    async fn submit(
        &self,
        workflow: &Workflow,
        stage: StageKind,
        agent: &Agent,
        task: &mut Task,
        context: &mut ExecutionContext,
    ) -> Result<()> {
        self.dispatch.submit(agent, task).await?;
        task.mark_submitted();
        self.store.save_task(task).await?;
        context.add_history(events::STAGE_DISPATCHED, Some(stage), Some(agent.agent_id.clone()));

        log_task_operation(
            "dispatch",
            &task.task_id,
            &workflow.workflow_id,
            &task.task_type,
            &task.status.to_string(),
            Some(&agent.agent_id),
        );
        Ok(())
    }

    async fn await_outcome(
        &self,
        stage: StageKind,
        mut task: Task,
        mut context: ExecutionContext,
    ) -> Result<ExecutionContext> {
        let outcome = self
            .dispatch
            .await_completion(&task.task_id, self.stage_timeout)
            .await?;

        match outcome {
            DispatchOutcome::Pending => {
                info!(stage = %stage, task_id = %task.task_id, "Awaiting worker result");
                Ok(context)
            }
            DispatchOutcome::Completed(payload) => match StageResult::from_payload(stage, payload.clone()) {
                Ok(result) => {
                    if task.status != TaskStatus::Running {
                        task.start()?;
                    }
                    task.complete(payload)?;
                    settle_agent(&self.store, &mut task, true).await?;
                    self.store.save_task(&task).await?;

                    context.record_stage_result(result);
                    context.mark_task_completed(&task.task_id);
                    if let Some(agent_id) = &task.agent_id {
                        context.mark_agent_completed(agent_id);
                    }
                    context.mark_stage_completed(stage);
                    context.add_history(events::STAGE_COMPLETED, Some(stage), Some(task.task_id.clone()));
                    Ok(context)
                }
                Err(e) => self.fail_stage(stage, task, e.to_string()).await,
            },
            DispatchOutcome::Failed(reason) => self.fail_stage(stage, task, reason).await,
        }
    }

    async fn fail_stage(&self, stage: StageKind, mut task: Task, reason: String) -> Result<ExecutionContext> {
        if task.status == TaskStatus::Pending {
            task.start()?;
        }
        task.fail(reason.clone())?;
        settle_agent(&self.store, &mut task, false).await?;
        self.store.save_task(&task).await?;

        log_task_operation(
            "fail",
            &task.task_id,
            &task.workflow_id,
            &task.task_type,
            &task.status.to_string(),
            task.agent_id.as_deref(),
        );
        Err(OrchestratorError::StageFailed {
            stage: stage.to_string(),
            reason,
        })
    }
}

/// Fold a settled task's outcome into its agent, giving back the load unit
/// only if the task holds one
pub(crate) async fn settle_agent(store: &StateStore, task: &mut Task, succeeded: bool) -> Result<()> {
    let Some(agent_id) = task.agent_id.as_deref() else {
        return Ok(());
    };
    if let Some(mut agent) = store.get_agent(agent_id).await? {
        if task.holds_agent_slot {
            agent.release_task();
        }
        agent.record_outcome(succeeded);
        store.save_agent(&agent).await?;
    }
    task.holds_agent_slot = false;
    Ok(())
}
