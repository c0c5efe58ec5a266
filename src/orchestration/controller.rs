//! # Orchestrator Controller
//!
//! Top-level facade for workflow executions: start, pause, resume, cancel and
//! status.
//!
//! The controller owns the in-memory map from workflow id to its live
//! execution handle. That map only answers "is this still running" and lets the
//! controller abort an execution; the state store stays the source of truth for
//! workflow status. Every status change happens under the workflow lock.
//!
//! ## Lifecycle
//!
//! ```text
//! PENDING ──start──▶ RUNNING ──pause / interruption──▶ PAUSED ──resume──▶ RUNNING
//!                       │                                 │
//!                       ├──all stages done──▶ COMPLETED   │
//!                       ├──stage error──▶ FAILED ──start──┘ (retry from checkpoint)
//!                       └──cancel──▶ CANCELLED ◀──cancel──┘
//! ```
//!
//! A started or resumed execution continues from the newest persisted
//! execution context. Stages already recorded as completed are skipped; the
//! rest are re-run, adopting any task that already finished.

use super::backend::{DelegatedBackendFactory, ExecutionBackend, ExecutionOutcome};
use super::dispatch::{DeferredDispatch, DispatchOutcome, WorkerDispatch};
use super::executor::{workflow_lock_resource, LockSettings, StageGraphExecutor};
use super::stage_graph::StageGraph;
use super::stage_runner::settle_agent;
use crate::config::OrchestratorConfig;
use crate::constants::{checkpoints, events};
use crate::error::{OrchestratorError, Result};
use crate::logging::{log_error, log_task_operation, log_workflow_operation};
use crate::models::{ExecutionContext, StageKind, StageResult, Workflow, WorkflowType};
use crate::services::KnowledgeStore;
use crate::state_machine::{TaskStatus, WorkflowEvent, WorkflowStateMachine, WorkflowStatus};
use crate::state_store::StateStore;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot returned by [`OrchestratorController::status`]
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusReport {
    pub workflow: Workflow,
    pub execution_context: Option<ExecutionContext>,
    pub is_running: bool,
}

pub struct OrchestratorController {
    store: StateStore,
    config: OrchestratorConfig,
    dispatch: Arc<dyn WorkerDispatch>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    delegated: Option<Arc<dyn DelegatedBackendFactory>>,
    handles: Arc<DashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for OrchestratorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorController")
            .field("store", &self.store.provider_name())
            .field("live_handles", &self.handles.len())
            .field("delegated_backend", &self.delegated.is_some())
            .finish()
    }
}

impl OrchestratorController {
    pub fn new(store: StateStore, config: OrchestratorConfig) -> Self {
        Self {
            store,
            config,
            dispatch: Arc::new(DeferredDispatch::new()),
            knowledge: None,
            delegated: None,
            handles: Arc::new(DashMap::new()),
        }
    }

    pub fn with_dispatch(mut self, dispatch: Arc<dyn WorkerDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_knowledge_store(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_delegated_backend(mut self, factory: Arc<dyn DelegatedBackendFactory>) -> Self {
        self.delegated = Some(factory);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run `f` under the workflow's lock
    async fn locked<T, F, Fut>(&self, workflow_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = LockSettings::from(&self.config.locking);
        self.store
            .with_lock(
                &workflow_lock_resource(workflow_id),
                lock.ttl,
                lock.attempts,
                lock.retry_delay,
                f,
            )
            .await
    }

    fn is_live(&self, workflow_id: &str) -> bool {
        self.handles
            .get(workflow_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn live_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    fn ensure_capacity(&self, workflow_id: &str) -> Result<()> {
        if self.is_live(workflow_id) {
            return Err(OrchestratorError::Validation(format!(
                "workflow {workflow_id} already has a live execution"
            )));
        }
        let limit = self.config.execution.max_concurrent_workflows;
        if self.live_count() >= limit {
            return Err(OrchestratorError::Validation(format!(
                "concurrent workflow limit reached ({limit})"
            )));
        }
        Ok(())
    }

    /// Delegated backend when configured and constructible, else the in-process executor
    fn backend_for(&self, workflow_type: WorkflowType) -> Arc<dyn ExecutionBackend> {
        if self.config.execution.prefer_delegated_backend {
            if let Some(factory) = &self.delegated {
                match factory.create(workflow_type) {
                    Ok(backend) => return backend,
                    Err(e) => warn!(
                        workflow_type = %workflow_type,
                        error = %e,
                        "Delegated backend unavailable, falling back to stage graph executor"
                    ),
                }
            }
        }

        let mut executor = StageGraphExecutor::new(
            StageGraph::for_type(workflow_type),
            self.store.clone(),
            Arc::clone(&self.dispatch),
            &self.config,
        );
        if let Some(knowledge) = &self.knowledge {
            executor = executor.with_knowledge_store(Arc::clone(knowledge), self.config.knowledge_timeout());
        }
        Arc::new(executor)
    }

    /// Start (or restart) a workflow. Returns the id of the execution context
    /// the new execution begins from.
    pub async fn start(&self, workflow: Workflow) -> Result<String> {
        let workflow_id = workflow.workflow_id.clone();
        self.ensure_capacity(&workflow_id)?;

        if self.store.get_workflow(&workflow_id).await?.is_none() && !self.store.save_workflow(&workflow).await? {
            return Err(OrchestratorError::StoreUnavailable(format!(
                "could not persist workflow {workflow_id}"
            )));
        }

        let store = &self.store;
        let id = workflow_id.as_str();
        let (workflow, context) = self
            .locked(id, || async move {
                let mut workflow = store
                    .get_workflow(id)
                    .await?
                    .ok_or_else(|| OrchestratorError::not_found("workflow", id))?;
                if !workflow.status.is_startable() {
                    return Err(OrchestratorError::invalid_transition(
                        "workflow",
                        workflow.status,
                        WorkflowStatus::Running,
                    ));
                }

                let latest = match workflow.status {
                    WorkflowStatus::Pending => None,
                    _ => store.get_latest_execution_context(id).await?,
                };
                let mut context = match latest {
                    Some(latest) => {
                        let mut context = latest.checkpoint(checkpoints::RESTARTED);
                        if workflow.status == WorkflowStatus::Failed {
                            context.increment_retry();
                        }
                        context.clear_error();
                        context
                    }
                    None => ExecutionContext::new(&workflow.workflow_id, &workflow.project_id),
                };
                context.add_history(events::WORKFLOW_STARTED, None, None);

                workflow.start()?;
                store.save_execution_context(&context).await?;
                store.save_workflow(&workflow).await?;
                Ok((workflow, context))
            })
            .await?;

        log_workflow_operation(
            "start",
            &workflow.workflow_id,
            Some(&workflow.workflow_type.to_string()),
            &workflow.status.to_string(),
            Some(&context.context_id),
        );
        let context_id = context.context_id.clone();
        self.launch(workflow, context);
        Ok(context_id)
    }

    /// Pause a running workflow. Returns false if it was not running.
    pub async fn pause(&self, workflow_id: &str) -> Result<bool> {
        let store = &self.store;
        let handles = &self.handles;
        let paused = self
            .locked(workflow_id, || async move {
                let Some(mut workflow) = store.get_workflow(workflow_id).await? else {
                    return Ok(false);
                };
                if workflow.status != WorkflowStatus::Running {
                    debug!(workflow_id = workflow_id, status = %workflow.status, "Pause ignored");
                    return Ok(false);
                }

                if let Some(latest) = store.get_latest_execution_context(workflow_id).await? {
                    let mut context = latest.checkpoint(checkpoints::PAUSED);
                    context.add_history(events::WORKFLOW_PAUSED, None, None);
                    store.save_execution_context(&context).await?;
                }
                if let Some((_, handle)) = handles.remove(workflow_id) {
                    handle.abort();
                }
                workflow.pause()?;
                store.save_workflow(&workflow).await?;
                Ok(true)
            })
            .await?;

        if paused {
            log_workflow_operation("pause", workflow_id, None, "paused", None);
        }
        Ok(paused)
    }

    /// Resume a paused workflow from its newest context. Returns false if it
    /// was not paused.
    pub async fn resume(&self, workflow_id: &str) -> Result<bool> {
        self.ensure_capacity(workflow_id)?;

        let store = &self.store;
        let resumed = self
            .locked(workflow_id, || async move {
                let Some(mut workflow) = store.get_workflow(workflow_id).await? else {
                    return Ok(None);
                };
                if workflow.status != WorkflowStatus::Paused {
                    debug!(workflow_id = workflow_id, status = %workflow.status, "Resume ignored");
                    return Ok(None);
                }

                let mut context = match store.get_latest_execution_context(workflow_id).await? {
                    Some(latest) => latest.checkpoint(checkpoints::RESUMED),
                    None => ExecutionContext::new(&workflow.workflow_id, &workflow.project_id),
                };
                context.clear_error();
                context.add_history(events::WORKFLOW_RESUMED, None, None);

                workflow.resume()?;
                store.save_execution_context(&context).await?;
                store.save_workflow(&workflow).await?;
                Ok(Some((workflow, context)))
            })
            .await?;

        let Some((workflow, context)) = resumed else {
            return Ok(false);
        };
        log_workflow_operation("resume", workflow_id, None, "running", Some(&context.context_id));
        self.launch(workflow, context);
        Ok(true)
    }

    /// Cancel a workflow whatever its execution state. Returns false if the
    /// workflow is unknown or already terminal.
    pub async fn cancel(&self, workflow_id: &str) -> Result<bool> {
        let store = &self.store;
        let handles = &self.handles;
        let cancelled = self
            .locked(workflow_id, || async move {
                let Some(mut workflow) = store.get_workflow(workflow_id).await? else {
                    return Ok(false);
                };
                if !WorkflowStateMachine::can_transition(workflow.status, &WorkflowEvent::Cancel) {
                    debug!(workflow_id = workflow_id, status = %workflow.status, "Cancel ignored");
                    return Ok(false);
                }

                if let Some((_, handle)) = handles.remove(workflow_id) {
                    handle.abort();
                }
                workflow.cancel()?;
                store.save_workflow(&workflow).await?;
                Ok(true)
            })
            .await?;

        if cancelled {
            log_workflow_operation("cancel", workflow_id, None, "cancelled", None);
        }
        Ok(cancelled)
    }

    pub async fn status(&self, workflow_id: &str) -> Result<Option<WorkflowStatusReport>> {
        let Some(workflow) = self.store.get_workflow(workflow_id).await? else {
            return Ok(None);
        };
        let execution_context = self.store.get_latest_execution_context(workflow_id).await?;
        Ok(Some(WorkflowStatusReport {
            workflow,
            execution_context,
            is_running: self.is_live(workflow_id),
        }))
    }

    /// Workflow ids with a live execution handle
    pub fn running_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .handles
            .iter()
            .filter(|h| !h.is_finished())
            .map(|h| h.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop handles of finished executions. Returns how many were dropped.
    pub fn cleanup_finished(&self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|_, handle| !handle.is_finished());
        let dropped = before.saturating_sub(self.handles.len());
        if dropped > 0 {
            debug!(dropped = dropped, "Dropped finished execution handles");
        }
        dropped
    }

    /// Apply an asynchronously reported worker outcome to the stored task.
    /// Returns false for an unknown task or a still-pending outcome.
    pub async fn record_task_outcome(&self, task_id: &str, outcome: DispatchOutcome) -> Result<bool> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };

        let succeeded = match outcome {
            DispatchOutcome::Pending => return Ok(false),
            DispatchOutcome::Completed(payload) => {
                let stage = task.task_type.parse::<StageKind>().map_err(OrchestratorError::Validation)?;
                StageResult::from_payload(stage, payload.clone())?;
                if matches!(task.status, TaskStatus::Pending | TaskStatus::Retrying) {
                    task.start()?;
                }
                task.complete(payload)?;
                true
            }
            DispatchOutcome::Failed(reason) => {
                if task.status == TaskStatus::Pending {
                    task.start()?;
                }
                task.fail(reason)?;
                false
            }
        };

        settle_agent(&self.store, &mut task, succeeded).await?;
        self.store.save_task(&task).await?;
        log_task_operation(
            "report",
            &task.task_id,
            &task.workflow_id,
            &task.task_type,
            &task.status.to_string(),
            task.agent_id.as_deref(),
        );
        Ok(true)
    }

    /// Abort every live execution, leaving running workflows paused at a
    /// `shutdown` checkpoint. Returns how many workflows were paused.
    pub async fn shutdown(&self) -> Result<usize> {
        let ids: Vec<String> = self.handles.iter().map(|h| h.key().clone()).collect();
        let mut paused = 0;

        for workflow_id in ids {
            let store = &self.store;
            let handles = &self.handles;
            let id = workflow_id.as_str();
            let was_running = self
                .locked(id, || async move {
                    if let Some((_, handle)) = handles.remove(id) {
                        handle.abort();
                    }
                    let Some(mut workflow) = store.get_workflow(id).await? else {
                        return Ok(false);
                    };
                    if workflow.status != WorkflowStatus::Running {
                        return Ok(false);
                    }
                    if let Some(latest) = store.get_latest_execution_context(id).await? {
                        store
                            .save_execution_context(&latest.checkpoint(checkpoints::SHUTDOWN))
                            .await?;
                    }
                    workflow.pause()?;
                    store.save_workflow(&workflow).await?;
                    Ok(true)
                })
                .await?;
            if was_running {
                paused += 1;
            }
        }

        info!(paused = paused, "Orchestrator controller shut down");
        Ok(paused)
    }

    /// Spawn the execution and register its handle
    fn launch(&self, workflow: Workflow, context: ExecutionContext) {
        let backend = self.backend_for(workflow.workflow_type);
        let store = self.store.clone();
        let lock = LockSettings::from(&self.config.locking);
        let workflow_id = workflow.workflow_id.clone();

        info!(
            workflow_id = %workflow_id,
            backend = backend.name(),
            context_id = %context.context_id,
            "Launching workflow execution"
        );

        let handle = tokio::spawn(async move {
            let result = backend.execute(&workflow, context).await;
            if let Err(e) = settle_execution(&store, lock, &workflow.workflow_id, result).await {
                log_error(
                    "OrchestratorController",
                    "settle_execution",
                    &e.to_string(),
                    Some(&workflow.workflow_id),
                );
            }
        });

        if let Some(previous) = self.handles.insert(workflow_id, handle) {
            previous.abort();
        }
    }
}

/// Apply an execution's outcome to the workflow record
async fn settle_execution(
    store: &StateStore,
    lock: LockSettings,
    workflow_id: &str,
    result: Result<ExecutionOutcome>,
) -> Result<()> {
    if let Err(OrchestratorError::Cancelled(_)) = &result {
        debug!(workflow_id = workflow_id, "Execution stopped; workflow no longer running");
        return Ok(());
    }

    let status = store
        .with_lock(
            &workflow_lock_resource(workflow_id),
            lock.ttl,
            lock.attempts,
            lock.retry_delay,
            || async {
                let Some(mut workflow) = store.get_workflow(workflow_id).await? else {
                    return Ok(None);
                };
                // Paused or cancelled while the execution was finishing
                if workflow.status != WorkflowStatus::Running {
                    return Ok(None);
                }
                match &result {
                    Ok(ExecutionOutcome::Completed(_)) => workflow.complete()?,
                    Ok(ExecutionOutcome::Interrupted { .. }) => workflow.pause()?,
                    Err(e) => workflow.fail(e.to_string())?,
                };
                store.save_workflow(&workflow).await?;
                Ok(Some(workflow.status))
            },
        )
        .await?;

    if let Some(status) = status {
        let (event, details) = match &result {
            Ok(ExecutionOutcome::Completed(_)) => (events::WORKFLOW_COMPLETED, None),
            Ok(ExecutionOutcome::Interrupted { reason, .. }) => {
                (events::WORKFLOW_INTERRUPTED, Some(reason.clone()))
            }
            Err(e) => (events::WORKFLOW_FAILED, Some(e.to_string())),
        };
        log_workflow_operation(event, workflow_id, None, &status.to_string(), details.as_deref());
    }
    Ok(())
}
