//! # Stage Graph Executor
//!
//! In-process execution backend. Walks the levels of a workflow's
//! [`StageGraph`], running single-stage levels directly and multi-stage levels
//! (the visual/voice fork) concurrently on cloned contexts that are joined
//! before the next level starts.
//!
//! ## Checkpoints
//!
//! After each level the executor writes a new execution context record and
//! advances workflow progress. Both happen under the workflow lock and only
//! while the workflow is still RUNNING; a workflow paused or cancelled in the
//! meantime stops the execution with [`OrchestratorError::Cancelled`].
//!
//! ## Interruptions
//!
//! An unmet prerequisite, or a stage whose worker has not reported yet, halts
//! forward progress with [`ExecutionOutcome::Interrupted`]. The context is
//! persisted first, so a resume continues from the same point.

use super::backend::{ExecutionBackend, ExecutionOutcome};
use super::dispatch::WorkerDispatch;
use super::stage_graph::{StageGraph, StageNode};
use super::stage_runner::{aggregate_final_results, StageRunner, FINAL_RESULTS_KEY};
use crate::config::{LockingConfig, OrchestratorConfig};
use crate::constants::checkpoints;
use crate::error::{OrchestratorError, Result};
use crate::models::{ExecutionContext, StageKind, Workflow};
use crate::services::{KnowledgeStore, TimedKnowledgeStore};
use crate::state_machine::WorkflowStatus;
use crate::state_store::StateStore;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lock resource guarding read-modify-write of one workflow record
pub fn workflow_lock_resource(workflow_id: &str) -> String {
    format!("workflow-{workflow_id}")
}

/// Settings for taking the workflow lock
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockSettings {
    pub ttl: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl From<&LockingConfig> for LockSettings {
    fn from(config: &LockingConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.workflow_lock_ttl_seconds),
            attempts: config.acquire_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

pub struct StageGraphExecutor {
    graph: StageGraph,
    runner: StageRunner,
    store: StateStore,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    lock: LockSettings,
}

impl std::fmt::Debug for StageGraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageGraphExecutor")
            .field("workflow_type", &self.graph.workflow_type())
            .field("stages", &self.graph.len())
            .field("knowledge", &self.knowledge.is_some())
            .finish()
    }
}

impl StageGraphExecutor {
    pub fn new(
        graph: StageGraph,
        store: StateStore,
        dispatch: Arc<dyn WorkerDispatch>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            runner: StageRunner::new(store.clone(), dispatch, config.stage_timeout()),
            graph,
            store,
            knowledge: None,
            lock: LockSettings::from(&config.locking),
        }
    }

    /// Record final results in a knowledge store, bounded by `timeout`
    pub fn with_knowledge_store(mut self, knowledge: Arc<dyn KnowledgeStore>, timeout: Duration) -> Self {
        self.knowledge = Some(Arc::new(TimedKnowledgeStore::new(knowledge, timeout)));
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    fn node(&self, kind: StageKind) -> Result<&StageNode> {
        self.graph.node(kind).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "stage {kind} missing from the {} graph",
                self.graph.workflow_type()
            ))
        })
    }

    /// Run one level; multi-stage levels fork and join
    async fn run_level(
        &self,
        workflow: &Workflow,
        stages: &[StageKind],
        context: ExecutionContext,
    ) -> Result<ExecutionContext> {
        if let [single] = stages {
            return self.runner.run(workflow, self.node(*single)?, context).await;
        }

        let nodes = stages
            .iter()
            .map(|kind| self.node(*kind))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            workflow_id = %workflow.workflow_id,
            branches = nodes.len(),
            "Forking parallel stages"
        );
        let branches = try_join_all(
            nodes
                .into_iter()
                .map(|node| self.runner.run(workflow, node, context.clone())),
        )
        .await?;
        Ok(ExecutionContext::join(context, branches))
    }

    /// Persist a successor context and advance the workflow, under its lock
    async fn commit_level(
        &self,
        workflow_id: &str,
        context: &ExecutionContext,
        label: &str,
    ) -> Result<ExecutionContext> {
        let next = context.checkpoint(label);
        let progress = self.progress_of(&next);
        let store = &self.store;
        let next_ref = &next;

        store
            .with_lock(
                &workflow_lock_resource(workflow_id),
                self.lock.ttl,
                self.lock.attempts,
                self.lock.retry_delay,
                || async move {
                    let mut workflow = store
                        .get_workflow(workflow_id)
                        .await?
                        .ok_or_else(|| OrchestratorError::not_found("workflow", workflow_id))?;
                    if workflow.status != WorkflowStatus::Running {
                        return Err(OrchestratorError::Cancelled(workflow_id.to_string()));
                    }

                    store.save_execution_context(next_ref).await?;
                    workflow.advance_progress(progress);
                    if let Some(stage) = &next_ref.current_stage {
                        workflow.set_stage(stage.clone());
                    }
                    for agent_id in next_ref.active_agents.iter().chain(&next_ref.completed_agents) {
                        workflow.assign_agent(agent_id);
                    }
                    store.save_workflow(&workflow).await?;
                    Ok(())
                },
            )
            .await?;

        Ok(next)
    }

    fn progress_of(&self, context: &ExecutionContext) -> f64 {
        if self.graph.is_empty() {
            return 100.0;
        }
        let done = self
            .graph
            .nodes()
            .iter()
            .filter(|n| context.is_stage_completed(n.kind))
            .count();
        done as f64 / self.graph.len() as f64 * 100.0
    }

    /// Persist the context before handing back an interruption
    async fn interrupt(
        &self,
        context: ExecutionContext,
        stage: StageKind,
        reason: String,
    ) -> Result<ExecutionOutcome> {
        let mut halted = context.checkpoint(checkpoints::INTERRUPTED);
        halted.set_error(reason.clone(), Some(stage));
        self.store.save_execution_context(&halted).await?;
        info!(
            workflow_id = %halted.workflow_id,
            stage = %stage,
            reason = %reason,
            "Execution interrupted"
        );
        Ok(ExecutionOutcome::Interrupted {
            stage: stage.to_string(),
            reason,
            context: halted,
        })
    }

    async fn record_knowledge(&self, workflow: &Workflow, context: &ExecutionContext) {
        let Some(knowledge) = &self.knowledge else {
            return;
        };
        let entry = json!({
            "workflow_id": workflow.workflow_id,
            "project_id": workflow.project_id,
            "workflow_type": workflow.workflow_type,
            "title": workflow.title,
            "results": context.shared(FINAL_RESULTS_KEY).cloned().unwrap_or(Value::Null),
        });
        if let Err(e) = knowledge.store_knowledge("workflow_results", entry).await {
            warn!(
                workflow_id = %workflow.workflow_id,
                error = %e,
                "Could not record workflow results in knowledge store"
            );
        }
    }
}

#[async_trait]
impl ExecutionBackend for StageGraphExecutor {
    fn name(&self) -> &'static str {
        "stage_graph"
    }

    async fn execute(&self, workflow: &Workflow, context: ExecutionContext) -> Result<ExecutionOutcome> {
        let levels = self.graph.levels()?;
        let mut context = context;
        info!(
            workflow_id = %workflow.workflow_id,
            workflow_type = %workflow.workflow_type,
            levels = levels.len(),
            resumed_stages = context.completed_stages.len(),
            "Executing stage graph"
        );

        for level in levels {
            let pending: Vec<StageKind> = level
                .into_iter()
                .filter(|kind| !context.is_stage_completed(*kind))
                .collect();
            if pending.is_empty() {
                continue;
            }

            let before = context.clone();
            context = match self.run_level(workflow, &pending, context).await {
                Ok(context) => context,
                Err(OrchestratorError::PrerequisiteNotMet {
                    stage,
                    prerequisite,
                    reason,
                }) => {
                    let kind = stage.parse::<StageKind>().unwrap_or(pending[0]);
                    let reason = format!("prerequisite {prerequisite} not met: {reason}");
                    return self.interrupt(before, kind, reason).await;
                }
                Err(e @ OrchestratorError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    let mut failed = before.checkpoint(checkpoints::FAILED);
                    failed.set_error(e.to_string(), pending.first().copied());
                    if let Err(save_error) = self.store.save_execution_context(&failed).await {
                        warn!(error = %save_error, "Could not persist failed execution context");
                    }
                    return Err(e);
                }
            };

            let label = pending
                .iter()
                .map(StageKind::as_str)
                .collect::<Vec<_>>()
                .join("+");
            context = self.commit_level(&workflow.workflow_id, &context, &label).await?;

            if let Some(waiting) = pending.iter().find(|k| !context.is_stage_completed(**k)) {
                return self
                    .interrupt(context, *waiting, "awaiting worker result".to_string())
                    .await;
            }
        }

        aggregate_final_results(&mut context)?;
        let context = self.commit_level(&workflow.workflow_id, &context, checkpoints::FINAL).await?;
        self.record_knowledge(workflow, &context).await;

        info!(
            workflow_id = %workflow.workflow_id,
            stages = context.completed_stages.len(),
            "Stage graph complete"
        );
        Ok(ExecutionOutcome::Completed(context))
    }
}
