//! Stage runner and stage graph executor against scripted workers.

mod common;

use async_trait::async_trait;
use common::*;
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::models::{ExecutionContext, JsonMap, StageKind, Task, Workflow, WorkflowType};
use orchestrator_core::orchestration::{
    DeferredDispatch, DispatchOutcome, ExecutionBackend, ExecutionOutcome, StageGraph, StageGraphExecutor,
    StageRunner, WorkerDispatch, FINAL_RESULTS_KEY,
};
use orchestrator_core::services::KnowledgeStore;
use orchestrator_core::state_machine::{AgentStatus, TaskStatus};
use orchestrator_core::state_store::{StateStore, TaskFilter};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

async fn running_workflow(store: &StateStore, workflow_type: WorkflowType) -> Workflow {
    let project = seed_project(store).await;
    let mut workflow = seed_workflow(store, &project, workflow_type).await;
    workflow.start().unwrap();
    store.save_workflow(&workflow).await.unwrap();
    workflow
}

fn executor(store: &StateStore, workflow_type: WorkflowType, dispatch: Arc<dyn WorkerDispatch>) -> StageGraphExecutor {
    StageGraphExecutor::new(
        StageGraph::for_type(workflow_type),
        store.clone(),
        dispatch,
        &OrchestratorConfig::for_testing(),
    )
}

fn fresh_context(workflow: &Workflow) -> ExecutionContext {
    ExecutionContext::new(&workflow.workflow_id, &workflow.project_id)
}

#[tokio::test]
async fn test_production_graph_runs_to_completion() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    let agents = register_agents(&store, WorkflowType::Production).await;
    let dispatch = scripted();

    let outcome = executor(&store, WorkflowType::Production, dispatch.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();

    let context = match outcome {
        ExecutionOutcome::Completed(context) => context,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(context.completed_stages.len(), 7);
    let results = context.shared(FINAL_RESULTS_KEY).unwrap().as_object().unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.contains_key("video_assembly"));

    let submitted = dispatch.submitted();
    assert_eq!(submitted.len(), 6);
    assert_eq!(submitted[0], "script_generation");
    assert_eq!(submitted[1], "scene_planning");
    // Visual and voice run as one level, in either order
    let mut fork = vec![submitted[2].as_str(), submitted[3].as_str()];
    fork.sort_unstable();
    assert_eq!(fork, vec!["visual_generation", "voice_generation"]);
    assert_eq!(&submitted[4..], ["video_assembly", "quality_review"]);

    let stored = store.get_workflow(&workflow.workflow_id).await.unwrap().unwrap();
    assert!((stored.progress_percentage - 100.0).abs() < f64::EPSILON);
    assert_eq!(stored.assigned_agents.len(), agents.len());

    let tasks = store
        .list_tasks(&TaskFilter::for_workflow(&workflow.workflow_id))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 6);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    // Agents are released once their task settles
    for agent in agents {
        let agent = store.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(agent.current_task_count, 0);
    }

    let latest = store
        .get_latest_execution_context(&workflow.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.context_id, context.context_id);
    assert_eq!(latest.checkpoints.last().unwrap().label, "final");
}

#[tokio::test]
async fn test_optimization_graph_runs_in_order() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::ContentOptimization).await;
    register_agents(&store, WorkflowType::ContentOptimization).await;
    let dispatch = scripted();

    let outcome = executor(&store, WorkflowType::ContentOptimization, dispatch.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(
        dispatch.submitted(),
        vec![
            "content_analysis",
            "optimization_suggestions",
            "apply_optimizations",
            "validate_results"
        ]
    );
}

#[tokio::test]
async fn test_stage_without_completed_prerequisite_is_gated() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;
    let dispatch = scripted();

    let graph = StageGraph::production();
    let runner = StageRunner::new(store.clone(), dispatch.clone(), Duration::from_secs(1));
    let err = runner
        .run(&workflow, graph.node(StageKind::ScenePlanning).unwrap(), fresh_context(&workflow))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::PrerequisiteNotMet { stage, prerequisite, .. } => {
            assert_eq!(stage, "scene_planning");
            assert_eq!(prerequisite, "script_generation");
        }
        other => panic!("expected a prerequisite error, got {other:?}"),
    }
    assert!(dispatch.submitted().is_empty());
    assert!(store
        .list_tasks(&TaskFilter::for_workflow(&workflow.workflow_id))
        .await
        .unwrap()
        .is_empty());
    let stored = store.get_workflow(&workflow.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored, workflow);
}

#[tokio::test]
async fn test_unmet_prerequisite_interrupts_execution() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;

    // Context claims the script is done but no script task exists
    let mut context = fresh_context(&workflow);
    context.mark_stage_completed(StageKind::ScriptGeneration);

    let outcome = executor(&store, WorkflowType::Production, scripted())
        .execute(&workflow, context)
        .await
        .unwrap();

    match outcome {
        ExecutionOutcome::Interrupted { stage, context, .. } => {
            assert_eq!(stage, "scene_planning");
            assert!(context.error_state.is_some());
        }
        other => panic!("expected an interruption, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deferred_dispatch_interrupts_at_first_stage() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;
    let dispatch = Arc::new(DeferredDispatch::new());

    let outcome = executor(&store, WorkflowType::Production, dispatch.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();

    match outcome {
        ExecutionOutcome::Interrupted { stage, reason, context } => {
            assert_eq!(stage, "script_generation");
            assert_eq!(reason, "awaiting worker result");
            assert_eq!(context.pending_tasks.len(), 1);
        }
        other => panic!("expected an interruption, got {other:?}"),
    }

    let submissions = dispatch.submissions();
    assert_eq!(submissions.len(), 1);
    let task = store.get_task(&submissions[0].task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.agent_id.as_deref(), Some(submissions[0].agent_id.as_str()));
}

#[tokio::test]
async fn test_failed_stage_fails_execution_then_retries_same_task() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    let agents = register_agents(&store, WorkflowType::Production).await;
    let failing = Arc::new(
        ScriptedDispatch::new().script(StageKind::ScenePlanning, DispatchOutcome::Failed("model overloaded".to_string())),
    );

    let err = executor(&store, WorkflowType::Production, failing)
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StageFailed { ref stage, .. } if stage == "scene_planning"));

    let failed = store
        .latest_task_of_type(&workflow.workflow_id, "scene_planning")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("model overloaded"));

    let latest = store
        .get_latest_execution_context(&workflow.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert!(latest.error_state.is_some());
    assert!(latest.is_stage_completed(StageKind::ScriptGeneration));

    let planner = agents
        .iter()
        .find(|a| a.has_capability("scene_planning"))
        .unwrap();
    let planner = store.get_agent(&planner.agent_id).await.unwrap().unwrap();
    assert_eq!(planner.error_count, 1);
    assert_eq!(planner.current_task_count, 0);

    // A second pass from the failure checkpoint reuses the failed task
    let mut resumed = latest.clone();
    resumed.clear_error();
    let outcome = executor(&store, WorkflowType::Production, scripted())
        .execute(&workflow, resumed)
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let retried = store.get_task(&failed.task_id).await.unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Completed);
    assert_eq!(retried.retry_count, 1);
}

#[tokio::test]
async fn test_missing_capability_fails_with_agent_unavailable() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;

    let err = executor(&store, WorkflowType::Production, scripted())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::AgentUnavailable {
            capability: "script_generation".to_string()
        }
    );
}

#[tokio::test]
async fn test_execution_stops_when_workflow_leaves_running() {
    let store = StateStore::in_memory();
    let mut workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;

    workflow.pause().unwrap();
    store.save_workflow(&workflow).await.unwrap();

    let err = executor(&store, WorkflowType::Production, scripted())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled(_)));
    assert!(err.is_interruption());
}

#[derive(Default)]
struct RecordingKnowledgeStore {
    entries: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl KnowledgeStore for RecordingKnowledgeStore {
    async fn store_embedding(&self, _content: &str, _metadata: JsonMap) -> Result<String> {
        Ok("embedding".to_string())
    }

    async fn search_embeddings(&self, _query: &str, _limit: usize) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn store_knowledge(&self, knowledge_type: &str, content: Value) -> Result<String> {
        self.entries.lock().push((knowledge_type.to_string(), content));
        Ok("entry".to_string())
    }

    async fn get_knowledge(&self, _knowledge_type: &str, _query: &str) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_completed_workflow_is_recorded_in_knowledge_store() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::ContentOptimization).await;
    register_agents(&store, WorkflowType::ContentOptimization).await;
    let knowledge = Arc::new(RecordingKnowledgeStore::default());

    let outcome = executor(&store, WorkflowType::ContentOptimization, scripted())
        .with_knowledge_store(knowledge.clone(), Duration::from_secs(1))
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let entries = knowledge.entries.lock();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "workflow_results");
    assert_eq!(entries[0].1["workflow_id"], workflow.workflow_id.as_str());
}

#[tokio::test]
async fn test_fallback_agent_at_capacity_keeps_its_load() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::ContentOptimization).await;
    let agents = register_agents(&store, WorkflowType::ContentOptimization).await;

    // The only analyst is saturated by work from elsewhere
    let analyst_id = agents
        .iter()
        .find(|a| a.has_capability("content_analysis"))
        .unwrap()
        .agent_id
        .clone();
    let mut analyst = store.get_agent(&analyst_id).await.unwrap().unwrap();
    analyst.max_concurrent_tasks = 1;
    analyst.assign_task().unwrap();
    assert_eq!(analyst.status, AgentStatus::Busy);
    store.save_agent(&analyst).await.unwrap();

    let outcome = executor(&store, WorkflowType::ContentOptimization, scripted())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let analyst = store.get_agent(&analyst_id).await.unwrap().unwrap();
    assert_eq!(analyst.current_task_count, 1);
    assert_eq!(analyst.status, AgentStatus::Busy);
    // The outcome still counts towards its metrics
    assert_eq!(analyst.error_rate(), 0.0);

    let task = store
        .latest_task_of_type(&workflow.workflow_id, "content_analysis")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.agent_id.as_deref(), Some(analyst_id.as_str()));
    assert!(!task.holds_agent_slot);
}

#[tokio::test]
async fn test_in_flight_task_never_submitted_is_resubmitted() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::ContentOptimization).await;
    let agents = register_agents(&store, WorkflowType::ContentOptimization).await;
    let analyst = agents
        .iter()
        .find(|a| a.has_capability("content_analysis"))
        .unwrap();

    // Stored as running, but the execution stopped before handing it over
    let mut stranded = Task::new(
        &workflow.workflow_id,
        &workflow.project_id,
        "content_analysis",
        "Content Analysis",
    )
    .with_agent(&analyst.agent_id);
    stranded.start().unwrap();
    assert!(store.save_task(&stranded).await.unwrap());

    let dispatch = scripted();
    let outcome = executor(&store, WorkflowType::ContentOptimization, dispatch.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();
    assert!(outcome.is_completed());

    assert_eq!(
        dispatch.submitted(),
        vec![
            "content_analysis",
            "optimization_suggestions",
            "apply_optimizations",
            "validate_results"
        ]
    );
    let task = store.get_task(&stranded.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.submitted_at.is_some());

    // No duplicate task was created for the stage
    let tasks = store
        .list_tasks(&TaskFilter::for_workflow(&workflow.workflow_id))
        .await
        .unwrap();
    assert_eq!(tasks.iter().filter(|t| t.task_type == "content_analysis").count(), 1);

    let analyst = store.get_agent(&analyst.agent_id).await.unwrap().unwrap();
    assert_eq!(analyst.current_task_count, 0);
}

#[tokio::test]
async fn test_submitted_in_flight_task_is_not_resubmitted() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::ContentOptimization).await;
    register_agents(&store, WorkflowType::ContentOptimization).await;
    let deferred = Arc::new(DeferredDispatch::new());

    let outcome = executor(&store, WorkflowType::ContentOptimization, deferred.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();
    assert!(!outcome.is_completed());
    assert_eq!(deferred.submissions().len(), 1);

    // A second pass waits on the handed-over task instead of submitting again
    let outcome = executor(&store, WorkflowType::ContentOptimization, deferred.clone())
        .execute(&workflow, outcome.context().clone())
        .await
        .unwrap();
    assert!(!outcome.is_completed());
    assert_eq!(deferred.submissions().len(), 1);
}

#[tokio::test]
async fn test_fork_branches_run_concurrently() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;
    let dispatch = Arc::new(ScriptedDispatch::new().with_delay(Duration::from_millis(25)));

    let outcome = executor(&store, WorkflowType::Production, dispatch.clone())
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    // Visual and voice were awaited at the same time; no other level overlaps
    assert_eq!(dispatch.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_fork_level_records_branch_stage() {
    let store = StateStore::in_memory();
    let workflow = running_workflow(&store, WorkflowType::Production).await;
    register_agents(&store, WorkflowType::Production).await;
    let dispatch = Arc::new(ScriptedDispatch::new().script(StageKind::VisualGeneration, DispatchOutcome::Pending));

    let outcome = executor(&store, WorkflowType::Production, dispatch)
        .execute(&workflow, fresh_context(&workflow))
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Interrupted { ref stage, .. } if stage == "visual_generation"));

    let stored = store.get_workflow(&workflow.workflow_id).await.unwrap().unwrap();
    let stage = stored.current_stage.as_deref().unwrap();
    assert!(
        stage == "visual_generation" || stage == "voice_generation",
        "workflow still reports {stage}"
    );

    let context = outcome.context();
    assert_ne!(context.current_stage.as_deref(), Some("scene_planning"));
    assert_eq!(context.previous_stage.as_deref(), Some("scene_planning"));
}
