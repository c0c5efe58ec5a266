//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::error::Result;
use orchestrator_core::models::{Agent, AgentCategory, Project, StageKind, Task, Workflow, WorkflowType};
use orchestrator_core::orchestration::{DispatchOutcome, WorkerDispatch};
use orchestrator_core::state_machine::WorkflowStatus;
use orchestrator_core::state_store::{KvBackend, MemoryKeyValueStore, StateStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connected in-memory store whose transport can be taken offline
pub async fn faulty_store() -> (StateStore, MemoryKeyValueStore) {
    let kv = MemoryKeyValueStore::new();
    let store = StateStore::new(
        KvBackend::Memory(kv.clone()),
        &OrchestratorConfig::for_testing().store,
    );
    store.connect().await.expect("memory store connects");
    (store, kv)
}

pub async fn seed_project(store: &StateStore) -> Project {
    let project = Project::new("Night Market", "short_film");
    assert!(store.save_project(&project).await.unwrap());
    project
}

pub async fn seed_workflow(store: &StateStore, project: &Project, workflow_type: WorkflowType) -> Workflow {
    let workflow = Workflow::new(&project.project_id, workflow_type, "Night Market")
        .with_description("A lantern seller's last evening")
        .with_genre("drama");
    assert!(store.save_workflow(&workflow).await.unwrap());
    workflow
}

pub fn agent_for(stage: StageKind, error_rate: f64) -> Agent {
    let capability = stage.capability().expect("stage is performed by an agent");
    Agent::new(format!("{stage}-agent"), AgentCategory::Creative, vec![capability.to_string()])
        .with_max_concurrent_tasks(4)
        .with_error_rate(error_rate)
}

/// One agent for every agent-performed stage of `workflow_type`
pub async fn register_agents(store: &StateStore, workflow_type: WorkflowType) -> Vec<Agent> {
    let mut agents = Vec::new();
    for stage in stages_of(workflow_type) {
        if stage.capability().is_some() {
            let agent = agent_for(stage, 0.05);
            assert!(store.save_agent(&agent).await.unwrap());
            agents.push(agent);
        }
    }
    agents
}

pub fn stages_of(workflow_type: WorkflowType) -> Vec<StageKind> {
    use orchestrator_core::models::StageKind::*;
    match workflow_type {
        WorkflowType::Production => vec![
            ScriptGeneration,
            ScenePlanning,
            VisualGeneration,
            VoiceGeneration,
            VideoAssembly,
            QualityReview,
            Finalize,
        ],
        WorkflowType::ContentOptimization => vec![
            ContentAnalysis,
            OptimizationSuggestions,
            ApplyOptimizations,
            ValidateResults,
        ],
    }
}

/// A payload each stage accepts as a valid result
pub fn payload_for(stage: StageKind) -> Value {
    match stage {
        StageKind::ScriptGeneration => json!({"script": "INT. MARKET - NIGHT", "outline": ["opening"]}),
        StageKind::ScenePlanning => json!({"scenes": [{"id": 1}, {"id": 2}], "total_duration_seconds": 90.0}),
        StageKind::VisualGeneration => json!({"assets": ["s3://frames/1.png", "s3://frames/2.png"]}),
        StageKind::VoiceGeneration => json!({"audio_uri": "s3://audio/narration.wav", "duration_seconds": 88.5}),
        StageKind::VideoAssembly => json!({"video_uri": "s3://video/final.mp4"}),
        StageKind::QualityReview => json!({"score": 8.5, "approved": true}),
        StageKind::ContentAnalysis => json!({"metrics": {"readability": 61.0}}),
        StageKind::OptimizationSuggestions => json!({"suggestions": ["shorten intro"]}),
        StageKind::ApplyOptimizations => json!({"applied": ["shorten intro"]}),
        StageKind::ValidateResults => json!({"passed": true}),
        StageKind::Finalize => Value::Null,
    }
}

/// Dispatch that answers every task immediately from a per-stage script.
/// Stages without a scripted outcome complete with [`payload_for`].
#[derive(Default)]
pub struct ScriptedDispatch {
    outcomes: Mutex<HashMap<String, DispatchOutcome>>,
    submitted: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every completion by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(self, stage: StageKind, outcome: DispatchOutcome) -> Self {
        self.outcomes.lock().insert(stage.task_type().to_string(), outcome);
        self
    }

    /// Task types in submission order
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    /// Most completions awaited at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerDispatch for ScriptedDispatch {
    async fn submit(&self, _agent: &Agent, task: &Task) -> Result<()> {
        self.submitted.lock().push(task.task_type.clone());
        Ok(())
    }

    async fn await_completion(&self, task_id: &str, _timeout: Duration) -> Result<DispatchOutcome> {
        let waiting = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(waiting, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let stage = stage_of_task(task_id);
        if let Some(outcome) = self.outcomes.lock().get(stage.task_type()).cloned() {
            return Ok(outcome);
        }
        Ok(DispatchOutcome::Completed(payload_for(stage)))
    }
}

/// Task ids are prefixed with their task type
pub fn stage_of_task(task_id: &str) -> StageKind {
    WorkflowType::ALL
        .iter()
        .flat_map(|t| stages_of(*t))
        .find(|stage| task_id.starts_with(&format!("{}_", stage.task_type())))
        .expect("task id carries a known task type")
}

pub fn scripted() -> Arc<ScriptedDispatch> {
    Arc::new(ScriptedDispatch::new())
}

/// Poll until the workflow reaches `status` with no live execution
pub async fn wait_for_status(
    controller: &orchestrator_core::orchestration::OrchestratorController,
    workflow_id: &str,
    status: WorkflowStatus,
) -> orchestrator_core::orchestration::WorkflowStatusReport {
    for _ in 0..500 {
        if let Some(report) = controller.status(workflow_id).await.unwrap() {
            if report.workflow.status == status && !report.is_running {
                return report;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let last = controller.status(workflow_id).await.unwrap();
    panic!("workflow {workflow_id} never reached {status}: {last:?}");
}
