//! # Execution Context
//!
//! Mutable scratchpad threaded through the stage handlers of one workflow
//! execution. Persisted records are append-only: [`ExecutionContext::checkpoint`]
//! yields a successor with a fresh id instead of rewriting the stored one, so
//! every earlier checkpoint stays inspectable.

use super::stage::{StageKind, StageResult};
use super::JsonMap;
use crate::validation::validate_uuid;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub label: String,
    pub sequence: u64,
    /// Id of the context record written for this checkpoint
    pub context_id: String,
    pub completed_stages: Vec<StageKind>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    pub message: String,
    #[serde(default)]
    pub stage: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub context_id: String,
    pub workflow_id: String,
    pub project_id: String,
    /// Position in the workflow's checkpoint chain, starting at 0
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub supersedes: Option<String>,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub previous_stage: Option<String>,
    #[serde(default)]
    pub variables: JsonMap,
    #[serde(default)]
    pub shared_data: JsonMap,
    #[serde(default)]
    pub execution_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub active_agents: BTreeSet<String>,
    #[serde(default)]
    pub completed_agents: BTreeSet<String>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub failed_tasks: Vec<String>,
    #[serde(default)]
    pub stage_results: BTreeMap<StageKind, StageResult>,
    #[serde(default)]
    pub completed_stages: BTreeSet<StageKind>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub error_state: Option<ErrorState>,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checkpoint: Option<DateTime<Utc>>,
}

/// Counts reported alongside workflow status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub context_id: String,
    pub sequence: u64,
    pub current_stage: Option<String>,
    pub completed_stages: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub active_agents: usize,
    pub checkpoints: usize,
    pub retry_attempts: u32,
    pub has_error: bool,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            context_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            sequence: 0,
            supersedes: None,
            current_stage: None,
            previous_stage: None,
            variables: JsonMap::new(),
            shared_data: JsonMap::new(),
            execution_history: Vec::new(),
            active_agents: BTreeSet::new(),
            completed_agents: BTreeSet::new(),
            pending_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            stage_results: BTreeMap::new(),
            completed_stages: BTreeSet::new(),
            checkpoints: Vec::new(),
            error_state: None,
            retry_attempts: 0,
            performance_metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_checkpoint: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_uuid("context_id", &self.context_id)?;
        validate_uuid("workflow_id", &self.workflow_id)?;
        validate_uuid("project_id", &self.project_id)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Enter a stage; the current stage becomes the previous one
    pub fn update_stage(&mut self, stage: impl Into<String>) {
        self.previous_stage = self.current_stage.take();
        self.current_stage = Some(stage.into());
        self.touch();
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
        self.touch();
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_shared(&mut self, key: impl Into<String>, value: Value) {
        self.shared_data.insert(key.into(), value);
        self.touch();
    }

    pub fn shared(&self, key: &str) -> Option<&Value> {
        self.shared_data.get(key)
    }

    pub fn add_history(&mut self, event: &str, stage: Option<StageKind>, details: Option<String>) {
        self.execution_history.push(HistoryEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            stage: stage.map(|s| s.to_string()),
            details,
        });
        self.touch();
    }

    pub fn mark_agent_active(&mut self, agent_id: &str) {
        self.active_agents.insert(agent_id.to_string());
        self.touch();
    }

    pub fn mark_agent_completed(&mut self, agent_id: &str) {
        self.active_agents.remove(agent_id);
        self.completed_agents.insert(agent_id.to_string());
        self.touch();
    }

    pub fn add_pending_task(&mut self, task_id: &str) {
        if !self.pending_tasks.iter().any(|t| t == task_id) {
            self.pending_tasks.push(task_id.to_string());
        }
        self.touch();
    }

    pub fn mark_task_completed(&mut self, task_id: &str) {
        self.pending_tasks.retain(|t| t != task_id);
        if !self.completed_tasks.iter().any(|t| t == task_id) {
            self.completed_tasks.push(task_id.to_string());
        }
        self.touch();
    }

    pub fn mark_task_failed(&mut self, task_id: &str) {
        self.pending_tasks.retain(|t| t != task_id);
        if !self.failed_tasks.iter().any(|t| t == task_id) {
            self.failed_tasks.push(task_id.to_string());
        }
        self.touch();
    }

    pub fn record_stage_result(&mut self, result: StageResult) {
        self.stage_results.insert(result.stage(), result);
        self.touch();
    }

    pub fn stage_result(&self, stage: StageKind) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    pub fn mark_stage_completed(&mut self, stage: StageKind) {
        self.completed_stages.insert(stage);
        self.touch();
    }

    pub fn is_stage_completed(&self, stage: StageKind) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn set_error(&mut self, message: impl Into<String>, stage: Option<StageKind>) {
        self.error_state = Some(ErrorState {
            message: message.into(),
            stage: stage.map(|s| s.to_string()),
            occurred_at: Utc::now(),
        });
        self.touch();
    }

    pub fn clear_error(&mut self) {
        self.error_state = None;
        self.touch();
    }

    pub fn increment_retry(&mut self) {
        self.retry_attempts += 1;
        self.touch();
    }

    pub fn record_metric(&mut self, name: impl Into<String>, value: f64) {
        self.performance_metrics.insert(name.into(), value);
        self.touch();
    }

    /// Successor record capturing the current state under a new id
    pub fn checkpoint(&self, label: &str) -> ExecutionContext {
        let now = Utc::now();
        let mut next = self.clone();
        next.context_id = Uuid::new_v4().to_string();
        next.sequence = self.sequence + 1;
        next.supersedes = Some(self.context_id.clone());
        next.checkpoints.push(Checkpoint {
            label: label.to_string(),
            sequence: next.sequence,
            context_id: next.context_id.clone(),
            completed_stages: self.completed_stages.iter().copied().collect(),
            created_at: now,
        });
        next.last_checkpoint = Some(now);
        next.updated_at = now;
        next
    }

    /// Fold concurrently executed branches back into the context they forked from
    pub fn join(base: ExecutionContext, branches: Vec<ExecutionContext>) -> ExecutionContext {
        let history_base = base.execution_history.len();
        let fork_stage = base.current_stage.clone();
        let mut branch_stage = None;
        let mut joined = base;

        for branch in branches {
            if branch.current_stage.is_some() && branch.current_stage != fork_stage {
                branch_stage = branch.current_stage.clone();
            }
            joined
                .execution_history
                .extend(branch.execution_history.into_iter().skip(history_base));
            joined.shared_data.extend(branch.shared_data);
            joined.variables.extend(branch.variables);
            joined.active_agents.extend(branch.active_agents);
            joined.completed_agents.extend(branch.completed_agents);
            for task_id in branch.pending_tasks {
                joined.add_pending_task(&task_id);
            }
            for task_id in branch.completed_tasks {
                joined.mark_task_completed(&task_id);
            }
            for task_id in branch.failed_tasks {
                joined.mark_task_failed(&task_id);
            }
            joined.stage_results.extend(branch.stage_results);
            joined.completed_stages.extend(branch.completed_stages);
            joined.performance_metrics.extend(branch.performance_metrics);
            if branch.error_state.is_some() {
                joined.error_state = branch.error_state;
            }
        }

        // The last branch's stage stands for the joined level
        if branch_stage.is_some() {
            joined.current_stage = branch_stage;
            joined.previous_stage = fork_stage;
        }

        // Agents that finished in one branch are no longer active
        let finished: Vec<String> = joined.completed_agents.iter().cloned().collect();
        for agent_id in finished {
            joined.active_agents.remove(&agent_id);
        }
        joined.execution_history.sort_by_key(|entry| entry.timestamp);
        joined.touch();
        joined
    }

    pub fn execution_summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            context_id: self.context_id.clone(),
            sequence: self.sequence,
            current_stage: self.current_stage.clone(),
            completed_stages: self.completed_stages.len(),
            pending_tasks: self.pending_tasks.len(),
            completed_tasks: self.completed_tasks.len(),
            failed_tasks: self.failed_tasks.len(),
            active_agents: self.active_agents.len(),
            checkpoints: self.checkpoints.len(),
            retry_attempts: self.retry_attempts,
            has_error: self.error_state.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::{ScriptOutput, VoiceTrack};
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4().to_string(), Uuid::new_v4().to_string())
    }

    #[test]
    fn test_update_stage_shifts_previous() {
        let mut ctx = context();
        ctx.update_stage("script_generation");
        ctx.update_stage("scene_planning");
        assert_eq!(ctx.previous_stage.as_deref(), Some("script_generation"));
        assert_eq!(ctx.current_stage.as_deref(), Some("scene_planning"));
    }

    #[test]
    fn test_task_lists_move_ids() {
        let mut ctx = context();
        ctx.add_pending_task("t1");
        ctx.add_pending_task("t2");
        ctx.mark_task_completed("t1");
        ctx.mark_task_failed("t2");
        assert!(ctx.pending_tasks.is_empty());
        assert_eq!(ctx.completed_tasks, vec!["t1".to_string()]);
        assert_eq!(ctx.failed_tasks, vec!["t2".to_string()]);
    }

    #[test]
    fn test_checkpoint_supersedes_without_mutation() {
        let mut ctx = context();
        ctx.mark_stage_completed(StageKind::ScriptGeneration);
        let original = ctx.clone();

        let next = ctx.checkpoint("after_script");
        assert_eq!(ctx, original);
        assert_ne!(next.context_id, ctx.context_id);
        assert_eq!(next.sequence, 1);
        assert_eq!(next.supersedes.as_deref(), Some(ctx.context_id.as_str()));
        assert_eq!(next.checkpoints.len(), 1);
        assert_eq!(next.checkpoints[0].context_id, next.context_id);
        assert_eq!(
            next.checkpoints[0].completed_stages,
            vec![StageKind::ScriptGeneration]
        );
        assert!(next.last_checkpoint.is_some());
    }

    #[test]
    fn test_join_merges_branches() {
        let mut base = context();
        base.update_stage("scene_planning");
        base.add_history("stage.completed", Some(StageKind::ScenePlanning), None);

        let mut visual = base.clone();
        visual.update_stage("visual_generation");
        visual.add_pending_task("visual_1");
        visual.mark_agent_active("painter");
        visual.mark_stage_completed(StageKind::VisualGeneration);
        visual.add_history("stage.completed", Some(StageKind::VisualGeneration), None);

        let mut voice = base.clone();
        voice.update_stage("voice_generation");
        voice.add_pending_task("voice_1");
        voice.mark_task_completed("voice_1");
        voice.mark_agent_completed("narrator");
        voice.record_stage_result(StageResult::Voice(VoiceTrack {
            audio_uri: "s3://voice.wav".into(),
            duration_seconds: None,
            voice: None,
        }));
        voice.mark_stage_completed(StageKind::VoiceGeneration);
        voice.add_history("stage.completed", Some(StageKind::VoiceGeneration), None);

        let joined = ExecutionContext::join(base, vec![visual, voice]);
        assert_eq!(joined.execution_history.len(), 3);
        assert_eq!(joined.pending_tasks, vec!["visual_1".to_string()]);
        assert_eq!(joined.completed_tasks, vec!["voice_1".to_string()]);
        assert!(joined.active_agents.contains("painter"));
        assert!(joined.completed_agents.contains("narrator"));
        assert!(joined.is_stage_completed(StageKind::VisualGeneration));
        assert!(joined.is_stage_completed(StageKind::VoiceGeneration));
        assert!(joined.stage_result(StageKind::VoiceGeneration).is_some());
        assert_eq!(joined.current_stage.as_deref(), Some("voice_generation"));
        assert_eq!(joined.previous_stage.as_deref(), Some("scene_planning"));
    }

    #[test]
    fn test_serde_round_trip_keeps_stage_maps() {
        let mut ctx = context();
        ctx.record_stage_result(StageResult::Script(ScriptOutput {
            script: "FADE IN".into(),
            outline: vec![],
            word_count: None,
        }));
        ctx.mark_stage_completed(StageKind::ScriptGeneration);
        ctx.set_shared("final_results", json!({"ok": true}));

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"script_generation\""));
        let parsed: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }

    #[test]
    fn test_summary_counts() {
        let mut ctx = context();
        ctx.add_pending_task("t1");
        ctx.set_error("boom", Some(StageKind::VideoAssembly));
        let summary = ctx.execution_summary();
        assert_eq!(summary.pending_tasks, 1);
        assert!(summary.has_error);
        assert_eq!(summary.sequence, 0);
    }
}
