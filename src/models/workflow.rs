//! # Workflow Model
//!
//! One end-to-end production or optimization run. The persisted record is the
//! source of truth for lifecycle status; executions only hold copies.
//!
//! Status changes go through [`Workflow::apply`], which resolves the target via
//! [`WorkflowStateMachine`] and records the outcome of terminal transitions.

use super::JsonMap;
use crate::constants::DEFAULT_WORKFLOW_PRIORITY;
use crate::error::{OrchestratorError, Result};
use crate::state_machine::{WorkflowEvent, WorkflowStateMachine, WorkflowStatus};
use crate::validation::{validate_uuid, validate_json_bag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Supported workflow types, each mapped to a fixed stage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// script, scene plan, parallel visual/voice, assembly, review, finalize
    #[serde(alias = "movie_creation")]
    Production,
    /// analyze, suggest, apply, validate
    #[serde(alias = "content_generation")]
    ContentOptimization,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 2] = [Self::Production, Self::ContentOptimization];
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::ContentOptimization => write!(f, "content_optimization"),
        }
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "production" | "movie_creation" => Ok(Self::Production),
            "content_optimization" | "content_generation" => Ok(Self::ContentOptimization),
            _ => Err(format!("Invalid workflow type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub project_id: String,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Name of the stage most recently entered
    #[serde(default)]
    pub current_stage: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub target_duration_minutes: Option<u32>,
    #[serde(default)]
    pub style_preferences: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub assigned_agents: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(project_id: impl Into<String>, workflow_type: WorkflowType, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            workflow_type,
            status: WorkflowStatus::Pending,
            current_stage: None,
            title: title.into(),
            description: String::new(),
            genre: None,
            target_duration_minutes: None,
            style_preferences: JsonMap::new(),
            metadata: JsonMap::new(),
            priority: DEFAULT_WORKFLOW_PRIORITY,
            progress_percentage: 0.0,
            assigned_agents: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_style_preference(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.style_preferences.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_uuid("workflow_id", &self.workflow_id)?;
        validate_uuid("project_id", &self.project_id)?;
        if self.title.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "workflow title must not be empty".to_string(),
            ));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(OrchestratorError::Validation(format!(
                "workflow priority must be within 1..=10, got {}",
                self.priority
            )));
        }
        if !(0.0..=100.0).contains(&self.progress_percentage) {
            return Err(OrchestratorError::Validation(format!(
                "progress_percentage out of range: {}",
                self.progress_percentage
            )));
        }
        if self.target_duration_minutes == Some(0) {
            return Err(OrchestratorError::Validation(
                "target_duration_minutes must be at least 1".to_string(),
            ));
        }
        validate_json_bag("style_preferences", &serde_json::Value::Object(self.style_preferences.clone()))?;
        validate_json_bag("metadata", &serde_json::Value::Object(self.metadata.clone()))
    }

    /// Apply a lifecycle event, returning the new status
    pub fn apply(&mut self, event: WorkflowEvent) -> Result<WorkflowStatus> {
        let target = WorkflowStateMachine::determine_target_state(self.status, &event)?;
        let now = Utc::now();

        match &event {
            WorkflowEvent::Start => {
                self.started_at.get_or_insert(now);
                self.error_message = None;
                self.completed_at = None;
            }
            WorkflowEvent::Complete => {
                self.progress_percentage = 100.0;
                self.completed_at = Some(now);
            }
            WorkflowEvent::Fail(message) => {
                self.error_message = Some(message.clone());
                self.completed_at = Some(now);
            }
            WorkflowEvent::Cancel => {
                self.completed_at = Some(now);
            }
            WorkflowEvent::Pause | WorkflowEvent::Resume => {}
        }

        self.status = target;
        self.updated_at = now;
        Ok(target)
    }

    pub fn start(&mut self) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Start)
    }

    pub fn pause(&mut self) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Pause)
    }

    pub fn resume(&mut self) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Resume)
    }

    pub fn complete(&mut self) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Complete)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Fail(message.into()))
    }

    pub fn cancel(&mut self) -> Result<WorkflowStatus> {
        self.apply(WorkflowEvent::Cancel)
    }

    /// Raise progress; never lowers it. Returns whether the value changed.
    pub fn advance_progress(&mut self, percentage: f64) -> bool {
        let clamped = percentage.clamp(0.0, 100.0);
        if clamped > self.progress_percentage {
            self.progress_percentage = clamped;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    pub fn set_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = Some(stage.into());
        self.updated_at = Utc::now();
    }

    pub fn assign_agent(&mut self, agent_id: &str) {
        if !self.assigned_agents.iter().any(|a| a == agent_id) {
            self.assigned_agents.push(agent_id.to_string());
            self.updated_at = Utc::now();
        }
    }
}
