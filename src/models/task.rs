use super::JsonMap;
use crate::constants::DEFAULT_TASK_MAX_RETRIES;
use crate::error::Result;
use crate::state_machine::{RetryBudget, TaskEvent, TaskStateMachine, TaskStatus};
use crate::validation::{validate_json_bag, validate_key_segment, validate_tag, validate_uuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    /// Map a workflow's 1-10 priority onto task priority bands
    pub fn from_workflow_priority(priority: u8) -> Self {
        match priority {
            0..=3 => Self::Low,
            4..=6 => Self::Medium,
            7..=8 => Self::High,
            _ => Self::Urgent,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// A unit of work produced by a stage and assigned to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub workflow_id: String,
    pub project_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Stage name that produced the task, e.g. `script_generation`
    pub task_type: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub parameters: JsonMap,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    /// Task ids that must complete before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_duration_seconds: Option<f64>,
    /// Whether the assigned agent's load counter includes this task
    #[serde(default)]
    pub holds_agent_slot: bool,
    /// When the task was handed to its worker; unset until submission succeeds
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        workflow_id: impl Into<String>,
        project_id: impl Into<String>,
        task_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let task_type = task_type.into();
        let now = Utc::now();
        Self {
            task_id: format!("{task_type}_{}", Uuid::new_v4().simple()),
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            agent_id: None,
            name: name.into(),
            description: String::new(),
            task_type,
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            parameters: JsonMap::new(),
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_TASK_MAX_RETRIES,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            actual_duration_seconds: None,
            holds_agent_slot: false,
            submitted_at: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: JsonMap) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_key_segment("task_id", &self.task_id)?;
        validate_uuid("workflow_id", &self.workflow_id)?;
        validate_uuid("project_id", &self.project_id)?;
        validate_tag("task_type", &self.task_type)?;
        if let Some(agent_id) = &self.agent_id {
            validate_key_segment("agent_id", agent_id)?;
        }
        validate_json_bag("parameters", &Value::Object(self.parameters.clone()))?;
        if let Some(result) = &self.result {
            validate_json_bag("result", result)?;
        }
        Ok(())
    }

    fn transition(&mut self, event: TaskEvent) -> Result<TaskStatus> {
        let budget = RetryBudget {
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        };
        let target = TaskStateMachine::transition(self.status, &event, budget)?;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(target)
    }

    pub fn start(&mut self) -> Result<TaskStatus> {
        let status = self.transition(TaskEvent::Start)?;
        self.started_at = Some(self.updated_at);
        Ok(status)
    }

    pub fn complete(&mut self, result: Value) -> Result<TaskStatus> {
        let status = self.transition(TaskEvent::Complete)?;
        let now = self.updated_at;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.actual_duration_seconds = self
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 1000.0);
        Ok(status)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<TaskStatus> {
        let status = self.transition(TaskEvent::Fail(String::new()))?;
        self.error_message = Some(message.into());
        self.completed_at = Some(self.updated_at);
        Ok(status)
    }

    /// Re-queue a failed task, consuming one unit of retry budget
    pub fn retry(&mut self) -> Result<TaskStatus> {
        let status = self.transition(TaskEvent::Retry)?;
        self.retry_count += 1;
        self.error_message = None;
        self.completed_at = None;
        self.submitted_at = None;
        Ok(status)
    }

    pub fn mark_submitted(&mut self) {
        let now = Utc::now();
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    /// In flight but never handed to a worker
    pub fn needs_submission(&self) -> bool {
        self.status.is_in_flight() && self.submitted_at.is_none()
    }

    pub fn cancel(&mut self) -> Result<TaskStatus> {
        let status = self.transition(TaskEvent::Cancel)?;
        self.completed_at = Some(self.updated_at);
        Ok(status)
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn dependencies_satisfied(&self, completed_task_ids: &[String]) -> bool {
        self.dependencies
            .iter()
            .all(|dep| completed_task_ids.contains(dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use serde_json::json;

    fn task() -> Task {
        Task::new(
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            "script_generation",
            "Script Generation",
        )
    }

    #[test]
    fn test_new_task_defaults() {
        let task = task();
        assert!(task.task_id.starts_with("script_generation_"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, 3);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_complete_records_result_and_duration() {
        let mut task = task();
        task.start().unwrap();
        task.complete(json!({"script": "INT. STUDIO - DAY"})).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.actual_duration_seconds.unwrap() >= 0.0);
        assert_eq!(task.result, Some(json!({"script": "INT. STUDIO - DAY"})));
    }

    #[test]
    fn test_complete_from_pending_fails_loudly() {
        let mut task = task();
        let err = task.complete(json!({})).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_retry_cycle_consumes_budget() {
        let mut task = task();
        task.max_retries = 1;
        task.start().unwrap();
        task.fail("timeout").unwrap();
        assert!(task.can_retry());
        task.retry().unwrap();
        assert_eq!(task.retry_count, 1);
        task.start().unwrap();
        task.fail("timeout again").unwrap();
        assert!(!task.can_retry());
        assert!(task.retry().is_err());
        assert_eq!(task.error_message.as_deref(), Some("timeout again"));
    }

    #[test]
    fn test_submission_tracking() {
        let mut task = task();
        task.start().unwrap();
        assert!(task.needs_submission());
        task.mark_submitted();
        assert!(!task.needs_submission());

        task.fail("worker lost").unwrap();
        assert!(!task.needs_submission());
        task.retry().unwrap();
        assert!(task.submitted_at.is_none());
        assert!(task.needs_submission());
    }

    #[test]
    fn test_cancel_rejected_after_completion() {
        let mut task = task();
        task.start().unwrap();
        task.complete(json!(null)).unwrap();
        assert!(task.cancel().is_err());
    }

    #[test]
    fn test_dependencies_satisfied() {
        let task = task().with_dependencies(vec!["a".into(), "b".into()]);
        assert!(!task.dependencies_satisfied(&["a".to_string()]));
        assert!(task.dependencies_satisfied(&["b".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_priority_bands() {
        assert_eq!(TaskPriority::from_workflow_priority(1), TaskPriority::Low);
        assert_eq!(TaskPriority::from_workflow_priority(5), TaskPriority::Medium);
        assert_eq!(TaskPriority::from_workflow_priority(8), TaskPriority::High);
        assert_eq!(TaskPriority::from_workflow_priority(10), TaskPriority::Urgent);
    }
}
