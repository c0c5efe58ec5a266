use super::states::{TaskStatus, WorkflowStatus};
use serde::{Deserialize, Serialize};

/// Events that can trigger workflow lifecycle transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    Start,
    Pause,
    Resume,
    /// All stages finished
    Complete,
    /// Unhandled stage error, recorded verbatim
    Fail(String),
    Cancel,
}

impl WorkflowEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// The state this event moves a workflow into when it is accepted
    pub fn target_status(&self) -> WorkflowStatus {
        match self {
            Self::Start | Self::Resume => WorkflowStatus::Running,
            Self::Pause => WorkflowStatus::Paused,
            Self::Complete => WorkflowStatus::Completed,
            Self::Fail(_) => WorkflowStatus::Failed,
            Self::Cancel => WorkflowStatus::Cancelled,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Events that can trigger task status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    Start,
    Complete,
    Fail(String),
    /// Re-queue a failed task while retry budget remains
    Retry,
    Cancel,
}

impl TaskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Start => TaskStatus::Running,
            Self::Complete => TaskStatus::Completed,
            Self::Fail(_) => TaskStatus::Failed,
            Self::Retry => TaskStatus::Retrying,
            Self::Cancel => TaskStatus::Cancelled,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
