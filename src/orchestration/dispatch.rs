//! # Worker Dispatch
//!
//! Stages hand their work to external agents through [`WorkerDispatch`]:
//! submit a task to a chosen agent, then wait (bounded) for the outcome. The
//! engine never performs stage work itself and does not define a wire protocol;
//! agents are addressed by id and capability only.
//!
//! [`DeferredDispatch`] is the default when no transport is attached. It keeps
//! a record of submissions and always reports [`DispatchOutcome::Pending`], so
//! executions pause at the first dispatched stage and continue once a worker
//! reports back through the controller.

use crate::error::Result;
use crate::models::{Agent, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of waiting on a dispatched task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Worker finished; the payload is the stage's raw result
    Completed(Value),
    /// Worker reported failure with a reason
    Failed(String),
    /// No outcome yet
    Pending,
}

#[async_trait]
pub trait WorkerDispatch: Send + Sync {
    /// Hand `task` to `agent`
    async fn submit(&self, agent: &Agent, task: &Task) -> Result<()>;

    /// Wait up to `timeout` for the task's outcome
    async fn await_completion(&self, task_id: &str, timeout: Duration) -> Result<DispatchOutcome>;
}

/// A task handed to an agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub task_id: String,
    pub agent_id: String,
    pub task_type: String,
    pub submitted_at: DateTime<Utc>,
}

/// Dispatch without a transport: remembers submissions, never completes
#[derive(Debug, Clone, Default)]
pub struct DeferredDispatch {
    submissions: Arc<Mutex<Vec<Submission>>>,
}

impl DeferredDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl WorkerDispatch for DeferredDispatch {
    async fn submit(&self, agent: &Agent, task: &Task) -> Result<()> {
        debug!(
            task_id = %task.task_id,
            agent_id = %agent.agent_id,
            task_type = %task.task_type,
            "Task submitted for deferred execution"
        );
        self.submissions.lock().push(Submission {
            task_id: task.task_id.clone(),
            agent_id: agent.agent_id.clone(),
            task_type: task.task_type.clone(),
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    async fn await_completion(&self, _task_id: &str, _timeout: Duration) -> Result<DispatchOutcome> {
        Ok(DispatchOutcome::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentCategory;

    #[tokio::test]
    async fn test_deferred_dispatch_records_and_stays_pending() {
        let dispatch = DeferredDispatch::new();
        let agent = Agent::new("writer", AgentCategory::Creative, vec!["script_generation".to_string()]);
        let task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            uuid::Uuid::new_v4().to_string(),
            "script_generation",
            "Script Generation",
        );

        dispatch.submit(&agent, &task).await.unwrap();
        let outcome = dispatch
            .await_completion(&task.task_id, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Pending);
        let submissions = dispatch.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].agent_id, agent.agent_id);
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(DispatchOutcome::Failed("oom".to_string())).unwrap();
        assert_eq!(value, serde_json::json!({"outcome": "failed", "payload": "oom"}));
    }
}
