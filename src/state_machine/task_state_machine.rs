use super::events::TaskEvent;
use super::guards::{RetryBudget, RetryBudgetGuard, StateGuard};
use super::states::TaskStatus;
use crate::error::{OrchestratorError, Result};

/// Task status transition rules
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(current_state: TaskStatus, event: &TaskEvent) -> Result<TaskStatus> {
        let target = match (current_state, event) {
            // Start transitions
            (TaskStatus::Pending, TaskEvent::Start) => TaskStatus::Running,
            (TaskStatus::Retrying, TaskEvent::Start) => TaskStatus::Running,

            (TaskStatus::Running, TaskEvent::Complete) => TaskStatus::Completed,

            // Failure transitions
            (TaskStatus::Running, TaskEvent::Fail(_)) => TaskStatus::Failed,
            (TaskStatus::Retrying, TaskEvent::Fail(_)) => TaskStatus::Failed,

            (TaskStatus::Failed, TaskEvent::Retry) => TaskStatus::Retrying,

            // Cancel transitions
            (from, TaskEvent::Cancel) if !from.is_terminal() => TaskStatus::Cancelled,

            (from, event) => {
                return Err(OrchestratorError::invalid_transition(
                    "task",
                    from,
                    event.target_status(),
                ))
            }
        };

        Ok(target)
    }

    /// Resolve the target state and check guards for the transition
    pub fn transition(current_state: TaskStatus, event: &TaskEvent, budget: RetryBudget) -> Result<TaskStatus> {
        let target = Self::determine_target_state(current_state, event)?;

        if let (TaskStatus::Failed, TaskStatus::Retrying) = (current_state, target) {
            RetryBudgetGuard.check(&budget)?;
        }

        Ok(target)
    }
}
