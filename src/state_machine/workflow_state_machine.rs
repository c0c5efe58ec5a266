use super::events::WorkflowEvent;
use super::states::WorkflowStatus;
use crate::error::{OrchestratorError, Result};

/// Workflow lifecycle transition rules
///
/// Stateless: the current status lives on the persisted `Workflow` record, so
/// callers resolve the target here and apply it to the record they hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: WorkflowStatus,
        event: &WorkflowEvent,
    ) -> Result<WorkflowStatus> {
        let target = match (current_state, event) {
            // Start transitions
            (WorkflowStatus::Pending, WorkflowEvent::Start)
            | (WorkflowStatus::Paused, WorkflowEvent::Start)
            | (WorkflowStatus::Failed, WorkflowEvent::Start) => WorkflowStatus::Running,

            (WorkflowStatus::Running, WorkflowEvent::Pause) => WorkflowStatus::Paused,
            (WorkflowStatus::Paused, WorkflowEvent::Resume) => WorkflowStatus::Running,

            // Terminal outcomes of an execution
            (WorkflowStatus::Running, WorkflowEvent::Complete) => WorkflowStatus::Completed,
            (WorkflowStatus::Running, WorkflowEvent::Fail(_)) => WorkflowStatus::Failed,

            // Cancel from any non-terminal state
            (from, WorkflowEvent::Cancel) if !from.is_terminal() => WorkflowStatus::Cancelled,

            (from, event) => {
                return Err(OrchestratorError::invalid_transition(
                    "workflow",
                    from,
                    event.target_status(),
                ))
            }
        };

        Ok(target)
    }

    pub fn can_transition(current_state: WorkflowStatus, event: &WorkflowEvent) -> bool {
        Self::determine_target_state(current_state, event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_only_from_startable_states() {
        for status in WorkflowStatus::ALL {
            let result = WorkflowStateMachine::determine_target_state(status, &WorkflowEvent::Start);
            if status.is_startable() {
                assert_eq!(result, Ok(WorkflowStatus::Running));
            } else {
                assert!(result.is_err(), "start accepted from {status}");
            }
        }
    }

    #[test]
    fn test_pause_resume_cycle() {
        let paused =
            WorkflowStateMachine::determine_target_state(WorkflowStatus::Running, &WorkflowEvent::Pause)
                .unwrap();
        assert_eq!(paused, WorkflowStatus::Paused);
        assert!(WorkflowStateMachine::determine_target_state(paused, &WorkflowEvent::Pause).is_err());
        assert_eq!(
            WorkflowStateMachine::determine_target_state(paused, &WorkflowEvent::Resume),
            Ok(WorkflowStatus::Running)
        );
        assert!(WorkflowStateMachine::determine_target_state(
            WorkflowStatus::Running,
            &WorkflowEvent::Resume
        )
        .is_err());
    }

    #[test]
    fn test_cancel_rejected_from_terminal_states() {
        for status in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert!(!WorkflowStateMachine::can_transition(status, &WorkflowEvent::Cancel));
        }
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
        ] {
            assert_eq!(
                WorkflowStateMachine::determine_target_state(status, &WorkflowEvent::Cancel),
                Ok(WorkflowStatus::Cancelled)
            );
        }
    }

    #[test]
    fn test_invalid_transition_names_states() {
        let err = WorkflowStateMachine::determine_target_state(
            WorkflowStatus::Paused,
            &WorkflowEvent::Complete,
        )
        .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::invalid_transition("workflow", "paused", "completed")
        );
    }
}
