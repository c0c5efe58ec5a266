// State machine module for workflow orchestration
//
// Pure transition rules for workflows and tasks. Records carry their own status;
// the model methods resolve the target here and apply it, so every status change
// in the engine goes through one validated table.

pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;
pub mod workflow_state_machine;

// Re-export main types for convenient access
pub use events::{TaskEvent, WorkflowEvent};
pub use guards::{AgentCapacityGuard, AgentLoad, RetryBudget, RetryBudgetGuard, StateGuard};
pub use states::{AgentStatus, TaskStatus, WorkflowStatus};
pub use task_state_machine::TaskStateMachine;
pub use workflow_state_machine::WorkflowStateMachine;
