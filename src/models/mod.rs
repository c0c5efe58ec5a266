//! # Data Models
//!
//! Records persisted by the state store. All of them serialize to JSON and
//! carry UTC timestamps; lifecycle changes are validated by the state machines.

pub mod agent;
pub mod execution_context;
pub mod project;
pub mod stage;
pub mod task;
pub mod workflow;

/// Free-form JSON object used for parameter, metadata and configuration bags
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub use agent::{Agent, AgentCategory};
pub use execution_context::{Checkpoint, ErrorState, ExecutionContext, ExecutionSummary, HistoryEntry};
pub use project::Project;
pub use stage::{StageKind, StageResult};
pub use task::{Task, TaskPriority};
pub use workflow::{Workflow, WorkflowType};
