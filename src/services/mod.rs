//! Services used by the stage runner: agent selection and the knowledge store
//! collaborator.

pub mod agent_selector;
pub mod knowledge;

pub use agent_selector::AgentSelector;
pub use knowledge::{KnowledgeStore, NoOpKnowledgeStore, TimedKnowledgeStore};
