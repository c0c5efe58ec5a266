//! # Orchestrator Errors
//!
//! Error taxonomy shared by every layer of the engine. Transport failures of the
//! key-value backend never surface here directly; the [`StateStore`] boundary
//! converts them into `false`/`None` results and only reports
//! [`OrchestratorError::NotConnected`] and [`OrchestratorError::Validation`].
//!
//! [`StateStore`]: crate::state_store::StateStore

use thiserror::Error;

/// Errors raised by the orchestration engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// Malformed entity, rejected before persistence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation on a record that does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Lifecycle or task-status transition attempted from a forbidding state
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// A stage's dependency has not completed yet
    #[error("Prerequisite {prerequisite} not met for stage {stage}: {reason}")]
    PrerequisiteNotMet {
        stage: String,
        prerequisite: String,
        reason: String,
    },

    /// No candidate agent advertises the required capability
    #[error("No agent available for capability {capability}")]
    AgentUnavailable { capability: String },

    /// Connectivity failure to the durable store
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// Operation requiring a live connection invoked before `connect()`
    #[error("State store is not connected")]
    NotConnected,

    /// Lock is held by another owner
    #[error("Lock contention on resource {resource}")]
    LockContention { resource: String },

    /// A stage's worker reported failure or returned an unusable payload
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// External collaborator (execution backend, knowledge store) error
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Execution was stopped by pause, cancel or shutdown
    #[error("Execution cancelled for workflow {0}")]
    Cancelled(String),
}

impl OrchestratorError {
    /// Control-flow signals that halt an execution without failing the workflow
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            Self::PrerequisiteNotMet { .. } | Self::Cancelled(_)
        )
    }

    /// Expected, non-exceptional outcomes
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        entity: &str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<::config::ConfigError> for OrchestratorError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
