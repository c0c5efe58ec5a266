//! Guard conditions checked after a transition is structurally allowed.

use crate::error::{OrchestratorError, Result};

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition is allowed for the entity
    fn check(&self, entity: &T) -> Result<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Snapshot of the retry counters a task carries
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Guard that bounds `failed -> retrying` by the task's retry budget
pub struct RetryBudgetGuard;

impl StateGuard<RetryBudget> for RetryBudgetGuard {
    fn check(&self, budget: &RetryBudget) -> Result<()> {
        if budget.retry_count >= budget.max_retries {
            return Err(OrchestratorError::Validation(format!(
                "retry budget exhausted ({}/{})",
                budget.retry_count, budget.max_retries
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Task must have retry budget remaining"
    }
}

/// Current and maximum concurrent load of an agent
#[derive(Debug, Clone, Copy)]
pub struct AgentLoad {
    pub current: u32,
    pub max: u32,
}

/// Guard that keeps an agent's load within its concurrency limit
pub struct AgentCapacityGuard;

impl StateGuard<AgentLoad> for AgentCapacityGuard {
    fn check(&self, load: &AgentLoad) -> Result<()> {
        if load.current >= load.max {
            return Err(OrchestratorError::Validation(format!(
                "agent at capacity ({}/{})",
                load.current, load.max
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Agent must have spare concurrency"
    }
}
