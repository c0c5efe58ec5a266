//! Execution backends.
//!
//! The controller runs every workflow through an [`ExecutionBackend`]. The
//! in-process [`StageGraphExecutor`](super::executor::StageGraphExecutor) is
//! always available; an external delegated backend can be plugged in through a
//! [`DelegatedBackendFactory`] and is preferred when configured. Once launched,
//! the controller treats both the same way.

use crate::error::Result;
use crate::models::{ExecutionContext, Workflow, WorkflowType};
use async_trait::async_trait;
use std::sync::Arc;

/// How an execution ended without an error
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every stage finished
    Completed(ExecutionContext),
    /// Forward progress halted at `stage`; the workflow stays resumable
    Interrupted {
        stage: String,
        reason: String,
        context: ExecutionContext,
    },
}

impl ExecutionOutcome {
    pub fn context(&self) -> &ExecutionContext {
        match self {
            Self::Completed(context) => context,
            Self::Interrupted { context, .. } => context,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &'static str;

    /// Drive `workflow` forward starting from `context`
    async fn execute(&self, workflow: &Workflow, context: ExecutionContext) -> Result<ExecutionOutcome>;
}

/// Builds external execution backends per workflow type
pub trait DelegatedBackendFactory: Send + Sync {
    fn create(&self, workflow_type: WorkflowType) -> Result<Arc<dyn ExecutionBackend>>;
}
