//! Shared constants for key expiry, locking and agent health.

use std::time::Duration;

/// Secondary index sets expire after a day unless refreshed by a write
pub const INDEX_TTL_SECONDS: u64 = 86_400;

/// Consecutive errors tolerated before an agent is moved to `error`
pub const AGENT_ERROR_THRESHOLD: u32 = 5;

/// Weight of the previous value in agent score moving averages
pub const SCORE_EWMA_RETAIN: f64 = 0.8;

/// Error rate assumed for agents that never reported one
pub const DEFAULT_AGENT_ERROR_RATE: f64 = 1.0;

pub const DEFAULT_TASK_MAX_RETRIES: u32 = 3;

pub const DEFAULT_WORKFLOW_PRIORITY: u8 = 5;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Lua script for atomic compare-and-delete lock release
pub const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Lifecycle event names recorded in execution history and logs
pub mod events {
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_PAUSED: &str = "workflow.paused";
    pub const WORKFLOW_RESUMED: &str = "workflow.resumed";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";
    pub const WORKFLOW_INTERRUPTED: &str = "workflow.interrupted";

    pub const STAGE_STARTED: &str = "stage.started";
    pub const STAGE_COMPLETED: &str = "stage.completed";
    pub const STAGE_DISPATCHED: &str = "stage.dispatched";
    pub const STAGE_ADOPTED: &str = "stage.adopted";

    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
}

/// Checkpoint labels written by the executor and controller
pub mod checkpoints {
    pub const RESTARTED: &str = "restarted";
    pub const RESUMED: &str = "resumed";
    pub const PAUSED: &str = "paused";
    pub const INTERRUPTED: &str = "interrupted";
    pub const FAILED: &str = "failed";
    pub const FINAL: &str = "final";
    pub const SHUTDOWN: &str = "shutdown";
}
