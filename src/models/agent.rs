//! # Agent Model
//!
//! An external, capability-bearing worker. The engine never talks to agents
//! directly; it only tracks their load, health and scores so that selection
//! can prefer reliable, available workers.

use super::JsonMap;
use crate::constants::{AGENT_ERROR_THRESHOLD, DEFAULT_AGENT_ERROR_RATE, SCORE_EWMA_RETAIN};
use crate::error::{OrchestratorError, Result};
use crate::state_machine::{AgentCapacityGuard, AgentLoad, AgentStatus, StateGuard};
use crate::validation::{validate_key_segment, validate_tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const METRIC_ERROR_RATE: &str = "error_rate";
pub const METRIC_TASKS_COMPLETED: &str = "tasks_completed";
pub const METRIC_TASKS_FAILED: &str = "tasks_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Creative,
    Analytical,
    Technical,
    Coordination,
    Research,
    Content,
}

impl fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creative => write!(f, "creative"),
            Self::Analytical => write!(f, "analytical"),
            Self::Technical => write!(f, "technical"),
            Self::Coordination => write!(f, "coordination"),
            Self::Research => write!(f, "research"),
            Self::Content => write!(f, "content"),
        }
    }
}

impl std::str::FromStr for AgentCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "creative" => Ok(Self::Creative),
            "analytical" => Ok(Self::Analytical),
            "technical" => Ok(Self::Technical),
            "coordination" => Ok(Self::Coordination),
            "research" => Ok(Self::Research),
            "content" => Ok(Self::Content),
            _ => Err(format!("Invalid agent category: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub category: AgentCategory,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub current_task_count: u32,
    /// Exponentially weighted, 0-100
    #[serde(default)]
    pub performance_score: f64,
    /// Exponentially weighted, 0-100
    #[serde(default)]
    pub reliability_score: f64,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub health_status: JsonMap,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success or reset
    #[serde(default)]
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, category: AgentCategory, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: Uuid::new_v4().to_string(),
            name: name.into(),
            category,
            status: AgentStatus::Idle,
            capabilities,
            specializations: Vec::new(),
            max_concurrent_tasks: 1,
            current_task_count: 0,
            performance_score: 0.0,
            reliability_score: 0.0,
            performance_metrics: BTreeMap::new(),
            health_status: JsonMap::new(),
            last_health_check: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.performance_metrics
            .insert(METRIC_ERROR_RATE.to_string(), error_rate);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_key_segment("agent_id", &self.agent_id)?;
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "agent name must not be empty".to_string(),
            ));
        }
        for capability in &self.capabilities {
            validate_tag("capability", capability)?;
        }
        if self.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.current_task_count > self.max_concurrent_tasks {
            return Err(OrchestratorError::Validation(format!(
                "current_task_count {} exceeds max_concurrent_tasks {}",
                self.current_task_count, self.max_concurrent_tasks
            )));
        }
        Ok(())
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn can_accept_task(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Busy)
            && self.current_task_count < self.max_concurrent_tasks
    }

    /// Recorded error rate, pessimistic when never reported
    pub fn error_rate(&self) -> f64 {
        self.performance_metrics
            .get(METRIC_ERROR_RATE)
            .copied()
            .unwrap_or(DEFAULT_AGENT_ERROR_RATE)
    }

    /// Reserve one unit of concurrency
    pub fn assign_task(&mut self) -> Result<()> {
        if !matches!(self.status, AgentStatus::Idle | AgentStatus::Busy) {
            return Err(OrchestratorError::invalid_transition(
                "agent",
                self.status,
                AgentStatus::Busy,
            ));
        }
        AgentCapacityGuard.check(&AgentLoad {
            current: self.current_task_count,
            max: self.max_concurrent_tasks,
        })?;

        self.current_task_count += 1;
        if self.current_task_count >= self.max_concurrent_tasks {
            self.status = AgentStatus::Busy;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release one unit of concurrency and fold the outcome into metrics
    pub fn complete_task(&mut self, succeeded: bool) {
        self.release_task();
        self.record_outcome(succeeded);
    }

    /// Give back a unit taken by [`assign_task`](Self::assign_task)
    pub fn release_task(&mut self) {
        self.current_task_count = self.current_task_count.saturating_sub(1);
        if self.status == AgentStatus::Busy && self.current_task_count < self.max_concurrent_tasks {
            self.status = AgentStatus::Idle;
        }
        self.updated_at = Utc::now();
    }

    /// Fold a task outcome into the agent's metrics without touching its load
    pub fn record_outcome(&mut self, succeeded: bool) {
        let counter = if succeeded {
            METRIC_TASKS_COMPLETED
        } else {
            METRIC_TASKS_FAILED
        };
        *self
            .performance_metrics
            .entry(counter.to_string())
            .or_insert(0.0) += 1.0;

        let completed = self.metric(METRIC_TASKS_COMPLETED);
        let failed = self.metric(METRIC_TASKS_FAILED);
        self.performance_metrics
            .insert(METRIC_ERROR_RATE.to_string(), failed / (completed + failed));

        if succeeded {
            self.error_count = 0;
            self.record_reliability(100.0);
        } else {
            self.record_reliability(0.0);
            self.increment_error_count();
        }
        self.updated_at = Utc::now();
    }

    fn metric(&self, name: &str) -> f64 {
        self.performance_metrics.get(name).copied().unwrap_or(0.0)
    }

    pub fn record_performance(&mut self, score: f64) {
        self.performance_score = blend_score(self.performance_score, score);
        self.updated_at = Utc::now();
    }

    pub fn record_reliability(&mut self, score: f64) {
        self.reliability_score = blend_score(self.reliability_score, score);
        self.updated_at = Utc::now();
    }

    /// Count a failure; past the threshold the agent is moved to `error`
    pub fn increment_error_count(&mut self) {
        self.error_count += 1;
        if self.error_count > AGENT_ERROR_THRESHOLD {
            self.status = AgentStatus::Error;
        }
        self.updated_at = Utc::now();
    }

    pub fn reset_error_count(&mut self) {
        self.error_count = 0;
        self.updated_at = Utc::now();
    }

    pub fn record_health(&mut self, health: JsonMap) {
        let now = Utc::now();
        self.health_status = health;
        self.last_health_check = Some(now);
        self.updated_at = now;
    }

    /// Operator reset: idle, healthy, zeroed error metrics
    pub fn reset(&mut self) {
        self.status = AgentStatus::Idle;
        self.current_task_count = 0;
        self.error_count = 0;
        for metric in [METRIC_ERROR_RATE, METRIC_TASKS_COMPLETED, METRIC_TASKS_FAILED] {
            self.performance_metrics.insert(metric.to_string(), 0.0);
        }
        let mut health = JsonMap::new();
        health.insert("status".to_string(), json!("healthy"));
        health.insert("message".to_string(), json!("Agent reset"));
        self.record_health(health);
    }
}

fn blend_score(current: f64, sample: f64) -> f64 {
    let sample = sample.clamp(0.0, 100.0);
    if current == 0.0 {
        sample
    } else {
        (current * SCORE_EWMA_RETAIN + sample * (1.0 - SCORE_EWMA_RETAIN)).clamp(0.0, 100.0)
    }
}
