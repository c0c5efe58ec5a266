#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, TOML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Orchestrator Core
//!
//! Orchestration engine for long-running, multi-stage AI production workflows.
//!
//! ## Overview
//!
//! A workflow (a video production, a content optimization pass) is a fixed
//! graph of stages. Each stage is performed by an agent selected by
//! capability; the engine creates the task, hands it to a worker, adopts the
//! result and checkpoints progress. Everything survives a restart: workflows,
//! tasks, agents, projects and execution contexts live in a key-value store
//! (Redis, or an in-process store for tests) with secondary indexes for lookup.
//!
//! ## Module Organization
//!
//! - [`state_store`] - durable records, secondary indexes, distributed locks
//! - [`orchestration`] - controller, stage graphs, executor and stage runner
//! - [`services`] - agent selection and the knowledge store contract
//! - [`state_machine`] - workflow and task transition rules
//! - [`models`] - persisted records and typed stage results
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//! - [`logging`] - structured tracing setup and operation loggers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orchestrator_core::config::OrchestratorConfig;
//! use orchestrator_core::models::{Workflow, WorkflowType};
//! use orchestrator_core::orchestration::OrchestratorController;
//! use orchestrator_core::state_store::StateStore;
//!
//! # async fn example() -> orchestrator_core::error::Result<()> {
//! let config = OrchestratorConfig::load(None)?;
//! let store = StateStore::from_config(&config).await?;
//! let controller = OrchestratorController::new(store, config);
//!
//! let workflow = Workflow::new(
//!     "6f1c2b8e-3a4d-4e5f-9a0b-1c2d3e4f5a6b",
//!     WorkflowType::Production,
//!     "Night Market",
//! );
//! let workflow_id = workflow.workflow_id.clone();
//! controller.start(workflow).await?;
//!
//! if let Some(report) = controller.status(&workflow_id).await? {
//!     println!("{} at {:.0}%", report.workflow.status, report.workflow.progress_percentage);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod services;
pub mod state_machine;
pub mod state_store;
pub mod validation;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use models::{Agent, ExecutionContext, Project, StageKind, StageResult, Task, Workflow, WorkflowType};
pub use orchestration::{OrchestratorController, StageGraph, WorkflowStatusReport};
pub use services::AgentSelector;
pub use state_machine::{AgentStatus, TaskStatus, WorkflowStatus};
pub use state_store::StateStore;
