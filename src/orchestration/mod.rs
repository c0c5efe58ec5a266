//! # Orchestration Engine
//!
//! Drives workflows through their stage graphs.
//!
//! ## Core Components
//!
//! - **OrchestratorController**: lifecycle facade (start, pause, resume, cancel, status)
//! - **StageGraphExecutor**: in-process [`ExecutionBackend`] walking a [`StageGraph`]
//!   level by level, forking parallel stages and checkpointing after each level
//! - **StageRunner**: runs one stage; prerequisite gating, agent selection,
//!   task creation and result adoption
//! - **WorkerDispatch**: seam to the agents that perform the work
//!
//! A workflow's status lives in the state store. The controller and executor
//! change it only while holding the workflow lock (see
//! [`workflow_lock_resource`]).

pub mod backend;
pub mod controller;
pub mod dispatch;
pub mod executor;
pub mod stage_graph;
pub mod stage_runner;

pub use backend::{DelegatedBackendFactory, ExecutionBackend, ExecutionOutcome};
pub use controller::{OrchestratorController, WorkflowStatusReport};
pub use dispatch::{DeferredDispatch, DispatchOutcome, Submission, WorkerDispatch};
pub use executor::{workflow_lock_resource, StageGraphExecutor};
pub use stage_graph::{StageGraph, StageNode};
pub use stage_runner::{aggregate_final_results, StageRunner, FINAL_RESULTS_KEY};
