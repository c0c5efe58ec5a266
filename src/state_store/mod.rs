//! # State Store
//!
//! Durable persistence for every orchestration record, built on a small set
//! of single-key atomic operations ([`KeyValueStore`]) so that Redis and the
//! in-process provider behave identically.
//!
//! ## Module layout
//!
//! - `traits` / `errors`: the key-value contract and its transport errors
//! - `providers`: Redis (`redis-store` feature) and in-memory implementations
//! - `backend`: enum dispatch over the providers
//! - `keys`: key layout and per-entity index memberships
//! - `store`: entity CRUD, filtered listing and latest-context tracking
//! - `locking`: token-based distributed locks
//! - `maintenance`: age-based cleanup and index repair
//!
//! ## Example
//!
//! ```rust
//! use orchestrator_core::models::Project;
//! use orchestrator_core::state_store::StateStore;
//!
//! # tokio_test::block_on(async {
//! let store = StateStore::in_memory();
//! let project = Project::new("Launch Trailer", "video");
//! assert!(store.save_project(&project).await.unwrap());
//!
//! let loaded = store.get_project(&project.project_id).await.unwrap();
//! assert_eq!(loaded.map(|p| p.name), Some("Launch Trailer".to_string()));
//! # });
//! ```

pub mod backend;
pub mod errors;
pub mod keys;
pub mod locking;
pub mod maintenance;
pub mod providers;
pub mod store;
pub mod traits;

pub use backend::KvBackend;
pub use errors::{KvError, KvResult};
pub use keys::{IndexKey, Indexed};
pub use maintenance::RepairReport;
pub use providers::MemoryKeyValueStore;
pub use store::{AgentFilter, StateStore, TaskFilter, WorkflowFilter};
pub use traits::KeyValueStore;

#[cfg(feature = "redis-store")]
pub use providers::RedisKeyValueStore;
