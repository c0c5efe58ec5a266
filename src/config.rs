//! # Orchestrator Configuration
//!
//! Layered configuration: compiled defaults, then an optional TOML file, then
//! `ORCHESTRATOR__SECTION__KEY` environment overrides.
//!
//! ```rust,no_run
//! use orchestrator_core::config::OrchestratorConfig;
//!
//! # fn example() -> orchestrator_core::error::Result<()> {
//! let config = OrchestratorConfig::load(Some("config/orchestrator.toml".as_ref()))?;
//! assert!(config.execution.max_concurrent_workflows > 0);
//! # Ok(())
//! # }
//! ```

use crate::constants::INDEX_TTL_SECONDS;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,
    pub locking: LockingConfig,
    pub execution: ExecutionConfig,
    pub cleanup: CleanupConfig,
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub redis_url: Option<String>,
    pub index_ttl_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Redis,
            redis_url: Some("redis://localhost:6379/0".to_string()),
            index_ttl_seconds: INDEX_TTL_SECONDS,
            connect_timeout_seconds: 5,
        }
    }
}

/// Retry policy for the workflow record lock taken around read-modify-write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub workflow_lock_ttl_seconds: u64,
    pub acquire_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            workflow_lock_ttl_seconds: 30,
            acquire_attempts: 50,
            retry_delay_ms: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrent_workflows: usize,
    /// How long a stage waits on its worker before leaving the task in flight
    pub stage_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub prefer_delegated_backend: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 100,
            stage_timeout_seconds: 300,
            retry_attempts: 3,
            prefer_delegated_backend: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub max_age_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub timeout_seconds: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}

impl OrchestratorConfig {
    /// In-memory store with short timeouts for tests
    pub fn for_testing() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackendKind::Memory,
                redis_url: None,
                ..StoreConfig::default()
            },
            locking: LockingConfig {
                workflow_lock_ttl_seconds: 5,
                acquire_attempts: 100,
                retry_delay_ms: 5,
            },
            execution: ExecutionConfig {
                stage_timeout_seconds: 2,
                ..ExecutionConfig::default()
            },
            cleanup: CleanupConfig::default(),
            knowledge: KnowledgeConfig { timeout_seconds: 1 },
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load defaults, an optional TOML file and environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading orchestrator configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackendKind::Redis
            && self.store.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(OrchestratorError::Configuration(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }
        if self.store.index_ttl_seconds == 0 {
            return Err(OrchestratorError::Configuration(
                "store.index_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.locking.workflow_lock_ttl_seconds == 0 || self.locking.acquire_attempts == 0 {
            return Err(OrchestratorError::Configuration(
                "locking ttl and attempts must be positive".to_string(),
            ));
        }
        if self.execution.max_concurrent_workflows == 0 {
            return Err(OrchestratorError::Configuration(
                "execution.max_concurrent_workflows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.store.index_ttl_seconds)
    }

    pub fn workflow_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.locking.workflow_lock_ttl_seconds)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.locking.retry_delay_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.stage_timeout_seconds)
    }

    pub fn knowledge_timeout(&self) -> Duration {
        Duration::from_secs(self.knowledge.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.index_ttl_seconds, 86_400);
        assert_eq!(config.execution.max_concurrent_workflows, 100);
        assert_eq!(config.cleanup.max_age_days, 30);
    }

    #[test]
    fn test_for_testing_uses_memory_backend() {
        let config = OrchestratorConfig::for_testing();
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = OrchestratorConfig::default();
        config.store.redis_url = None;
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            "[store]\nbackend = \"memory\"\n\n[execution]\nstage_timeout_seconds = 42\n"
        )
        .expect("write config");

        let config = OrchestratorConfig::load(Some(file.path())).expect("load config");
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.execution.stage_timeout_seconds, 42);
        assert_eq!(config.locking, LockingConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[locking]\nacquire_attempts = 0\n").expect("write config");

        assert!(OrchestratorConfig::load(Some(file.path())).is_err());
    }
}
