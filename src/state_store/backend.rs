//! Enum dispatch over the key-value providers.

use super::errors::{KvError, KvResult};
use super::providers::MemoryKeyValueStore;
use super::traits::KeyValueStore;
use crate::config::{StoreBackendKind, StoreConfig};
use std::time::Duration;
use tracing::info;

#[cfg(feature = "redis-store")]
use super::providers::RedisKeyValueStore;

/// Key-value backend used by the state store
#[derive(Debug, Clone)]
pub enum KvBackend {
    /// Redis provider (boxed to reduce enum size)
    #[cfg(feature = "redis-store")]
    Redis(Box<RedisKeyValueStore>),

    /// In-process provider for tests and single-instance deployments
    Memory(MemoryKeyValueStore),
}

impl KvBackend {
    pub fn memory() -> Self {
        Self::Memory(MemoryKeyValueStore::new())
    }

    /// Build the backend named by configuration, connecting if it is remote
    pub async fn from_config(config: &StoreConfig) -> KvResult<Self> {
        match config.backend {
            StoreBackendKind::Memory => {
                info!("Using in-memory key-value backend");
                Ok(Self::memory())
            }
            #[cfg(feature = "redis-store")]
            StoreBackendKind::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    KvError::Connection("store.redis_url is not configured".to_string())
                })?;
                let timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));
                let store = tokio::time::timeout(timeout, RedisKeyValueStore::connect(url))
                    .await
                    .map_err(|_| {
                        KvError::Connection(format!(
                            "Timed out connecting to Redis after {}s",
                            timeout.as_secs()
                        ))
                    })??;
                info!("Using Redis key-value backend");
                Ok(Self::Redis(Box::new(store)))
            }
            #[cfg(not(feature = "redis-store"))]
            StoreBackendKind::Redis => Err(KvError::Connection(
                "redis backend requested but the redis-store feature is disabled".to_string(),
            )),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
        }
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set(key, value).await,
            Self::Memory(s) => s.set(key, value).await,
        }
    }

    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set_nx_ex(key, value, ttl).await,
            Self::Memory(s) => s.set_nx_ex(key, value, ttl).await,
        }
    }

    pub async fn delete(&self, key: &str) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
        }
    }

    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.compare_and_delete(key, expected).await,
            Self::Memory(s) => s.compare_and_delete(key, expected).await,
        }
    }

    pub async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set_add(key, member).await,
            Self::Memory(s) => s.set_add(key, member).await,
        }
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set_remove(key, member).await,
            Self::Memory(s) => s.set_remove(key, member).await,
        }
    }

    pub async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set_members(key).await,
            Self::Memory(s) => s.set_members(key).await,
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.expire(key, ttl).await,
            Self::Memory(s) => s.expire(key, ttl).await,
        }
    }

    pub async fn scan_keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.scan_keys(pattern).await,
            Self::Memory(s) => s.scan_keys(pattern).await,
        }
    }

    pub async fn health_check(&self) -> KvResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
        }
    }
}
