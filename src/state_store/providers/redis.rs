//! Redis key-value provider
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Requires the `redis-store` feature flag.

use crate::constants::RELEASE_LOCK_SCRIPT;
use crate::state_store::errors::{KvError, KvResult};
use crate::state_store::traits::KeyValueStore;
use std::time::Duration;
use tracing::debug;

/// Redis-backed key-value store using ConnectionManager
///
/// Provides async multiplexed connections with automatic reconnection.
/// Uses SCAN for key enumeration to avoid blocking the server.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection_manager: redis::aio::ConnectionManager,
    release_script: redis::Script,
}

impl std::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyValueStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisKeyValueStore {
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| KvError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        debug!(url = %redact_url(url), "Redis key-value store connected");

        Ok(Self {
            connection_manager,
            release_script: redis::Script::new(RELEASE_LOCK_SCRIPT),
        })
    }
}

fn backend_error(command: &str, err: redis::RedisError) -> KvError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        KvError::Connection(format!("Redis {} failed: {}", command, err))
    } else {
        KvError::Backend(format!("Redis {} failed: {}", command, err))
    }
}

impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("GET", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("SET", e))?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let ttl_seconds = ttl.as_secs().max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SET NX EX", e))?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("EVALSHA release", e))?;
        Ok(removed == 1)
    }

    async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SADD", e))?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: u64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SREM", e))?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SMEMBERS", e))?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("EXPIRE", e))?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN may return duplicates across iterations
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_error("SCAN", e))?;

            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        found.sort();
        found.dedup();
        debug!(pattern = pattern, matched = found.len(), "Redis SCAN");
        Ok(found)
    }

    async fn health_check(&self) -> KvResult<bool> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("PING", e))?;

        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Redact credentials from a Redis URL for logging
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}
