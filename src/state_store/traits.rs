//! Key-value store trait definition

use super::errors::KvResult;
use std::time::Duration;

/// Single-key atomic operations the state store is built on
///
/// Implemented by concrete providers (Redis, in-memory). Multi-key consistency
/// is the caller's concern; each method is atomic on its own key only.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl std::future::Future<Output = KvResult<Option<String>>> + Send;

    /// Set a value without expiry
    fn set(&self, key: &str, value: &str) -> impl std::future::Future<Output = KvResult<()>> + Send;

    /// Set only if the key is absent, with expiry. Returns whether it was set.
    fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    /// Returns whether a key was removed
    fn delete(&self, key: &str) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    /// Delete the key only if it currently holds `expected`
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    /// Add a member to a set. Returns whether the member was new.
    fn set_add(&self, key: &str, member: &str) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    /// Remove a member from a set. Returns whether it was present.
    fn set_remove(
        &self,
        key: &str,
        member: &str,
    ) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    fn set_members(&self, key: &str) -> impl std::future::Future<Output = KvResult<Vec<String>>> + Send;

    fn expire(&self, key: &str, ttl: Duration) -> impl std::future::Future<Output = KvResult<()>> + Send;

    /// Keys matching a glob pattern (`*` wildcard), without blocking the backend
    fn scan_keys(&self, pattern: &str) -> impl std::future::Future<Output = KvResult<Vec<String>>> + Send;

    fn health_check(&self) -> impl std::future::Future<Output = KvResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;
}
