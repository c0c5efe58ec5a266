//! Distributed mutual exclusion on top of single-key atomics.
//!
//! `acquire` is SET NX EX with a token unique to the holder; `release` deletes
//! the key only while it still holds that token. A holder that crashes loses
//! the lock when the TTL lapses.

use super::keys;
use super::store::StateStore;
use crate::error::{OrchestratorError, Result};
use crate::validation::validate_key_segment;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

fn lock_token(resource: &str) -> String {
    format!(
        "lock:{resource}:{}:{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4()
    )
}

impl StateStore {
    /// Try once to take `resource`. `None` means another holder has it.
    pub async fn acquire_lock(&self, resource: &str, ttl: Duration) -> Result<Option<String>> {
        self.ensure_connected()?;
        validate_key_segment("lock resource", resource)?;

        let key = keys::lock(resource);
        let token = lock_token(resource);
        let acquired = self.absorb(
            "set_nx_ex",
            &key,
            self.backend.set_nx_ex(&key, &token, ttl).await,
            false,
        );

        if acquired {
            debug!(resource = resource, ttl_secs = ttl.as_secs(), "Lock acquired");
            Ok(Some(token))
        } else {
            debug!(resource = resource, "Lock held elsewhere");
            Ok(None)
        }
    }

    /// Release `resource` if `token` still owns it
    pub async fn release_lock(&self, resource: &str, token: &str) -> Result<bool> {
        self.ensure_connected()?;
        let key = keys::lock(resource);
        let released = self.absorb(
            "compare_and_delete",
            &key,
            self.backend.compare_and_delete(&key, token).await,
            false,
        );
        if !released {
            debug!(resource = resource, "Lock not released: token no longer owns it");
        }
        Ok(released)
    }

    /// Run `f` while holding `resource`, retrying acquisition up to `attempts`
    /// times. The lock is released whether `f` succeeds or fails.
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        attempts: u32,
        retry_delay: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=attempts.max(1) {
            if let Some(token) = self.acquire_lock(resource, ttl).await? {
                let outcome = f().await;
                if !self.release_lock(resource, &token).await? {
                    warn!(
                        resource = resource,
                        "Lock expired before release; critical section outlived its TTL"
                    );
                }
                return outcome;
            }
            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        Err(OrchestratorError::LockContention {
            resource: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_embeds_resource() {
        let token = lock_token("workflow-1");
        assert!(token.starts_with("lock:workflow-1:"));
        assert_ne!(token, lock_token("workflow-1"));
    }

    #[tokio::test]
    async fn test_with_lock_reports_contention() {
        let store = StateStore::in_memory();
        let held = store
            .acquire_lock("render", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let result: Result<()> = store
            .with_lock("render", Duration::from_secs(10), 3, Duration::from_millis(1), || async {
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_contention());

        assert!(store.release_lock("render", &held).await.unwrap());
        let value = store
            .with_lock("render", Duration::from_secs(10), 1, Duration::from_millis(1), || async {
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        // Released after the closure ran
        assert!(store
            .acquire_lock("render", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_closure_still_releases() {
        let store = StateStore::in_memory();
        let result: Result<()> = store
            .with_lock("assets", Duration::from_secs(10), 1, Duration::from_millis(1), || async {
                Err(OrchestratorError::Backend("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(store
            .acquire_lock("assets", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }
}
