//! Distributed lock semantics on the in-memory provider.

use orchestrator_core::error::OrchestratorError;
use orchestrator_core::state_store::StateStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_lock_round_trip() {
    let store = StateStore::in_memory();
    let ttl = Duration::from_secs(30);

    let token = store.acquire_lock("workflow-a", ttl).await.unwrap().unwrap();
    assert!(store.acquire_lock("workflow-a", ttl).await.unwrap().is_none());
    // Independent resources do not contend
    assert!(store.acquire_lock("workflow-b", ttl).await.unwrap().is_some());

    assert!(!store.release_lock("workflow-a", "lock:workflow-a:0:forged").await.unwrap());
    assert!(store.release_lock("workflow-a", &token).await.unwrap());
    assert!(!store.release_lock("workflow-a", &token).await.unwrap());
    assert!(store.acquire_lock("workflow-a", ttl).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_lock_expires_after_ttl() {
    let store = StateStore::in_memory();
    let stale = store
        .acquire_lock("render", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(store.acquire_lock("render", Duration::from_secs(5)).await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(2)).await;
    let fresh = store
        .acquire_lock("render", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    // The expired holder cannot release the new holder's lock
    assert!(!store.release_lock("render", &stale).await.unwrap());
    assert!(store.release_lock("render", &fresh).await.unwrap());
}

#[tokio::test]
async fn test_resources_with_separators_are_rejected() {
    let store = StateStore::in_memory();
    let err = store
        .acquire_lock("workflow:1", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[tokio::test]
async fn test_with_lock_serializes_critical_sections() {
    let store = StateStore::in_memory();
    let inside = Arc::new(AtomicU32::new(0));
    let entered = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let inside = Arc::clone(&inside);
        let entered = Arc::clone(&entered);
        handles.push(tokio::spawn(async move {
            store
                .with_lock(
                    "workflow-shared",
                    Duration::from_secs(5),
                    500,
                    Duration::from_millis(2),
                    || async {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders inside");
                        tokio::time::sleep(Duration::from_millis(3)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        entered.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_with_lock_releases_after_failure() {
    let store = StateStore::in_memory();
    let ttl = Duration::from_secs(30);

    let result: Result<(), _> = store
        .with_lock("workflow-x", ttl, 1, Duration::from_millis(1), || async {
            Err(OrchestratorError::Backend("render farm offline".to_string()))
        })
        .await;
    assert!(matches!(result, Err(OrchestratorError::Backend(_))));
    assert!(store.acquire_lock("workflow-x", ttl).await.unwrap().is_some());
}
