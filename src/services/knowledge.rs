//! # Knowledge Store Contract
//!
//! Stages may look up or persist contextual content in a semantic knowledge
//! store. The store itself is an external collaborator; this module defines the
//! contract the engine consumes plus two adapters:
//!
//! - [`NoOpKnowledgeStore`] for deployments without a knowledge service
//! - [`TimedKnowledgeStore`] which bounds every call with a timeout
//!
//! Knowledge writes from the executor are best effort. A failing or slow store
//! never fails a workflow.

use crate::error::{OrchestratorError, Result};
use crate::models::JsonMap;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Store content with its metadata, returning the embedding id
    async fn store_embedding(&self, content: &str, metadata: JsonMap) -> Result<String>;

    /// Nearest matches for `query`, at most `limit` of them
    async fn search_embeddings(&self, query: &str, limit: usize) -> Result<Vec<Value>>;

    /// Store a typed knowledge entry, returning its id
    async fn store_knowledge(&self, knowledge_type: &str, content: Value) -> Result<String>;

    async fn get_knowledge(&self, knowledge_type: &str, query: &str) -> Result<Vec<Value>>;
}

#[async_trait]
impl<T: KnowledgeStore + ?Sized> KnowledgeStore for Arc<T> {
    async fn store_embedding(&self, content: &str, metadata: JsonMap) -> Result<String> {
        (**self).store_embedding(content, metadata).await
    }

    async fn search_embeddings(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        (**self).search_embeddings(query, limit).await
    }

    async fn store_knowledge(&self, knowledge_type: &str, content: Value) -> Result<String> {
        (**self).store_knowledge(knowledge_type, content).await
    }

    async fn get_knowledge(&self, knowledge_type: &str, query: &str) -> Result<Vec<Value>> {
        (**self).get_knowledge(knowledge_type, query).await
    }
}

/// Knowledge store that accepts writes and finds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NoOpKnowledgeStore {
    async fn store_embedding(&self, _content: &str, _metadata: JsonMap) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn search_embeddings(&self, _query: &str, _limit: usize) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn store_knowledge(&self, knowledge_type: &str, _content: Value) -> Result<String> {
        debug!(knowledge_type = knowledge_type, "Knowledge store disabled, dropping entry");
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn get_knowledge(&self, _knowledge_type: &str, _query: &str) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// Wraps a knowledge store so that no call outlives `timeout`
#[derive(Debug, Clone)]
pub struct TimedKnowledgeStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: KnowledgeStore> TimedKnowledgeStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.timeout, call).await.map_err(|_| {
            OrchestratorError::Backend(format!(
                "knowledge store {operation} timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
    }
}

#[async_trait]
impl<S: KnowledgeStore> KnowledgeStore for TimedKnowledgeStore<S> {
    async fn store_embedding(&self, content: &str, metadata: JsonMap) -> Result<String> {
        self.bounded("store_embedding", self.inner.store_embedding(content, metadata))
            .await
    }

    async fn search_embeddings(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        self.bounded("search_embeddings", self.inner.search_embeddings(query, limit))
            .await
    }

    async fn store_knowledge(&self, knowledge_type: &str, content: Value) -> Result<String> {
        self.bounded("store_knowledge", self.inner.store_knowledge(knowledge_type, content))
            .await
    }

    async fn get_knowledge(&self, knowledge_type: &str, query: &str) -> Result<Vec<Value>> {
        self.bounded("get_knowledge", self.inner.get_knowledge(knowledge_type, query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowKnowledgeStore;

    #[async_trait]
    impl KnowledgeStore for SlowKnowledgeStore {
        async fn store_embedding(&self, _content: &str, _metadata: JsonMap) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }

        async fn search_embeddings(&self, _query: &str, _limit: usize) -> Result<Vec<Value>> {
            Ok(vec![json!({"content": "match"})])
        }

        async fn store_knowledge(&self, _knowledge_type: &str, _content: Value) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }

        async fn get_knowledge(&self, _knowledge_type: &str, _query: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_backend_error() {
        let store = TimedKnowledgeStore::new(SlowKnowledgeStore, Duration::from_secs(1));
        let err = store
            .store_knowledge("workflow_results", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Backend(msg) if msg.contains("timed out")));

        let found = store.search_embeddings("script", 5).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_noop_store_finds_nothing() {
        let store = NoOpKnowledgeStore;
        assert!(store.store_embedding("text", JsonMap::new()).await.is_ok());
        assert!(store.get_knowledge("script", "noir").await.unwrap().is_empty());
    }
}
