//! # State Store
//!
//! Durable repository for workflows, tasks, agents, projects and execution
//! contexts on top of a [`KvBackend`].
//!
//! ## Failure semantics
//!
//! Transport failures never escape as errors. They are logged and reported as
//! `Ok(false)`, `Ok(None)` or an empty list. Two errors do cross the boundary:
//! [`OrchestratorError::NotConnected`] when an operation runs before
//! [`StateStore::connect`], and [`OrchestratorError::Validation`] for records
//! that fail validation before persistence.
//!
//! ## Write ordering
//!
//! The backend is atomic per key only. A save writes the primary record first,
//! then drops memberships the previous version had and the new one lacks, then
//! adds the current memberships. An interruption between those steps leaves an
//! index that [`StateStore::repair_indexes`] can reconcile.

use super::backend::KvBackend;
use super::errors::{KvError, KvResult};
use super::keys::{self, IndexKey, Indexed};
use crate::config::{OrchestratorConfig, StoreConfig};
use crate::error::{OrchestratorError, Result};
use crate::logging::log_store_operation;
use crate::models::{Agent, AgentCategory, ExecutionContext, Project, Task, Workflow, WorkflowType};
use crate::state_machine::{AgentStatus, TaskStatus, WorkflowStatus};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Filter for [`StateStore::list_workflows`]
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub project_id: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub workflow_type: Option<WorkflowType>,
}

impl WorkflowFilter {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, workflow_type: WorkflowType) -> Self {
        self.workflow_type = Some(workflow_type);
        self
    }

    fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(project_id) = &self.project_id {
            keys.push(keys::project_workflows(project_id));
        }
        if let Some(status) = self.status {
            keys.push(keys::workflows_by_status(status));
        }
        if let Some(workflow_type) = self.workflow_type {
            keys.push(keys::workflows_by_type(workflow_type));
        }
        keys
    }

    fn matches(&self, workflow: &Workflow) -> bool {
        self.project_id.as_ref().map_or(true, |p| *p == workflow.project_id)
            && self.status.map_or(true, |s| s == workflow.status)
            && self.workflow_type.map_or(true, |t| t == workflow.workflow_type)
    }
}

/// Filter for [`StateStore::list_tasks`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub workflow_id: Option<String>,
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn for_workflow(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Self::default()
        }
    }

    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(workflow_id) = &self.workflow_id {
            keys.push(keys::workflow_tasks(workflow_id));
        }
        if let Some(project_id) = &self.project_id {
            keys.push(keys::project_tasks(project_id));
        }
        if let Some(agent_id) = &self.agent_id {
            keys.push(keys::agent_tasks(agent_id));
        }
        if let Some(status) = self.status {
            keys.push(keys::tasks_by_status(status));
        }
        keys
    }

    fn matches(&self, task: &Task) -> bool {
        self.workflow_id.as_ref().map_or(true, |w| *w == task.workflow_id)
            && self.project_id.as_ref().map_or(true, |p| *p == task.project_id)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |a| task.agent_id.as_ref() == Some(a))
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// Filter for [`StateStore::list_agents`]
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub category: Option<AgentCategory>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn with_category(mut self, category: AgentCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(category) = self.category {
            keys.push(keys::agents_by_category(category));
        }
        if let Some(status) = self.status {
            keys.push(keys::agents_by_status(status));
        }
        keys
    }

    fn matches(&self, agent: &Agent) -> bool {
        self.category.map_or(true, |c| c == agent.category)
            && self.status.map_or(true, |s| s == agent.status)
    }
}

/// Durable repository with secondary indexes and locking
#[derive(Debug, Clone)]
pub struct StateStore {
    pub(super) backend: KvBackend,
    connected: Arc<AtomicBool>,
    pub(super) index_ttl: Duration,
}

impl StateStore {
    /// Unconnected store; call [`connect`](Self::connect) before use
    pub fn new(backend: KvBackend, config: &StoreConfig) -> Self {
        Self {
            backend,
            connected: Arc::new(AtomicBool::new(false)),
            index_ttl: Duration::from_secs(config.index_ttl_seconds),
        }
    }

    /// Connected in-memory store with default index TTL
    pub fn in_memory() -> Self {
        let store = Self::new(KvBackend::memory(), &StoreConfig::default());
        store.connected.store(true, Ordering::SeqCst);
        store
    }

    /// Build the configured backend and connect to it
    pub async fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let backend = KvBackend::from_config(&config.store)
            .await
            .map_err(|e| OrchestratorError::StoreUnavailable(e.to_string()))?;
        let store = Self::new(backend, &config.store);
        store.connect().await?;
        Ok(store)
    }

    pub async fn connect(&self) -> Result<()> {
        match self.backend.health_check().await {
            Ok(true) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(provider = self.backend.provider_name(), "State store connected");
                Ok(())
            }
            Ok(false) => Err(OrchestratorError::StoreUnavailable(format!(
                "{} backend failed its health check",
                self.backend.provider_name()
            ))),
            Err(e) => Err(OrchestratorError::StoreUnavailable(e.to_string())),
        }
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!(provider = self.backend.provider_name(), "State store disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(super) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(OrchestratorError::NotConnected)
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    pub async fn health_check(&self) -> bool {
        self.is_connected() && matches!(self.backend.health_check().await, Ok(true))
    }

    /// Log a transport failure and substitute the caller's fallback
    pub(super) fn absorb<T>(&self, operation: &str, key: &str, result: KvResult<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    operation = operation,
                    key = key,
                    provider = self.backend.provider_name(),
                    error = %error,
                    "State store operation failed"
                );
                log_store_operation(operation, key, self.backend.provider_name(), false);
                fallback
            }
        }
    }

    // =========================================================================
    // Generic record plumbing
    // =========================================================================

    pub(super) async fn load<T: Indexed>(&self, id: &str) -> Option<T> {
        let key = T::primary_key_for(id);
        let raw = self.absorb("get", &key, self.backend.get(&key).await, None)?;
        let decoded = serde_json::from_str::<T>(&raw).map_err(KvError::from);
        self.absorb("decode", &key, decoded.map(Some), None)
    }

    async fn load_many<T: Indexed>(&self, ids: impl IntoIterator<Item = String>) -> Vec<T> {
        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = self.load::<T>(&id).await {
                records.push(record);
            }
        }
        records
    }

    pub(super) async fn add_membership(&self, index: &IndexKey, id: &str) -> bool {
        let added = self.absorb(
            "sadd",
            &index.key,
            self.backend.set_add(&index.key, id).await,
            false,
        );
        if index.expires {
            let _ = self.absorb(
                "expire",
                &index.key,
                self.backend.expire(&index.key, self.index_ttl).await,
                (),
            );
        }
        added
    }

    pub(super) async fn remove_membership(&self, index_key: &str, id: &str) -> bool {
        self.absorb(
            "srem",
            index_key,
            self.backend.set_remove(index_key, id).await,
            false,
        )
    }

    pub(super) async fn save_record<T: Indexed>(&self, record: &T) -> Result<bool> {
        self.ensure_connected()?;
        record.validate_record()?;

        let key = record.primary_key();
        let previous = self.load::<T>(record.id()).await;

        let payload = match serde_json::to_string(record).map_err(KvError::from) {
            Ok(payload) => payload,
            Err(e) => return Ok(self.absorb("encode", &key, Err(e), false)),
        };
        if !self.absorb("set", &key, self.backend.set(&key, &payload).await.map(|_| true), false) {
            return Ok(false);
        }

        let current = record.index_keys();
        if let Some(previous) = previous {
            for stale in previous.index_keys() {
                if !current.iter().any(|k| k.key == stale.key) {
                    self.remove_membership(&stale.key, record.id()).await;
                }
            }
        }
        for index in &current {
            self.add_membership(index, record.id()).await;
        }

        log_store_operation("save", &key, self.backend.provider_name(), true);
        Ok(true)
    }

    pub(super) async fn delete_record<T: Indexed>(&self, id: &str) -> Result<bool> {
        self.ensure_connected()?;
        let key = T::primary_key_for(id);
        let Some(record) = self.load::<T>(id).await else {
            debug!(key = %key, "Nothing to delete");
            return Ok(false);
        };

        let deleted = self.absorb("del", &key, self.backend.delete(&key).await, false);
        for index in record.index_keys() {
            self.remove_membership(&index.key, id).await;
        }

        log_store_operation("delete", &key, self.backend.provider_name(), deleted);
        Ok(deleted)
    }

    async fn get_record<T: Indexed>(&self, id: &str) -> Result<Option<T>> {
        self.ensure_connected()?;
        Ok(self.load::<T>(id).await)
    }

    /// Ids of every primary record of `T`, found by prefix scan
    pub(super) async fn scan_ids<T: Indexed>(&self) -> Vec<String> {
        let pattern = format!("{}:*", T::ENTITY);
        let found = self.absorb("scan", &pattern, self.backend.scan_keys(&pattern).await, Vec::new());
        found
            .iter()
            .filter_map(|key| keys::id_from_primary_key(T::ENTITY, key))
            .map(str::to_string)
            .collect()
    }

    /// Ids present in every named index; `None` when no index applies
    async fn intersect(&self, index_keys: &[String]) -> Option<BTreeSet<String>> {
        let mut result: Option<BTreeSet<String>> = None;
        for key in index_keys {
            let members: BTreeSet<String> = self
                .absorb("smembers", key, self.backend.set_members(key).await, Vec::new())
                .into_iter()
                .collect();
            result = Some(match result {
                None => members,
                Some(acc) => acc.intersection(&members).cloned().collect(),
            });
        }
        result
    }

    async fn list_records<T: Indexed>(
        &self,
        index_keys: &[String],
        matches: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>> {
        self.ensure_connected()?;
        let ids: Vec<String> = match self.intersect(index_keys).await {
            Some(ids) => ids.into_iter().collect(),
            None => self.scan_ids::<T>().await,
        };
        // Index members may be stale; trust the record over its index
        Ok(self
            .load_many::<T>(ids)
            .await
            .into_iter()
            .filter(|record| matches(record))
            .collect())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.backend.get(key).await?.is_some())
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<bool> {
        self.save_record(workflow).await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        self.get_record(workflow_id).await
    }

    /// Remove a workflow with its index memberships and execution contexts.
    /// Tasks are left to [`cleanup`](Self::cleanup).
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<bool> {
        let deleted = self.delete_record::<Workflow>(workflow_id).await?;
        if deleted {
            let contexts_key = keys::workflow_contexts(workflow_id);
            let context_ids =
                self.absorb("smembers", &contexts_key, self.backend.set_members(&contexts_key).await, Vec::new());
            for context_id in context_ids {
                self.delete_record::<ExecutionContext>(&context_id).await?;
            }
            for key in [contexts_key, keys::latest_context(workflow_id)] {
                let _ = self.absorb("del", &key, self.backend.delete(&key).await, false);
            }
        }
        Ok(deleted)
    }

    pub async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>> {
        let mut workflows = self
            .list_records(&filter.index_keys(), |w: &Workflow| filter.matches(w))
            .await?;
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Persist a task. Its workflow and project must already be stored.
    pub async fn save_task(&self, task: &Task) -> Result<bool> {
        self.ensure_connected()?;
        task.validate()?;

        for (entity, key) in [
            ("workflow", keys::workflow(&task.workflow_id)),
            ("project", keys::project(&task.project_id)),
        ] {
            match self.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(OrchestratorError::Validation(format!(
                        "task {} references unknown {entity} {key}",
                        task.task_id
                    )))
                }
                Err(e) => return Ok(self.absorb("get", &key, Err(e), false)),
            }
        }

        self.save_record(task).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.get_record(task_id).await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<bool> {
        self.delete_record::<Task>(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks = self
            .list_records(&filter.index_keys(), |t: &Task| filter.matches(t))
            .await?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Most recently created task of `task_type` in the workflow
    pub async fn latest_task_of_type(&self, workflow_id: &str, task_type: &str) -> Result<Option<Task>> {
        let tasks = self.list_tasks(&TaskFilter::for_workflow(workflow_id)).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.task_type == task_type)
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }

    // =========================================================================
    // Agents
    // =========================================================================

    pub async fn save_agent(&self, agent: &Agent) -> Result<bool> {
        self.save_record(agent).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.get_record(agent_id).await
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<bool> {
        self.delete_record::<Agent>(agent_id).await
    }

    pub async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut agents = self
            .list_records(&filter.index_keys(), |a: &Agent| filter.matches(a))
            .await?;
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    /// Agents advertising `capability`. Falls back to a full scan when the
    /// capability index has expired.
    pub async fn list_agents_by_capability(&self, capability: &str) -> Result<Vec<Agent>> {
        self.ensure_connected()?;
        let index_key = keys::agents_by_capability(capability);
        let ids = self.absorb(
            "smembers",
            &index_key,
            self.backend.set_members(&index_key).await,
            Vec::new(),
        );
        let ids = if ids.is_empty() {
            debug!(capability = capability, "Capability index empty, scanning agents");
            self.scan_ids::<Agent>().await
        } else {
            ids
        };

        let mut agents: Vec<Agent> = self
            .load_many::<Agent>(ids)
            .await
            .into_iter()
            .filter(|a| a.has_capability(capability))
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub async fn save_project(&self, project: &Project) -> Result<bool> {
        self.save_record(project).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.get_record(project_id).await
    }

    /// Remove a project along with its per-project index sets
    pub async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let deleted = self.delete_record::<Project>(project_id).await?;
        if deleted {
            for key in [
                keys::project_workflows(project_id),
                keys::project_tasks(project_id),
                keys::project_contexts(project_id),
            ] {
                let _ = self.absorb("del", &key, self.backend.delete(&key).await, false);
            }
        }
        Ok(deleted)
    }

    pub async fn list_projects(&self, active_only: bool) -> Result<Vec<Project>> {
        let index_keys = if active_only {
            vec![keys::ACTIVE_PROJECTS.to_string()]
        } else {
            Vec::new()
        };
        let mut projects = self
            .list_records(&index_keys, |p: &Project| !active_only || p.is_active)
            .await?;
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    // =========================================================================
    // Execution contexts
    // =========================================================================

    /// Persist a context and move the workflow's latest pointer forward
    pub async fn save_execution_context(&self, context: &ExecutionContext) -> Result<bool> {
        if !self.save_record(context).await? {
            return Ok(false);
        }

        let pointer = keys::latest_context(&context.workflow_id);
        let current = self.absorb("get", &pointer, self.backend.get(&pointer).await, None);
        let advance = match current {
            None => true,
            Some(current_id) if current_id == context.context_id => false,
            Some(current_id) => self
                .load::<ExecutionContext>(&current_id)
                .await
                .map_or(true, |latest| latest.sequence <= context.sequence),
        };
        if advance {
            let _ = self.absorb(
                "set",
                &pointer,
                self.backend.set(&pointer, &context.context_id).await,
                (),
            );
        }
        Ok(true)
    }

    pub async fn get_execution_context(&self, context_id: &str) -> Result<Option<ExecutionContext>> {
        self.get_record(context_id).await
    }

    pub async fn delete_execution_context(&self, context_id: &str) -> Result<bool> {
        let Some(context) = self.get_execution_context(context_id).await? else {
            return Ok(false);
        };
        let deleted = self.delete_record::<ExecutionContext>(context_id).await?;
        let pointer = keys::latest_context(&context.workflow_id);
        let _ = self.absorb(
            "compare_and_delete",
            &pointer,
            self.backend.compare_and_delete(&pointer, context_id).await,
            false,
        );
        Ok(deleted)
    }

    /// Every context recorded for a workflow, oldest first
    pub async fn list_execution_contexts(&self, workflow_id: &str) -> Result<Vec<ExecutionContext>> {
        let index_keys = [keys::workflow_contexts(workflow_id)];
        let mut contexts = self
            .list_records(&index_keys, |c: &ExecutionContext| c.workflow_id == workflow_id)
            .await?;
        contexts.sort_by_key(|c| c.sequence);
        Ok(contexts)
    }

    /// Newest context by pointer, else by highest sequence
    pub async fn get_latest_execution_context(&self, workflow_id: &str) -> Result<Option<ExecutionContext>> {
        self.ensure_connected()?;
        let pointer = keys::latest_context(workflow_id);
        if let Some(context_id) = self.absorb("get", &pointer, self.backend.get(&pointer).await, None) {
            if let Some(context) = self.load::<ExecutionContext>(&context_id).await {
                return Ok(Some(context));
            }
        }
        Ok(self.list_execution_contexts(workflow_id).await?.into_iter().last())
    }
}
