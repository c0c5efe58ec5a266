//! # Key Layout
//!
//! Every record lives under `<entity>:<id>` as a JSON string. Secondary indexes
//! are plain sets of ids. Ids never contain `:`, which lets a prefix scan such
//! as `workflow:*` tell primary records apart from per-owner index sets like
//! `workflow:<id>:tasks`.
//!
//! Each entity describes its own index memberships through [`Indexed`]. The
//! store uses that single description for writes, deletes, status moves and
//! index repair, so the four never disagree about where a record is listed.

use crate::error::Result;
use crate::models::{Agent, AgentCategory, ExecutionContext, Project, Task, Workflow, WorkflowType};
use crate::state_machine::{AgentStatus, TaskStatus, WorkflowStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const ACTIVE_PROJECTS: &str = "projects:active";

pub fn workflow(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}")
}

pub fn project_workflows(project_id: &str) -> String {
    format!("project:{project_id}:workflows")
}

pub fn workflows_by_status(status: WorkflowStatus) -> String {
    format!("workflows:status:{status}")
}

pub fn workflows_by_type(workflow_type: WorkflowType) -> String {
    format!("workflows:type:{workflow_type}")
}

pub fn task(task_id: &str) -> String {
    format!("task:{task_id}")
}

pub fn workflow_tasks(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}:tasks")
}

pub fn project_tasks(project_id: &str) -> String {
    format!("project:{project_id}:tasks")
}

pub fn agent_tasks(agent_id: &str) -> String {
    format!("agent:{agent_id}:tasks")
}

pub fn tasks_by_status(status: TaskStatus) -> String {
    format!("tasks:status:{status}")
}

pub fn agent(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

pub fn agents_by_category(category: AgentCategory) -> String {
    format!("agents:category:{category}")
}

pub fn agents_by_status(status: AgentStatus) -> String {
    format!("agents:status:{status}")
}

pub fn agents_by_capability(capability: &str) -> String {
    format!("agents:capability:{capability}")
}

pub fn project(project_id: &str) -> String {
    format!("project:{project_id}")
}

pub fn execution_context(context_id: &str) -> String {
    format!("execution_context:{context_id}")
}

pub fn workflow_contexts(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}:execution_contexts")
}

pub fn project_contexts(project_id: &str) -> String {
    format!("project:{project_id}:execution_contexts")
}

/// Pointer to the newest execution context of a workflow
pub fn latest_context(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}:latest_context")
}

pub fn lock(resource: &str) -> String {
    format!("lock:{resource}")
}

/// Extract the id from a primary record key, rejecting index keys
pub fn id_from_primary_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let id = key.strip_prefix(prefix)?.strip_prefix(':')?;
    (!id.is_empty() && !id.contains(':')).then_some(id)
}

/// One index set a record belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub key: String,
    /// Whether the set carries the index TTL
    pub expires: bool,
}

impl IndexKey {
    pub fn persistent(key: String) -> Self {
        Self { key, expires: false }
    }

    pub fn expiring(key: String) -> Self {
        Self { key, expires: true }
    }
}

/// A record stored under a primary key with secondary index memberships
pub trait Indexed: Serialize + DeserializeOwned + Send + Sync {
    /// Entity name, also the primary key prefix
    const ENTITY: &'static str;

    /// Scan patterns covering every index family this entity appears in
    const INDEX_PATTERNS: &'static [&'static str];

    fn id(&self) -> &str;

    fn validate_record(&self) -> Result<()>;

    fn index_keys(&self) -> Vec<IndexKey>;

    fn primary_key_for(id: &str) -> String {
        format!("{}:{id}", Self::ENTITY)
    }

    fn primary_key(&self) -> String {
        Self::primary_key_for(self.id())
    }
}

impl Indexed for Workflow {
    const ENTITY: &'static str = "workflow";
    const INDEX_PATTERNS: &'static [&'static str] =
        &["project:*:workflows", "workflows:status:*", "workflows:type:*"];

    fn id(&self) -> &str {
        &self.workflow_id
    }

    fn validate_record(&self) -> Result<()> {
        self.validate()
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        vec![
            IndexKey::persistent(project_workflows(&self.project_id)),
            IndexKey::expiring(workflows_by_status(self.status)),
            IndexKey::expiring(workflows_by_type(self.workflow_type)),
        ]
    }
}

impl Indexed for Task {
    const ENTITY: &'static str = "task";
    const INDEX_PATTERNS: &'static [&'static str] = &[
        "workflow:*:tasks",
        "project:*:tasks",
        "agent:*:tasks",
        "tasks:status:*",
    ];

    fn id(&self) -> &str {
        &self.task_id
    }

    fn validate_record(&self) -> Result<()> {
        self.validate()
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        let mut keys = vec![
            IndexKey::persistent(workflow_tasks(&self.workflow_id)),
            IndexKey::persistent(project_tasks(&self.project_id)),
            IndexKey::expiring(tasks_by_status(self.status)),
        ];
        if let Some(agent_id) = &self.agent_id {
            keys.push(IndexKey::persistent(agent_tasks(agent_id)));
        }
        keys
    }
}

impl Indexed for Agent {
    const ENTITY: &'static str = "agent";
    const INDEX_PATTERNS: &'static [&'static str] = &[
        "agents:category:*",
        "agents:status:*",
        "agents:capability:*",
    ];

    fn id(&self) -> &str {
        &self.agent_id
    }

    fn validate_record(&self) -> Result<()> {
        self.validate()
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        let mut keys = vec![
            IndexKey::expiring(agents_by_category(self.category)),
            IndexKey::expiring(agents_by_status(self.status)),
        ];
        keys.extend(
            self.capabilities
                .iter()
                .map(|capability| IndexKey::expiring(agents_by_capability(capability))),
        );
        keys
    }
}

impl Indexed for Project {
    const ENTITY: &'static str = "project";
    const INDEX_PATTERNS: &'static [&'static str] = &[ACTIVE_PROJECTS];

    fn id(&self) -> &str {
        &self.project_id
    }

    fn validate_record(&self) -> Result<()> {
        self.validate()
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        if self.is_active {
            vec![IndexKey::persistent(ACTIVE_PROJECTS.to_string())]
        } else {
            Vec::new()
        }
    }
}

impl Indexed for ExecutionContext {
    const ENTITY: &'static str = "execution_context";
    const INDEX_PATTERNS: &'static [&'static str] =
        &["workflow:*:execution_contexts", "project:*:execution_contexts"];

    fn id(&self) -> &str {
        &self.context_id
    }

    fn validate_record(&self) -> Result<()> {
        self.validate()
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        vec![
            IndexKey::persistent(workflow_contexts(&self.workflow_id)),
            IndexKey::persistent(project_contexts(&self.project_id)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_primary_key_skips_index_sets() {
        assert_eq!(id_from_primary_key("workflow", "workflow:abc"), Some("abc"));
        assert_eq!(id_from_primary_key("workflow", "workflow:abc:tasks"), None);
        assert_eq!(id_from_primary_key("workflow", "workflows:status:running"), None);
        assert_eq!(id_from_primary_key("project", "project:"), None);
    }

    #[test]
    fn test_workflow_index_keys_follow_status() {
        let project_id = uuid::Uuid::new_v4().to_string();
        let mut workflow = Workflow::new(&project_id, WorkflowType::Production, "Pilot");
        let pending = workflow.index_keys();
        assert!(pending.contains(&IndexKey::expiring("workflows:status:pending".to_string())));
        assert!(pending.contains(&IndexKey::persistent(format!("project:{project_id}:workflows"))));

        workflow.start().unwrap();
        let running = workflow.index_keys();
        assert!(running.contains(&IndexKey::expiring("workflows:status:running".to_string())));
        assert!(!running.contains(&IndexKey::expiring("workflows:status:pending".to_string())));
    }

    #[test]
    fn test_agent_indexed_per_capability() {
        let agent = Agent::new(
            "writer",
            AgentCategory::Creative,
            vec!["script_generation".to_string(), "scene_planning".to_string()],
        );
        let keys: Vec<String> = agent.index_keys().into_iter().map(|k| k.key).collect();
        assert!(keys.contains(&"agents:capability:script_generation".to_string()));
        assert!(keys.contains(&"agents:capability:scene_planning".to_string()));
        assert!(keys.contains(&"agents:status:idle".to_string()));
    }

    #[test]
    fn test_inactive_project_leaves_active_set() {
        let mut project = Project::new("Studio", "film");
        assert_eq!(project.index_keys().len(), 1);
        project.deactivate();
        assert!(project.index_keys().is_empty());
    }
}
