use super::JsonMap;
use crate::error::{OrchestratorError, Result};
use crate::validation::validate_uuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner of zero or more workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form classification, e.g. `short_film`
    pub project_type: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub config: JsonMap,
    #[serde(default)]
    pub resource_limits: JsonMap,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Project {
    pub fn new(name: impl Into<String>, project_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            project_type: project_type.into(),
            domain: None,
            config: JsonMap::new(),
            resource_limits: JsonMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_uuid("project_id", &self.project_id)?;
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "project name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge configuration keys, overwriting existing ones
    pub fn update_config(&mut self, updates: JsonMap) {
        self.config.extend(updates);
        self.updated_at = Utc::now();
    }

    pub fn update_resource_limits(&mut self, limits: JsonMap) {
        self.resource_limits.extend(limits);
        self.updated_at = Utc::now();
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}
