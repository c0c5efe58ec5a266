//! Sweeps over the whole keyspace: age-based cleanup and index repair.

use super::keys::Indexed;
use super::store::StateStore;
use crate::error::Result;
use crate::models::{Agent, ExecutionContext, Project, Task, Workflow};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of [`StateStore::repair_indexes`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Members dropped because their record is gone or no longer belongs
    pub stale_removed: usize,
    /// Memberships restored for records missing from an index
    pub missing_added: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.stale_removed == 0 && self.missing_added == 0
    }
}

impl StateStore {
    /// Delete terminal workflows and tasks last updated before the cutoff.
    /// Returns the number of records removed.
    pub async fn cleanup(&self, max_age_days: u32) -> Result<usize> {
        self.ensure_connected()?;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let mut removed = 0;

        for workflow_id in self.scan_ids::<Workflow>().await {
            let Some(workflow) = self.load::<Workflow>(&workflow_id).await else {
                continue;
            };
            if workflow.status.is_terminal()
                && workflow.updated_at < cutoff
                && self.delete_workflow(&workflow_id).await?
            {
                removed += 1;
            }
        }

        for task_id in self.scan_ids::<Task>().await {
            let Some(task) = self.load::<Task>(&task_id).await else {
                continue;
            };
            if task.status.is_terminal() && task.updated_at < cutoff && self.delete_task(&task_id).await? {
                removed += 1;
            }
        }

        info!(
            max_age_days = max_age_days,
            removed = removed,
            "Cleaned up terminal workflows and tasks"
        );
        Ok(removed)
    }

    /// Reconcile every secondary index with the primary records
    pub async fn repair_indexes(&self) -> Result<RepairReport> {
        self.ensure_connected()?;
        let mut report = RepairReport::default();

        self.repair_family::<Workflow>(&mut report).await;
        self.repair_family::<Task>(&mut report).await;
        self.repair_family::<Agent>(&mut report).await;
        self.repair_family::<Project>(&mut report).await;
        self.repair_family::<ExecutionContext>(&mut report).await;

        info!(
            stale_removed = report.stale_removed,
            missing_added = report.missing_added,
            "Index repair finished"
        );
        Ok(report)
    }

    async fn repair_family<T: Indexed>(&self, report: &mut RepairReport) {
        for pattern in T::INDEX_PATTERNS {
            let index_keys = self.absorb(
                "scan",
                pattern,
                self.backend.scan_keys(pattern).await,
                Vec::new(),
            );
            for index_key in index_keys {
                let members = self.absorb(
                    "smembers",
                    &index_key,
                    self.backend.set_members(&index_key).await,
                    Vec::new(),
                );
                for member in members {
                    let belongs = self
                        .load::<T>(&member)
                        .await
                        .is_some_and(|record| record.index_keys().iter().any(|k| k.key == index_key));
                    if !belongs && self.remove_membership(&index_key, &member).await {
                        debug!(index = %index_key, member = %member, "Removed stale index member");
                        report.stale_removed += 1;
                    }
                }
            }
        }

        for id in self.scan_ids::<T>().await {
            let Some(record) = self.load::<T>(&id).await else {
                continue;
            };
            for index in record.index_keys() {
                if self.add_membership(&index, &id).await {
                    debug!(index = %index.key, member = %id, "Restored missing index member");
                    report.missing_added += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowType;
    use crate::state_store::keys;

    #[tokio::test]
    async fn test_repair_restores_and_prunes() {
        let store = StateStore::in_memory();
        let project = Project::new("Studio", "film");
        store.save_project(&project).await.unwrap();
        let workflow = Workflow::new(&project.project_id, WorkflowType::Production, "Pilot");
        store.save_workflow(&workflow).await.unwrap();

        let status_key = keys::workflows_by_status(workflow.status);
        store.backend.set_remove(&status_key, &workflow.workflow_id).await.unwrap();
        store.backend.set_add(&status_key, "ghost").await.unwrap();

        let report = store.repair_indexes().await.unwrap();
        assert_eq!(report.stale_removed, 1);
        assert_eq!(report.missing_added, 1);

        let members = store.backend.set_members(&status_key).await.unwrap();
        assert_eq!(members, vec![workflow.workflow_id.clone()]);
        assert!(store.repair_indexes().await.unwrap().is_clean());
    }
}
