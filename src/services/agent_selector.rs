use crate::error::{OrchestratorError, Result};
use crate::models::Agent;
use crate::state_store::StateStore;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Picks the agent that runs a stage's task
///
/// Policy:
/// - Prefer agents that are idle with spare capacity, lowest error rate first
/// - Otherwise fall back to the lowest error rate among all candidates,
///   whatever their status, so work degrades instead of failing
/// - Ties keep the first candidate in roster order
///
/// Only an empty candidate set is a hard failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentSelector;

fn by_error_rate(a: &&Agent, b: &&Agent) -> Ordering {
    a.error_rate()
        .partial_cmp(&b.error_rate())
        .unwrap_or(Ordering::Equal)
}

impl AgentSelector {
    pub fn new() -> Self {
        Self
    }

    /// Apply the selection policy to an already-fetched roster
    pub fn select<'a>(&self, candidates: &'a [Agent]) -> Option<&'a Agent> {
        // min_by returns the first of equal minima
        let available = candidates
            .iter()
            .filter(|a| a.status.is_available() && a.can_accept_task())
            .min_by(by_error_rate);

        if available.is_some() {
            return available;
        }

        let fallback = candidates.iter().min_by(by_error_rate);
        if let Some(agent) = fallback {
            warn!(
                agent_id = %agent.agent_id,
                status = %agent.status,
                "No available agent, falling back to lowest error rate"
            );
        }
        fallback
    }

    /// Fetch agents advertising `capability` and select one of them
    pub async fn select_for_capability(&self, store: &StateStore, capability: &str) -> Result<Agent> {
        let candidates = store.list_agents_by_capability(capability).await?;
        debug!(
            capability = capability,
            candidates = candidates.len(),
            "Selecting agent"
        );

        self.select(&candidates)
            .cloned()
            .ok_or_else(|| OrchestratorError::AgentUnavailable {
                capability: capability.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentCategory;
    use crate::state_machine::AgentStatus;

    fn writer(name: &str, error_rate: f64, status: AgentStatus) -> Agent {
        Agent::new(name, AgentCategory::Creative, vec!["script_generation".to_string()])
            .with_error_rate(error_rate)
            .with_status(status)
    }

    #[test]
    fn test_available_beats_lower_error_rate() {
        let agents = vec![
            writer("a", 0.3, AgentStatus::Idle),
            writer("b", 0.1, AgentStatus::Busy),
        ];
        let chosen = AgentSelector::new().select(&agents).unwrap();
        assert_eq!(chosen.name, "a");
    }

    #[test]
    fn test_falls_back_to_lowest_error_rate() {
        let agents = vec![
            writer("a", 0.3, AgentStatus::Busy),
            writer("b", 0.1, AgentStatus::Busy),
        ];
        let chosen = AgentSelector::new().select(&agents).unwrap();
        assert_eq!(chosen.name, "b");
    }

    #[test]
    fn test_ties_keep_roster_order() {
        let agents = vec![
            writer("first", 0.2, AgentStatus::Idle),
            writer("second", 0.2, AgentStatus::Idle),
        ];
        assert_eq!(AgentSelector::new().select(&agents).unwrap().name, "first");
    }

    #[test]
    fn test_empty_roster_selects_nothing() {
        assert!(AgentSelector::new().select(&[]).is_none());
    }

    #[tokio::test]
    async fn test_missing_capability_is_agent_unavailable() {
        let store = StateStore::in_memory();
        let err = AgentSelector::new()
            .select_for_capability(&store, "voice_generation")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::AgentUnavailable {
                capability: "voice_generation".to_string()
            }
        );
    }
}
