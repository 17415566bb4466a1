//! Agent registry: spawn, match, assign, release, terminate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Agent, AgentStatus};

/// Outcome of a graceful termination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Agent was idle (or forced); it is terminated now. Any task ids it
    /// still held are returned so the coordinator can fail them.
    Terminated { orphaned_tasks: Vec<Uuid> },
    /// Agent is draining: no new assignments, current tasks run on.
    Draining { remaining_tasks: Vec<Uuid> },
}

/// Serializable registry checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistrySnapshot {
    pub agents: Vec<Agent>,
}

/// Tracks the fleet of agent identities and their per-agent load.
///
/// Matching is least-loaded: among admissible agents the one with the
/// fewest in-flight tasks wins, ties broken by earliest creation.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent. Concurrency limit must be at least 1.
    pub async fn spawn(&self, agent: Agent) -> OrchestratorResult<Uuid> {
        if agent.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Validation(
                "agent max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if agent.capabilities.is_empty() {
            return Err(OrchestratorError::Validation(
                "agent must declare at least one capability".to_string(),
            ));
        }
        let id = agent.id;
        info!(agent_id = %id, agent_type = %agent.agent_type, "Agent spawned");
        self.agents.write().await.insert(id, agent);
        Ok(id)
    }

    pub async fn get(&self, agent_id: Uuid) -> OrchestratorResult<Agent> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .ok_or(OrchestratorError::AgentNotFound(agent_id))
    }

    pub async fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        agents
    }

    /// Every capability tag offered by at least one agent with spare
    /// capacity. Used by workers to scope their dequeue, so tasks whose
    /// agents are all saturated do not crowd out other capability classes.
    pub async fn capability_classes(&self) -> Vec<String> {
        let agents = self.agents.read().await;
        let mut seen = HashSet::new();
        let mut classes = Vec::new();
        for agent in agents.values() {
            if agent.status == AgentStatus::Terminated || agent.draining || !agent.has_capacity() {
                continue;
            }
            for cap in &agent.capabilities {
                if seen.insert(cap.clone()) {
                    classes.push(cap.clone());
                }
            }
        }
        classes
    }

    /// Find the least-loaded admissible agent for a capability.
    pub async fn find_admissible(&self, capability: &str) -> Option<Agent> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| a.is_admissible(capability))
            .min_by_key(|a| (a.load(), a.created_at))
            .cloned()
    }

    /// Record a task assignment, enforcing the agent's concurrency limit.
    pub async fn assign(&self, agent_id: Uuid, task_id: Uuid) -> OrchestratorResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        if agent.status == AgentStatus::Terminated || agent.draining {
            return Err(OrchestratorError::Validation(format!(
                "agent {agent_id} is not accepting assignments"
            )));
        }
        if !agent.has_capacity() {
            return Err(OrchestratorError::CapacityExceeded {
                agent_id,
                limit: agent.max_concurrent_tasks,
            });
        }
        agent.record_assignment(task_id);
        debug!(agent_id = %agent_id, task_id = %task_id, load = agent.load(), "Task assigned to agent");
        Ok(())
    }

    /// Release a task from an agent. Idempotent: releasing a task the
    /// agent does not hold is a debug-logged no-op. If the agent was
    /// draining and this was its last task, it is terminated; returns
    /// true in that case.
    pub async fn release(&self, agent_id: Uuid, task_id: Uuid) -> OrchestratorResult<bool> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        if !agent.record_release(task_id) {
            debug!(agent_id = %agent_id, task_id = %task_id, "Release of task not held by agent");
            return Ok(false);
        }
        if agent.draining && agent.current_task_ids.is_empty() {
            agent.terminate();
            info!(agent_id = %agent_id, "Draining agent finished last task, terminated");
            return Ok(true);
        }
        Ok(false)
    }

    /// Terminate an agent. Graceful termination lets in-flight tasks run
    /// to completion (the agent drains); forced termination reports the
    /// orphaned task ids so the coordinator can fail them.
    pub async fn terminate(
        &self,
        agent_id: Uuid,
        graceful: bool,
    ) -> OrchestratorResult<TerminateOutcome> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(OrchestratorError::AgentNotFound(agent_id))?;

        if agent.status == AgentStatus::Terminated {
            return Ok(TerminateOutcome::Terminated {
                orphaned_tasks: Vec::new(),
            });
        }

        let in_flight: Vec<Uuid> = agent.current_task_ids.iter().copied().collect();
        if graceful && !in_flight.is_empty() {
            agent.draining = true;
            info!(agent_id = %agent_id, remaining = in_flight.len(), "Agent draining");
            return Ok(TerminateOutcome::Draining {
                remaining_tasks: in_flight,
            });
        }

        agent.terminate();
        if in_flight.is_empty() {
            info!(agent_id = %agent_id, "Agent terminated");
        } else {
            warn!(agent_id = %agent_id, orphaned = in_flight.len(), "Agent force-terminated with tasks in flight");
        }
        Ok(TerminateOutcome::Terminated {
            orphaned_tasks: in_flight,
        })
    }

    pub async fn snapshot(&self) -> AgentRegistrySnapshot {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        AgentRegistrySnapshot { agents }
    }

    pub async fn restore(&self, snapshot: AgentRegistrySnapshot) {
        let mut agents = self.agents.write().await;
        *agents = snapshot.agents.into_iter().map(|a| (a.id, a)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn researcher(max: usize) -> Agent {
        Agent::new("researcher", vec!["research".to_string()], max)
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_capacity() {
        let registry = AgentRegistry::new();
        let err = registry.spawn(researcher(0)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_least_loaded_matching() {
        let registry = AgentRegistry::new();
        let busy = researcher(3);
        let busy_id = busy.id;
        let idle = researcher(3);
        let idle_id = idle.id;
        registry.spawn(busy).await.unwrap();
        registry.spawn(idle).await.unwrap();

        registry.assign(busy_id, Uuid::new_v4()).await.unwrap();

        let matched = registry.find_admissible("research").await.unwrap();
        assert_eq!(matched.id, idle_id);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let registry = AgentRegistry::new();
        let agent = researcher(1);
        let id = agent.id;
        registry.spawn(agent).await.unwrap();

        registry.assign(id, Uuid::new_v4()).await.unwrap();
        let err = registry.assign(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::CapacityExceeded { limit: 1, .. }
        ));
        assert!(registry.find_admissible("research").await.is_none());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = AgentRegistry::new();
        let agent = researcher(2);
        let id = agent.id;
        registry.spawn(agent).await.unwrap();

        let task = Uuid::new_v4();
        registry.assign(id, task).await.unwrap();
        registry.release(id, task).await.unwrap();
        // Releasing again does not underflow or error.
        registry.release(id, task).await.unwrap();
        assert_eq!(registry.get(id).await.unwrap().load(), 0);
    }

    #[tokio::test]
    async fn test_graceful_terminate_drains() {
        let registry = AgentRegistry::new();
        let agent = researcher(2);
        let id = agent.id;
        registry.spawn(agent).await.unwrap();
        let task = Uuid::new_v4();
        registry.assign(id, task).await.unwrap();

        let outcome = registry.terminate(id, true).await.unwrap();
        assert_eq!(
            outcome,
            TerminateOutcome::Draining {
                remaining_tasks: vec![task]
            }
        );

        // Draining agent accepts no new work.
        assert!(registry.find_admissible("research").await.is_none());
        let err = registry.assign(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        // Last release completes the termination.
        let terminated = registry.release(id, task).await.unwrap();
        assert!(terminated);
        assert_eq!(
            registry.get(id).await.unwrap().status,
            AgentStatus::Terminated
        );
    }

    #[tokio::test]
    async fn test_forced_terminate_reports_orphans() {
        let registry = AgentRegistry::new();
        let agent = researcher(2);
        let id = agent.id;
        registry.spawn(agent).await.unwrap();
        let task = Uuid::new_v4();
        registry.assign(id, task).await.unwrap();

        let outcome = registry.terminate(id, false).await.unwrap();
        assert_eq!(
            outcome,
            TerminateOutcome::Terminated {
                orphaned_tasks: vec![task]
            }
        );
    }

    #[tokio::test]
    async fn test_capability_classes_exclude_terminated() {
        let registry = AgentRegistry::new();
        let researcher_agent = researcher(1);
        let researcher_id = researcher_agent.id;
        registry.spawn(researcher_agent).await.unwrap();
        registry
            .spawn(Agent::new(
                "implementer",
                vec!["implementation".to_string()],
                1,
            ))
            .await
            .unwrap();

        let mut classes = registry.capability_classes().await;
        classes.sort();
        assert_eq!(classes, vec!["implementation", "research"]);

        // Saturated agents no longer advertise their class.
        registry
            .assign(researcher_id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(registry.capability_classes().await, vec!["implementation"]);

        registry.terminate(researcher_id, false).await.unwrap();
        assert_eq!(registry.capability_classes().await, vec!["implementation"]);
    }
}
