//! Resource ledger: admission control for per-agent resource ceilings.
//!
//! The ledger is the single issuer of [`ResourceGrant`]s. Admission is
//! all-or-nothing against the agent's registered limits, and release is
//! idempotent so the coordinator's reconciliation can always call it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{AgentLimits, ResourceGrant};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    limits: AgentLimits,
    active: HashSet<Uuid>,
}

/// Serializable ledger checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLedgerSnapshot {
    entries: HashMap<Uuid, LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: RwLock<HashMap<Uuid, LedgerEntry>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent's resource ceilings. Replaces any prior limits
    /// but preserves active grants.
    pub async fn register_agent(&self, agent_id: Uuid, limits: AgentLimits) {
        let mut entries = self.entries.write().await;
        entries
            .entry(agent_id)
            .and_modify(|e| e.limits = limits)
            .or_insert_with(|| LedgerEntry {
                limits,
                active: HashSet::new(),
            });
    }

    /// Drop an agent from the ledger, revoking any outstanding grants.
    pub async fn deregister_agent(&self, agent_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(&agent_id) {
            if !entry.active.is_empty() {
                warn!(agent_id = %agent_id, revoked = entry.active.len(), "Agent deregistered with active grants");
            }
        }
    }

    /// Admit a task against the agent's limits. Fails with
    /// `CapacityExceeded` when the agent is at its active-task ceiling;
    /// nothing is partially recorded on failure.
    pub async fn admit(&self, agent_id: Uuid, task_id: Uuid) -> OrchestratorResult<ResourceGrant> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&agent_id)
            .ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        if entry.active.len() >= entry.limits.max_active {
            return Err(OrchestratorError::CapacityExceeded {
                agent_id,
                limit: entry.limits.max_active,
            });
        }
        entry.active.insert(task_id);
        debug!(agent_id = %agent_id, task_id = %task_id, active = entry.active.len(), "Resource grant issued");
        Ok(ResourceGrant {
            agent_id,
            task_id,
            memory_limit_mb: entry.limits.memory_limit_mb,
            cpu_limit_percent: entry.limits.cpu_limit_percent,
        })
    }

    /// Revoke a grant. Idempotent: unknown agents or tasks are no-ops, so
    /// reconciliation can release unconditionally.
    pub async fn release(&self, agent_id: Uuid, task_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&agent_id) {
            if entry.active.remove(&task_id) {
                debug!(agent_id = %agent_id, task_id = %task_id, "Resource grant released");
            }
        }
    }

    /// Number of active grants for an agent.
    pub async fn active_count(&self, agent_id: Uuid) -> usize {
        self.entries
            .read()
            .await
            .get(&agent_id)
            .map_or(0, |e| e.active.len())
    }

    /// Total active grants across all agents.
    pub async fn total_active(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.active.len())
            .sum()
    }

    pub async fn snapshot(&self) -> ResourceLedgerSnapshot {
        ResourceLedgerSnapshot {
            entries: self.entries.read().await.clone(),
        }
    }

    pub async fn restore(&self, snapshot: ResourceLedgerSnapshot) {
        *self.entries.write().await = snapshot.entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admit_until_ceiling() {
        let ledger = ResourceLedger::new();
        let agent = Uuid::new_v4();
        ledger
            .register_agent(agent, AgentLimits::with_max_active(2))
            .await;

        let grant = ledger.admit(agent, Uuid::new_v4()).await.unwrap();
        assert_eq!(grant.agent_id, agent);
        ledger.admit(agent, Uuid::new_v4()).await.unwrap();

        let err = ledger.admit(agent, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::CapacityExceeded { limit: 2, .. }
        ));
        assert_eq!(ledger.active_count(agent).await, 2);
    }

    #[tokio::test]
    async fn test_release_frees_slot_and_is_idempotent() {
        let ledger = ResourceLedger::new();
        let agent = Uuid::new_v4();
        ledger
            .register_agent(agent, AgentLimits::with_max_active(1))
            .await;

        let task = Uuid::new_v4();
        ledger.admit(agent, task).await.unwrap();
        ledger.release(agent, task).await;
        ledger.release(agent, task).await;
        assert_eq!(ledger.active_count(agent).await, 0);

        // Slot is reusable after release.
        ledger.admit(agent, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_agent_rejected() {
        let ledger = ResourceLedger::new();
        let err = ledger
            .admit(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_grant_carries_limits() {
        let ledger = ResourceLedger::new();
        let agent = Uuid::new_v4();
        ledger
            .register_agent(
                agent,
                AgentLimits {
                    memory_limit_mb: 1024,
                    cpu_limit_percent: 50.0,
                    max_active: 1,
                },
            )
            .await;

        let grant = ledger.admit(agent, Uuid::new_v4()).await.unwrap();
        assert_eq!(grant.memory_limit_mb, 1024);
        assert!((grant.cpu_limit_percent - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reregister_keeps_active_grants() {
        let ledger = ResourceLedger::new();
        let agent = Uuid::new_v4();
        ledger
            .register_agent(agent, AgentLimits::with_max_active(2))
            .await;
        ledger.admit(agent, Uuid::new_v4()).await.unwrap();

        ledger
            .register_agent(agent, AgentLimits::with_max_active(1))
            .await;
        assert_eq!(ledger.active_count(agent).await, 1);
        // New ceiling applies to new admissions.
        let err = ledger.admit(agent, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CapacityExceeded { .. }));
    }
}
