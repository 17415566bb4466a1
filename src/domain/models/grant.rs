//! Resource admission records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-agent resource ceilings used for admission control.
///
/// Memory and CPU limits are carried on the grant for the executor's
/// benefit; the core enforces the concurrent-task ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Memory ceiling in megabytes
    pub memory_limit_mb: u64,
    /// CPU ceiling as a percentage (0.0 - 100.0)
    pub cpu_limit_percent: f64,
    /// Maximum concurrently admitted tasks
    pub max_active: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            cpu_limit_percent: 100.0,
            max_active: 3,
        }
    }
}

impl AgentLimits {
    pub fn with_max_active(max_active: usize) -> Self {
        Self {
            max_active,
            ..Self::default()
        }
    }
}

/// An admission-control record for one task on one agent. Issued and
/// revoked exclusively by the resource ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGrant {
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub memory_limit_mb: u64,
    pub cpu_limit_percent: f64,
}
