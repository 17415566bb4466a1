//! Agent domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Agent status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Terminated,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "terminated" => Ok(Self::Terminated),
            _ => Err(anyhow::anyhow!("Invalid agent status: {s}")),
        }
    }
}

/// A logical worker identity capable of executing tasks, with a
/// concurrency limit. Cross-references to tasks are plain ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier
    pub id: Uuid,

    /// Type of agent (e.g., "researcher", "implementer")
    pub agent_type: String,

    /// Capability tags this agent satisfies
    pub capabilities: Vec<String>,

    /// Current agent status
    pub status: AgentStatus,

    /// Maximum concurrent tasks
    pub max_concurrent_tasks: usize,

    /// IDs of currently executing tasks (size <= max_concurrent_tasks)
    pub current_task_ids: HashSet<Uuid>,

    /// Graceful termination in progress: no new assignments accepted
    pub draining: bool,

    /// Agent creation timestamp
    pub created_at: DateTime<Utc>,

    /// Agent termination timestamp (if terminated)
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Create a new idle agent.
    pub fn new(agent_type: impl Into<String>, capabilities: Vec<String>, max_concurrent_tasks: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            capabilities,
            status: AgentStatus::Idle,
            max_concurrent_tasks,
            current_task_ids: HashSet::new(),
            draining: false,
            created_at: Utc::now(),
            terminated_at: None,
        }
    }

    /// Number of tasks currently assigned.
    pub fn load(&self) -> usize {
        self.current_task_ids.len()
    }

    /// Whether the agent has spare concurrency headroom.
    pub fn has_capacity(&self) -> bool {
        self.load() < self.max_concurrent_tasks
    }

    /// Whether the agent satisfies the given capability tag.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Whether the agent may accept a new task requiring `capability`.
    ///
    /// Admissible means: not terminated, not draining, capability matches,
    /// and below its concurrency limit.
    pub fn is_admissible(&self, capability: &str) -> bool {
        self.status != AgentStatus::Terminated
            && !self.draining
            && self.has_capability(capability)
            && self.has_capacity()
    }

    /// Record a task assignment. Caller must have checked capacity.
    pub fn record_assignment(&mut self, task_id: Uuid) {
        self.current_task_ids.insert(task_id);
        self.status = AgentStatus::Busy;
    }

    /// Release a task. Returns true if the id was actually held.
    pub fn record_release(&mut self, task_id: Uuid) -> bool {
        let removed = self.current_task_ids.remove(&task_id);
        if self.current_task_ids.is_empty() && self.status == AgentStatus::Busy {
            self.status = AgentStatus::Idle;
        }
        removed
    }

    /// Terminate the agent.
    pub fn terminate(&mut self) {
        self.status = AgentStatus::Terminated;
        self.draining = false;
        self.terminated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent(max: usize) -> Agent {
        Agent::new("researcher", vec!["research".to_string()], max)
    }

    #[test]
    fn test_agent_status_roundtrip() {
        assert_eq!("idle".parse::<AgentStatus>().unwrap(), AgentStatus::Idle);
        assert_eq!("BUSY".parse::<AgentStatus>().unwrap(), AgentStatus::Busy);
        assert!("invalid".parse::<AgentStatus>().is_err());
        assert_eq!(AgentStatus::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_admissibility() {
        let mut agent = test_agent(1);
        assert!(agent.is_admissible("research"));
        assert!(!agent.is_admissible("implementation"));

        agent.record_assignment(Uuid::new_v4());
        assert_eq!(agent.status, AgentStatus::Busy);
        assert!(!agent.is_admissible("research"));
    }

    #[test]
    fn test_busy_agent_with_headroom_is_admissible() {
        let mut agent = test_agent(2);
        agent.record_assignment(Uuid::new_v4());
        assert_eq!(agent.status, AgentStatus::Busy);
        assert!(agent.is_admissible("research"));
    }

    #[test]
    fn test_release_returns_to_idle() {
        let mut agent = test_agent(2);
        let task = Uuid::new_v4();
        agent.record_assignment(task);
        assert!(agent.record_release(task));
        assert_eq!(agent.status, AgentStatus::Idle);
        // Releasing again is a no-op
        assert!(!agent.record_release(task));
    }

    #[test]
    fn test_draining_blocks_new_assignments() {
        let mut agent = test_agent(2);
        agent.draining = true;
        assert!(!agent.is_admissible("research"));
    }

    #[test]
    fn test_terminate() {
        let mut agent = test_agent(1);
        agent.terminate();
        assert_eq!(agent.status, AgentStatus::Terminated);
        assert!(agent.terminated_at.is_some());
    }
}
