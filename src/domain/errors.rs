//! Domain errors for the Taskhive orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[Uuid]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised by the orchestration core.
///
/// Validation-class errors (`Validation`, `CycleDetected`, `QueueFull`) are
/// rejected synchronously at the API boundary and never retried. Execution-class
/// errors (`Execution`, `Timeout`) flow through the task's own retry policy.
/// `PoolExhausted` is a backpressure signal, not a defect signal.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Dependency cycle detected: {}", format_cycle_path(.0))]
    CycleDetected(Vec<Uuid>),

    #[error("Task queue full: capacity {0}")]
    QueueFull(usize),

    #[error("Agent {agent_id} at capacity ({limit} concurrent tasks)")]
    CapacityExceeded { agent_id: Uuid, limit: usize },

    #[error("Terminal pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Task timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Terminal not found: {0}")]
    TerminalNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Taxonomy bucket recorded on a task's terminal `failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Cycle,
    Capacity,
    PoolExhausted,
    Execution,
    Timeout,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Cycle => "cycle",
            Self::Capacity => "capacity",
            Self::PoolExhausted => "pool_exhausted",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl OrchestratorError {
    /// Map an error to the taxonomy bucket stored on failed tasks.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) | Self::QueueFull(_) | Self::InvalidTransition { .. } => {
                FailureKind::Validation
            }
            Self::CycleDetected(_) => FailureKind::Cycle,
            Self::CapacityExceeded { .. } => FailureKind::Capacity,
            Self::PoolExhausted { .. } => FailureKind::PoolExhausted,
            Self::Execution(_) => FailureKind::Execution,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::TaskNotFound(_) | Self::AgentNotFound(_) | Self::TerminalNotFound(_) => {
                FailureKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_formats_path() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let err = OrchestratorError::CycleDetected(vec![a, b, a]);
        let msg = err.to_string();
        assert!(msg.contains(" -> "));
        assert!(msg.contains(&a.to_string()));
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            OrchestratorError::Execution("boom".into()).failure_kind(),
            FailureKind::Execution
        );
        assert_eq!(
            OrchestratorError::Timeout { timeout_ms: 100 }.failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            OrchestratorError::PoolExhausted { waited_ms: 100 }.failure_kind(),
            FailureKind::PoolExhausted
        );
    }
}
