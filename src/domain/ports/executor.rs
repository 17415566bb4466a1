//! Agent executor port - interface for the external execution layer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::Task;

/// Everything the executor needs to run one task: the task itself plus
/// the ids of the agent identity and leased terminal session.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task: Task,
    pub agent_id: Uuid,
    pub terminal_id: Uuid,
}

/// Result payload reported by the executor on success.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub output: serde_json::Value,
}

impl ExecutionOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self { output }
    }
}

/// Trait for the external agent execution layer (e.g., an LLM invocation
/// backend). The coordinator invokes `execute` asynchronously with a
/// deadline; implementations must tolerate a best-effort `cancel` and
/// return promptly afterwards.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executor backend name, for logging.
    fn name(&self) -> &'static str;

    /// Run the task to completion. An `Err` is subject to the task's own
    /// retry policy; it never halts the coordinator.
    async fn execute(&self, request: ExecutionRequest) -> OrchestratorResult<ExecutionOutput>;

    /// Best-effort cancellation of a running task. The coordinator waits
    /// a configured grace period for `execute` to return after this call.
    async fn cancel(&self, task_id: Uuid) -> OrchestratorResult<()>;
}
