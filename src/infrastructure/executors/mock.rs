//! Scripted in-memory executor for tests and the demo runner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{AgentExecutor, ExecutionOutput, ExecutionRequest};

/// Scripted behavior for one task (or the default for unscripted tasks).
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return the given payload immediately.
    Succeed(serde_json::Value),
    /// Fail with an execution error.
    Fail(String),
    /// Sleep, then succeed. Interruptible by `cancel`.
    Delay(u64),
    /// Never return until cancelled; exercises timeout and forced-stop
    /// paths.
    Hang,
    /// Fail the first `n` calls, then succeed. Exercises retry.
    FailTimes(u32),
}

/// In-memory [`AgentExecutor`] whose responses are scripted per task id.
/// Records call counts so tests can assert dispatch behavior.
pub struct MockExecutor {
    default_behavior: MockBehavior,
    behaviors: Mutex<HashMap<Uuid, MockBehavior>>,
    calls: Mutex<HashMap<Uuid, u32>>,
    cancels: Mutex<HashMap<Uuid, Arc<Notify>>>,
}

impl MockExecutor {
    /// Executor that succeeds every call with an empty payload.
    pub fn new() -> Self {
        Self::with_default(MockBehavior::Succeed(serde_json::json!({"status": "ok"})))
    }

    pub fn with_default(default_behavior: MockBehavior) -> Self {
        Self {
            default_behavior,
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Script the behavior for a specific task.
    pub fn script(&self, task_id: Uuid, behavior: MockBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(task_id, behavior);
    }

    /// How many times `execute` was called for this task.
    pub fn call_count(&self, task_id: Uuid) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&task_id)
            .copied()
            .unwrap_or(0)
    }

    /// Total `execute` calls across all tasks.
    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .sum()
    }

    fn cancel_notify(&self, task_id: Uuid) -> Arc<Notify> {
        Arc::clone(
            self.cancels
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .entry(task_id)
                .or_default(),
        )
    }

    fn record_call(&self, task_id: Uuid) -> u32 {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = calls.entry(task_id).or_insert(0);
        *count += 1;
        *count
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, request: ExecutionRequest) -> OrchestratorResult<ExecutionOutput> {
        let task_id = request.task.id;
        let call = self.record_call(task_id);
        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone());
        let cancelled = self.cancel_notify(task_id);

        debug!(task_id = %task_id, call, "Mock execute");
        match behavior {
            MockBehavior::Succeed(payload) => Ok(ExecutionOutput::new(payload)),
            MockBehavior::Fail(message) => Err(OrchestratorError::Execution(message)),
            MockBehavior::Delay(ms) => {
                tokio::select! {
                    () = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {
                        Ok(ExecutionOutput::new(serde_json::json!({"status": "ok"})))
                    }
                    () = cancelled.notified() => {
                        Err(OrchestratorError::Execution("cancelled".to_string()))
                    }
                }
            }
            MockBehavior::Hang => {
                cancelled.notified().await;
                Err(OrchestratorError::Execution("cancelled".to_string()))
            }
            MockBehavior::FailTimes(n) => {
                if call <= n {
                    Err(OrchestratorError::Execution(format!(
                        "scripted failure {call} of {n}"
                    )))
                } else {
                    Ok(ExecutionOutput::new(serde_json::json!({"status": "ok"})))
                }
            }
        }
    }

    async fn cancel(&self, task_id: Uuid) -> OrchestratorResult<()> {
        debug!(task_id = %task_id, "Mock cancel");
        self.cancel_notify(task_id).notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Task;

    fn request(task: &Task) -> ExecutionRequest {
        ExecutionRequest {
            task: task.clone(),
            agent_id: Uuid::new_v4(),
            terminal_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_default_succeeds_and_counts() {
        let executor = MockExecutor::new();
        let task = Task::new("t");
        executor.execute(request(&task)).await.unwrap();
        executor.execute(request(&task)).await.unwrap();
        assert_eq!(executor.call_count(task.id), 2);
    }

    #[tokio::test]
    async fn test_fail_times_then_succeeds() {
        let executor = MockExecutor::new();
        let task = Task::new("flaky");
        executor.script(task.id, MockBehavior::FailTimes(2));

        assert!(executor.execute(request(&task)).await.is_err());
        assert!(executor.execute(request(&task)).await.is_err());
        assert!(executor.execute(request(&task)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_hang() {
        let executor = Arc::new(MockExecutor::new());
        let task = Task::new("stuck");
        executor.script(task.id, MockBehavior::Hang);

        let exec = Arc::clone(&executor);
        let req = request(&task);
        let handle = tokio::spawn(async move { exec.execute(req).await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        executor.cancel(task.id).await.unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Execution(_))));
    }
}
