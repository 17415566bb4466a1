//! Shared helpers for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use taskhive::domain::models::Config;
use taskhive::domain::ports::{AgentExecutor, ExecutionOutput, ExecutionRequest};
use taskhive::domain::OrchestratorResult;
use taskhive::infrastructure::executors::MockExecutor;

/// Config with short intervals so tests run in milliseconds.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.coordinator.poll_interval_ms = 10;
    config.coordinator.timeout_sweep_interval_ms = 20;
    config.coordinator.cancel_grace_ms = 100;
    config.coordinator.drain_timeout_ms = 2_000;
    config.agents.grace_timeout_ms = 2_000;
    config.retry.initial_backoff_ms = 10;
    config.retry.max_backoff_ms = 50;
    config.pool.acquire_timeout_ms = 200;
    config.queue.default_task_timeout_ms = 5_000;
    config
}

/// Wraps a [`MockExecutor`] and records the execution order plus the
/// highest number of simultaneously running executions observed.
pub struct TrackingExecutor {
    pub inner: Arc<MockExecutor>,
    current: AtomicUsize,
    max_seen: AtomicUsize,
    order: Mutex<Vec<Uuid>>,
}

impl TrackingExecutor {
    pub fn new(inner: MockExecutor) -> Self {
        Self {
            inner: Arc::new(inner),
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }

    pub fn execution_order(&self) -> Vec<Uuid> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for TrackingExecutor {
    fn name(&self) -> &'static str {
        "tracking"
    }

    async fn execute(&self, request: ExecutionRequest) -> OrchestratorResult<ExecutionOutput> {
        self.order.lock().unwrap().push(request.task.id);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);

        let result = self.inner.execute(request).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn cancel(&self, task_id: Uuid) -> OrchestratorResult<()> {
        self.inner.cancel(task_id).await
    }
}
