//! Coordinator: the orchestration control loop.
//!
//! Workers poll the queue for eligible work, match it to the least-loaded
//! admissible agent, acquire a resource grant and a terminal lease, and
//! hand the task to the executor. Reconciliation releases every acquired
//! resource exactly once no matter how execution ended, so a crashing
//! executor can never leak agent slots, grants, or terminals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{FailureKind, OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    Agent, AgentLimits, CancelReason, Config, Task, TaskFailure,
};
use crate::domain::ports::{AgentExecutor, ExecutionOutput, ExecutionRequest};
use crate::services::{
    AgentRegistry, FailureDisposition, PoolStats, QueueStats, ResourceLedger, TaskQueueService,
    TerminalPool, TerminateOutcome,
};
use crate::services::task_queue::CancelDisposition;

/// Lifecycle events published on the coordinator's broadcast channel.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Started,
    Stopped,
    TaskDispatched {
        task_id: Uuid,
        agent_id: Uuid,
        terminal_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
    },
    TaskFailed {
        task_id: Uuid,
        kind: FailureKind,
    },
    TaskRetryScheduled {
        task_id: Uuid,
        attempt: u32,
        delay_ms: u64,
    },
    TaskCancelled {
        task_id: Uuid,
    },
    TaskRequeued {
        task_id: Uuid,
    },
    AgentSpawned {
        agent_id: Uuid,
    },
    AgentDraining {
        agent_id: Uuid,
    },
    AgentTerminated {
        agent_id: Uuid,
    },
}

/// Aggregated status report.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub queue: QueueStats,
    pub pool: PoolStats,
    pub agents: usize,
    pub in_flight: usize,
}

/// Why a running execution was interrupted from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForcedStop {
    DeadlineExceeded,
    CancelGraceExpired,
    AgentTerminated,
    Shutdown,
}

struct RunningHandle {
    agent_id: Uuid,
    forced: Arc<Notify>,
    forced_stop: Option<ForcedStop>,
    cancel_requested: bool,
}

enum ExecOutcome {
    Success(ExecutionOutput),
    Failure(OrchestratorError),
    TimedOut,
    Forced,
}

pub struct Coordinator {
    queue: Arc<TaskQueueService>,
    registry: Arc<AgentRegistry>,
    ledger: Arc<ResourceLedger>,
    pool: Arc<TerminalPool>,
    executor: Arc<dyn AgentExecutor>,
    config: Config,
    running: Arc<RwLock<HashMap<Uuid, RunningHandle>>>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Coordinator {
    pub fn new<E: AgentExecutor + 'static>(config: Config, executor: Arc<E>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue: Arc::new(TaskQueueService::new(
                config.queue.clone(),
                config.retry.clone(),
            )),
            registry: Arc::new(AgentRegistry::new()),
            ledger: Arc::new(ResourceLedger::new()),
            pool: Arc::new(TerminalPool::new(config.pool.clone())),
            executor,
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            shutdown_tx,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueueService> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<TerminalPool> {
        &self.pool
    }

    /// Subscribe to lifecycle events. Slow subscribers may observe lag.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Spawn an agent and register its resource limits with the ledger.
    pub async fn spawn_agent(&self, mut agent: Agent) -> OrchestratorResult<Uuid> {
        if agent.max_concurrent_tasks == 0 {
            agent.max_concurrent_tasks = self.config.agents.max_concurrent_default;
        }
        let limits = AgentLimits::with_max_active(agent.max_concurrent_tasks);
        let id = self.registry.spawn(agent).await?;
        self.ledger.register_agent(id, limits).await;
        self.emit(CoordinatorEvent::AgentSpawned { agent_id: id });
        Ok(id)
    }

    /// Submit a task to the queue.
    pub async fn submit_task(&self, task: Task) -> OrchestratorResult<Uuid> {
        self.queue.enqueue(task).await
    }

    /// Start the control loop: dispatch workers, the timeout sweep, and
    /// the terminal pool health checker. Returns the spawned handles.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.coordinator.workers, "Coordinator starting");
        self.emit(CoordinatorEvent::Started);

        let mut handles = Vec::new();
        handles.push(self.pool.start_health_checker());
        handles.push(self.start_timeout_sweep());
        for worker_id in 0..self.config.coordinator.workers {
            handles.push(self.start_worker(worker_id));
        }
        handles
    }

    fn start_worker(self: &Arc<Self>, worker_id: usize) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll = Duration::from_millis(self.config.coordinator.poll_interval_ms);
        tokio::spawn(async move {
            debug!(worker_id, "Dispatch worker started");
            loop {
                // A dispatch in progress is never cancelled: shutdown is
                // only raced against the idle sleep and checked between
                // attempts, so a partially acquired agent/grant/terminal
                // always unwinds through the dispatch path itself.
                if coordinator.dispatch_one().await {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                } else {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        () = tokio::time::sleep(poll) => {}
                    }
                }
            }
            debug!(worker_id, "Dispatch worker stopped");
        })
    }

    fn start_timeout_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_millis(self.config.coordinator.timeout_sweep_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        coordinator.sweep_overdue().await;
                    }
                }
            }
        })
    }

    async fn sweep_overdue(&self) {
        let overdue = self.queue.running_past_deadline().await;
        if overdue.is_empty() {
            return;
        }
        let mut running = self.running.write().await;
        for task_id in overdue {
            if let Some(handle) = running.get_mut(&task_id) {
                if handle.forced_stop.is_none() {
                    warn!(task_id = %task_id, "Task deadline exceeded, forcing stop");
                    handle.forced_stop = Some(ForcedStop::DeadlineExceeded);
                    handle.forced.notify_one();
                }
            }
        }
    }

    /// One dispatch attempt. Returns true when a task was handed off, so
    /// the worker loop polls again immediately instead of sleeping.
    async fn dispatch_one(self: &Arc<Self>) -> bool {
        let capabilities = self.registry.capability_classes().await;
        if capabilities.is_empty() {
            return false;
        }
        let task = match self.queue.dequeue_eligible(&capabilities).await {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(e) => {
                error!(error = %e, "Dequeue failed");
                return false;
            }
        };

        match self.dispatch(task).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                error!(error = %e, "Dispatch failed");
                false
            }
        }
    }

    /// Acquire agent, grant, and terminal for an assigned task, unwinding
    /// whatever was already acquired on any failure. Resource shortfall is
    /// backpressure, not an error: the task is returned to the queue.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn dispatch(self: &Arc<Self>, task: Task) -> OrchestratorResult<bool> {
        let capability = task.kind.required_capability();

        let Some(agent) = self.registry.find_admissible(capability).await else {
            self.queue.requeue(task.id).await?;
            self.emit(CoordinatorEvent::TaskRequeued { task_id: task.id });
            return Ok(false);
        };
        let agent_id = agent.id;

        if let Err(e) = self.registry.assign(agent_id, task.id).await {
            debug!(error = %e, "Agent assignment lost race, requeueing");
            self.queue.requeue(task.id).await?;
            return Ok(false);
        }

        let grant = match self.ledger.admit(agent_id, task.id).await {
            Ok(grant) => grant,
            Err(e) => {
                debug!(error = %e, "Resource admission denied, requeueing");
                self.registry.release(agent_id, task.id).await?;
                self.queue.requeue(task.id).await?;
                return Ok(false);
            }
        };

        let terminal = match self.pool.acquire().await {
            Ok(terminal) => terminal,
            Err(OrchestratorError::PoolExhausted { waited_ms }) => {
                debug!(waited_ms, "Terminal pool exhausted, requeueing");
                self.ledger.release(agent_id, task.id).await;
                self.registry.release(agent_id, task.id).await?;
                self.queue.requeue(task.id).await?;
                self.emit(CoordinatorEvent::TaskRequeued { task_id: task.id });
                return Ok(false);
            }
            Err(e) => {
                self.ledger.release(agent_id, task.id).await;
                self.registry.release(agent_id, task.id).await?;
                self.queue.requeue(task.id).await?;
                return Err(e);
            }
        };

        let running_task = match self.queue.mark_running(task.id, agent_id).await {
            Ok(task) => task,
            Err(e) => {
                // Task was cancelled between dequeue and start. Unwind.
                debug!(error = %e, "Task no longer startable, unwinding dispatch");
                if let Err(e) = self.pool.release(terminal.id).await {
                    warn!(terminal_id = %terminal.id, error = %e, "Terminal release failed");
                }
                self.ledger.release(agent_id, task.id).await;
                self.registry.release(agent_id, task.id).await?;
                return Ok(false);
            }
        };
        let forced = Arc::new(Notify::new());
        self.running.write().await.insert(
            task.id,
            RunningHandle {
                agent_id,
                forced: Arc::clone(&forced),
                forced_stop: None,
                cancel_requested: false,
            },
        );

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            terminal_id = %terminal.id,
            memory_limit_mb = grant.memory_limit_mb,
            "Task dispatched"
        );
        self.emit(CoordinatorEvent::TaskDispatched {
            task_id: task.id,
            agent_id,
            terminal_id: terminal.id,
        });

        let coordinator = Arc::clone(self);
        let terminal_id = terminal.id;
        tokio::spawn(async move {
            coordinator
                .execute_and_reconcile(running_task, agent_id, terminal_id, forced)
                .await;
        });
        Ok(true)
    }

    async fn execute_and_reconcile(
        &self,
        task: Task,
        agent_id: Uuid,
        terminal_id: Uuid,
        forced: Arc<Notify>,
    ) {
        let task_id = task.id;
        let timeout_ms = task
            .timeout_ms
            .unwrap_or(self.config.queue.default_task_timeout_ms);
        let request = ExecutionRequest {
            task,
            agent_id,
            terminal_id,
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.executor.execute(request),
            ) => match res {
                Ok(Ok(output)) => ExecOutcome::Success(output),
                Ok(Err(e)) => ExecOutcome::Failure(e),
                Err(_) => ExecOutcome::TimedOut,
            },
            () = forced.notified() => ExecOutcome::Forced,
        };

        self.reconcile(task_id, agent_id, terminal_id, timeout_ms, outcome)
            .await;
    }

    /// Release every acquired resource, then record the task outcome.
    /// Releases run unconditionally and before outcome bookkeeping, so
    /// no path (including executor errors) can leak a lease or grant.
    async fn reconcile(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        terminal_id: Uuid,
        timeout_ms: u64,
        outcome: ExecOutcome,
    ) {
        let handle = self.running.write().await.remove(&task_id);
        let (cancel_requested, forced_stop) = handle
            .map_or((false, None), |h| (h.cancel_requested, h.forced_stop));

        if let Err(e) = self.pool.release(terminal_id).await {
            warn!(terminal_id = %terminal_id, error = %e, "Terminal release failed");
        }
        self.ledger.release(agent_id, task_id).await;
        match self.registry.release(agent_id, task_id).await {
            Ok(true) => {
                self.ledger.deregister_agent(agent_id).await;
                self.emit(CoordinatorEvent::AgentTerminated { agent_id });
            }
            Ok(false) => {}
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Agent release failed"),
        }

        let result = match outcome {
            ExecOutcome::Success(output) => self.record_completion(task_id, output).await,
            ExecOutcome::Failure(e) if cancel_requested => {
                debug!(task_id = %task_id, error = %e, "Executor stopped after cancel request");
                self.record_cancellation(task_id, CancelReason::Explicit).await
            }
            ExecOutcome::Failure(e) => {
                let failure = TaskFailure {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                };
                self.record_failure(task_id, failure).await
            }
            ExecOutcome::TimedOut => {
                self.record_failure(task_id, TaskFailure::timeout(timeout_ms))
                    .await
            }
            ExecOutcome::Forced => {
                // Best-effort stop of whatever the executor is still doing.
                if let Err(e) = self.executor.cancel(task_id).await {
                    debug!(task_id = %task_id, error = %e, "Executor cancel after forced stop failed");
                }
                match forced_stop {
                    Some(ForcedStop::DeadlineExceeded) => {
                        self.record_failure(task_id, TaskFailure::timeout(timeout_ms))
                            .await
                    }
                    Some(ForcedStop::AgentTerminated) => {
                        self.record_failure(
                            task_id,
                            TaskFailure::execution("agent terminated while task was running"),
                        )
                        .await
                    }
                    Some(ForcedStop::CancelGraceExpired | ForcedStop::Shutdown) | None => {
                        self.record_cancellation(task_id, CancelReason::Explicit)
                            .await
                    }
                }
            }
        };
        if let Err(e) = result {
            error!(task_id = %task_id, error = %e, "Outcome bookkeeping failed");
        }
    }

    async fn record_completion(
        &self,
        task_id: Uuid,
        output: ExecutionOutput,
    ) -> OrchestratorResult<()> {
        let promoted = self.queue.mark_completed(task_id, output.output).await?;
        debug!(task_id = %task_id, unblocked = promoted.len(), "Completion recorded");
        self.emit(CoordinatorEvent::TaskCompleted { task_id });
        Ok(())
    }

    async fn record_failure(&self, task_id: Uuid, failure: TaskFailure) -> OrchestratorResult<()> {
        let kind = failure.kind;
        match self.queue.mark_failed(task_id, failure).await? {
            FailureDisposition::RetryScheduled { attempt, delay_ms } => {
                self.emit(CoordinatorEvent::TaskRetryScheduled {
                    task_id,
                    attempt,
                    delay_ms,
                });
            }
            FailureDisposition::TerminalFailure {
                cancelled_dependents,
            } => {
                self.emit(CoordinatorEvent::TaskFailed { task_id, kind });
                for dependent in cancelled_dependents {
                    self.emit(CoordinatorEvent::TaskCancelled { task_id: dependent });
                }
            }
        }
        Ok(())
    }

    async fn record_cancellation(
        &self,
        task_id: Uuid,
        reason: CancelReason,
    ) -> OrchestratorResult<()> {
        let cancelled_dependents = self.queue.cancel_running(task_id, reason).await?;
        self.emit(CoordinatorEvent::TaskCancelled { task_id });
        for dependent in cancelled_dependents {
            self.emit(CoordinatorEvent::TaskCancelled { task_id: dependent });
        }
        Ok(())
    }

    /// Cancel a task. Queued tasks cancel immediately; running tasks get
    /// an executor cancel signal and a grace period before a forced stop.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: Uuid) -> OrchestratorResult<()> {
        match self.queue.request_cancel(task_id).await? {
            CancelDisposition::Cancelled {
                cancelled_dependents,
            } => {
                self.emit(CoordinatorEvent::TaskCancelled { task_id });
                for dependent in cancelled_dependents {
                    self.emit(CoordinatorEvent::TaskCancelled { task_id: dependent });
                }
                Ok(())
            }
            CancelDisposition::AlreadyTerminal => Ok(()),
            CancelDisposition::RunningSignalRequired => {
                {
                    let mut running = self.running.write().await;
                    if let Some(handle) = running.get_mut(&task_id) {
                        handle.cancel_requested = true;
                    }
                }
                if let Err(e) = self.executor.cancel(task_id).await {
                    warn!(task_id = %task_id, error = %e, "Executor cancel signal failed");
                }
                self.spawn_cancel_watchdog(task_id);
                Ok(())
            }
        }
    }

    /// After the cancel grace period, force-stop the execution if the
    /// executor has not returned on its own.
    fn spawn_cancel_watchdog(&self, task_id: Uuid) {
        let running = Arc::clone(&self.running);
        let grace = Duration::from_millis(self.config.coordinator.cancel_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut running = running.write().await;
            if let Some(handle) = running.get_mut(&task_id) {
                if handle.forced_stop.is_none() {
                    warn!(task_id = %task_id, "Cancel grace expired, forcing stop");
                    handle.forced_stop = Some(ForcedStop::CancelGraceExpired);
                    handle.forced.notify_one();
                }
            }
        });
    }

    /// Terminate an agent. Graceful termination drains: in-flight tasks
    /// run to completion (bounded by the grace timeout), no new work is
    /// accepted. Forced termination stops in-flight tasks immediately;
    /// they are failed and retried per their own policy.
    #[instrument(skip(self))]
    pub async fn terminate_agent(&self, agent_id: Uuid, graceful: bool) -> OrchestratorResult<()> {
        match self.registry.terminate(agent_id, graceful).await? {
            TerminateOutcome::Draining { remaining_tasks } => {
                self.emit(CoordinatorEvent::AgentDraining { agent_id });
                self.spawn_drain_watchdog(agent_id, remaining_tasks);
                Ok(())
            }
            TerminateOutcome::Terminated { orphaned_tasks } => {
                self.ledger.deregister_agent(agent_id).await;
                self.force_stop_tasks(&orphaned_tasks, ForcedStop::AgentTerminated)
                    .await;
                self.emit(CoordinatorEvent::AgentTerminated { agent_id });
                Ok(())
            }
        }
    }

    /// If a draining agent's tasks outlive the grace timeout, force-stop
    /// whatever is left and complete the termination.
    fn spawn_drain_watchdog(&self, agent_id: Uuid, tasks: Vec<Uuid>) {
        let running = Arc::clone(&self.running);
        let grace = Duration::from_millis(self.config.agents.grace_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut running = running.write().await;
            for task_id in tasks {
                if let Some(handle) = running.get_mut(&task_id) {
                    if handle.agent_id == agent_id && handle.forced_stop.is_none() {
                        warn!(agent_id = %agent_id, task_id = %task_id, "Drain grace expired, forcing stop");
                        handle.forced_stop = Some(ForcedStop::AgentTerminated);
                        handle.forced.notify_one();
                    }
                }
            }
        });
    }

    async fn force_stop_tasks(&self, task_ids: &[Uuid], reason: ForcedStop) {
        let mut running = self.running.write().await;
        for &task_id in task_ids {
            if let Some(handle) = running.get_mut(&task_id) {
                if handle.forced_stop.is_none() {
                    handle.forced_stop = Some(reason);
                    handle.forced.notify_one();
                }
            }
        }
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            queue: self.queue.stats().await,
            pool: self.pool.stats().await,
            agents: self.registry.list().await.len(),
            in_flight: self.running.read().await.len(),
        }
    }

    /// Block until no live tasks remain and nothing is in flight. Used by
    /// the CLI batch runner.
    pub async fn wait_until_idle(&self) {
        loop {
            let live = self.queue.has_live_tasks().await;
            let in_flight = self.running.read().await.len();
            if !live && in_flight == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Graceful shutdown: stop dispatching, wait for in-flight tasks up
    /// to the drain timeout, then force-stop the remainder.
    pub async fn shutdown(&self) {
        info!("Coordinator shutting down");
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.coordinator.drain_timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if self.running.read().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining: Vec<Uuid> = self.running.read().await.keys().copied().collect();
        if !remaining.is_empty() {
            warn!(remaining = remaining.len(), "Drain timeout expired, forcing remaining tasks");
            self.force_stop_tasks(&remaining, ForcedStop::Shutdown).await;
            // Give forced reconciliation a moment to run.
            while !self.running.read().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        self.pool.shutdown();
        self.emit(CoordinatorEvent::Stopped);
        info!("Coordinator stopped");
    }
}
