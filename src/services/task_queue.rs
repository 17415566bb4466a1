//! Priority-ordered, dependency-aware task queue.
//!
//! One binary heap keyed by the composite (priority, enqueue sequence)
//! carries all five priority bands: higher bands win, and FIFO order is
//! preserved within a band. Dependency bookkeeping is delegated to the
//! [`DependencyResolver`], driven under the queue's lock so enqueue
//! validation and completion cascades stay atomic.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    CancelReason, RetryConfig, Task, TaskFailure, TaskQueueConfig, TaskStatus,
};
use crate::services::DependencyResolver;

/// Heap entry for an eligible task. Ordered so the highest priority pops
/// first; within a band, the lowest sequence (earliest enqueue) wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EligibleEntry {
    priority: crate::domain::models::TaskPriority,
    seq: u64,
    task_id: Uuid,
}

impl Ord for EligibleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for EligibleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What `mark_failed` decided under the task's retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Task re-enqueued as pending with a backoff delay before it becomes
    /// eligible again.
    RetryScheduled { attempt: u32, delay_ms: u64 },
    /// Retries exhausted; task is terminally failed and its direct and
    /// transitive dependents were cancelled.
    TerminalFailure { cancelled_dependents: Vec<Uuid> },
}

/// What a cancellation request found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelDisposition {
    /// Task was not yet running; cancelled in place, along with any
    /// dependents that can no longer run.
    Cancelled { cancelled_dependents: Vec<Uuid> },
    /// Task is running; the coordinator must signal the executor.
    RunningSignalRequired,
    /// Task already reached a terminal state; nothing to do.
    AlreadyTerminal,
}

/// Live status counts, used by the coordinator's status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub eligible: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Serializable checkpoint of queue state for an external persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueSnapshot {
    pub tasks: Vec<Task>,
    resolver: DependencyResolver,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct QueueInner {
    tasks: HashMap<Uuid, Task>,
    heap: BinaryHeap<EligibleEntry>,
    resolver: DependencyResolver,
    next_seq: u64,
}

impl QueueInner {
    fn push_entry(&mut self, task: &Task) {
        self.heap.push(EligibleEntry {
            priority: task.priority,
            seq: task.enqueue_seq,
            task_id: task.id,
        });
    }

    /// Promote pending tasks whose dependencies are satisfied and whose
    /// backoff timer has elapsed.
    fn promote_due(&mut self) {
        let now = Utc::now();
        let due: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.backoff_elapsed(now)
                    && self.resolver.is_satisfied(t.id)
            })
            .map(|t| t.id)
            .collect();

        for id in due {
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.transition_to(TaskStatus::Eligible).is_ok() {
                    let entry_task = task.clone();
                    self.push_entry(&entry_task);
                    debug!(task_id = %id, "Task promoted to eligible");
                }
            }
        }
    }

    /// Cancel every direct and transitive dependent of a permanently
    /// failed (or cancelled) task. Only non-terminal, non-running tasks
    /// are affected; dependents cannot be running because their
    /// dependency never completed.
    fn cascade_cancel(&mut self, failed_id: Uuid) -> Vec<Uuid> {
        let affected = self.resolver.on_task_failed(failed_id);
        let mut cancelled = Vec::new();
        for dep_id in affected {
            if let Some(task) = self.tasks.get_mut(&dep_id) {
                if !task.is_terminal() && task.transition_to(TaskStatus::Cancelled).is_ok() {
                    task.cancel_reason = Some(CancelReason::UpstreamFailure {
                        failed_dependency: failed_id,
                    });
                    cancelled.push(dep_id);
                }
            }
        }
        cancelled
    }

    fn live_count(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_terminal()).count()
    }
}

/// The shared task queue. All mutation happens behind one `RwLock`, so
/// concurrent coordinator workers see a consistent heap and graph.
pub struct TaskQueueService {
    inner: RwLock<QueueInner>,
    config: TaskQueueConfig,
    retry: RetryConfig,
}

impl TaskQueueService {
    pub fn new(config: TaskQueueConfig, retry: RetryConfig) -> Self {
        Self {
            inner: RwLock::new(QueueInner::default()),
            config,
            retry,
        }
    }

    /// Submit a task. Validates the task shape, queue capacity, and the
    /// dependency graph (unknown ids and cycles are rejected fail-fast).
    pub async fn enqueue(&self, mut task: Task) -> OrchestratorResult<Uuid> {
        task.validate().map_err(OrchestratorError::Validation)?;

        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate task id: {}",
                task.id
            )));
        }
        if inner.live_count() >= self.config.max_size {
            return Err(OrchestratorError::QueueFull(self.config.max_size));
        }

        inner.resolver.register(task.id, &task.depends_on)?;

        task.enqueue_seq = inner.next_seq;
        inner.next_seq += 1;

        let id = task.id;
        if inner.resolver.is_satisfied(id) && task.backoff_elapsed(Utc::now()) {
            task.transition_to(TaskStatus::Eligible)?;
            inner.push_entry(&task);
        }
        info!(task_id = %id, priority = task.priority.as_str(), status = task.status.as_str(), "Task enqueued");
        inner.tasks.insert(id, task);
        Ok(id)
    }

    /// Dequeue the highest-priority eligible task whose kind matches one
    /// of the given agent capabilities. The returned task has been moved
    /// to `Assigned`; callers must either `mark_running` or `requeue` it.
    pub async fn dequeue_eligible(
        &self,
        capabilities: &[String],
    ) -> OrchestratorResult<Option<Task>> {
        let mut inner = self.inner.write().await;
        inner.promote_due();

        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = inner.heap.pop() {
            let Some(task) = inner.tasks.get(&entry.task_id) else {
                // Task archived; drop the stale entry.
                continue;
            };
            if task.status != TaskStatus::Eligible {
                // Stale entry (cancelled or already assigned); drop it.
                continue;
            }
            if capabilities
                .iter()
                .any(|c| c == task.kind.required_capability())
            {
                found = Some(entry.task_id);
                break;
            }
            skipped.push(entry);
        }
        // Entries that matched no capability stay queued.
        for entry in skipped {
            inner.heap.push(entry);
        }

        match found {
            Some(id) => {
                let task = inner
                    .tasks
                    .get_mut(&id)
                    .ok_or(OrchestratorError::TaskNotFound(id))?;
                task.transition_to(TaskStatus::Assigned)?;
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    /// Return an assigned task to the queue unchanged (no admissible agent
    /// or pool exhaustion). Its original enqueue sequence is preserved, so
    /// FIFO fairness within the priority band survives.
    pub async fn requeue(&self, task_id: Uuid) -> OrchestratorResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Eligible)?;
        task.assigned_agent = None;
        let entry_task = task.clone();
        inner.push_entry(&entry_task);
        debug!(task_id = %task_id, "Task returned to queue");
        Ok(())
    }

    /// Transition an assigned task to running and stamp its absolute
    /// deadline. Returns the updated task.
    pub async fn mark_running(&self, task_id: Uuid, agent_id: Uuid) -> OrchestratorResult<Task> {
        let mut inner = self.inner.write().await;
        let default_timeout = self.config.default_task_timeout_ms;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Running)?;
        task.assigned_agent = Some(agent_id);
        let timeout_ms = task.timeout_ms.unwrap_or(default_timeout);
        task.deadline = Some(
            Utc::now()
                + chrono::Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX)),
        );
        Ok(task.clone())
    }

    /// Record a successful completion and promote any dependents whose
    /// last pending dependency this was. Returns the newly eligible ids.
    pub async fn mark_completed(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> OrchestratorResult<Vec<Uuid>> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Completed)?;
        task.result = Some(result);
        task.assigned_agent = None;

        let newly_satisfied = inner.resolver.on_task_completed(task_id);
        let mut promoted = Vec::new();
        for id in newly_satisfied {
            if let Some(dependent) = inner.tasks.get_mut(&id) {
                if dependent.status == TaskStatus::Pending
                    && dependent.backoff_elapsed(Utc::now())
                    && dependent.transition_to(TaskStatus::Eligible).is_ok()
                {
                    let entry_task = dependent.clone();
                    inner.push_entry(&entry_task);
                    promoted.push(id);
                }
            }
        }
        info!(task_id = %task_id, unblocked = promoted.len(), "Task completed");
        Ok(promoted)
    }

    /// Record a failure. If retries remain, the task is re-enqueued as
    /// pending with an exponential backoff delay; otherwise it fails
    /// terminally and its dependents are cancelled.
    pub async fn mark_failed(
        &self,
        task_id: Uuid,
        failure: TaskFailure,
    ) -> OrchestratorResult<FailureDisposition> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Failed)?;
        task.last_error = Some(failure.clone());
        task.assigned_agent = None;
        task.deadline = None;

        if task.can_retry() {
            let attempt = task.retry_count;
            let delay_ms = self.retry.backoff_ms(attempt);
            task.retry_count += 1;
            task.transition_to(TaskStatus::Pending)?;
            task.eligible_after = Some(
                Utc::now()
                    + chrono::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX)),
            );
            warn!(
                task_id = %task_id,
                attempt = task.retry_count,
                max_retries = task.max_retries,
                delay_ms,
                error = %failure.message,
                "Task failed, retry scheduled"
            );
            Ok(FailureDisposition::RetryScheduled {
                attempt: attempt + 1,
                delay_ms,
            })
        } else {
            let cancelled = inner.cascade_cancel(task_id);
            warn!(
                task_id = %task_id,
                kind = failure.kind.as_str(),
                error = %failure.message,
                cancelled_dependents = cancelled.len(),
                "Task failed terminally"
            );
            Ok(FailureDisposition::TerminalFailure {
                cancelled_dependents: cancelled,
            })
        }
    }

    /// Request cancellation of a task. Non-running tasks are cancelled in
    /// place (a simple state transition); running tasks require the
    /// coordinator to signal the executor.
    pub async fn request_cancel(&self, task_id: Uuid) -> OrchestratorResult<CancelDisposition> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;

        if task.is_terminal() {
            return Ok(CancelDisposition::AlreadyTerminal);
        }
        if task.status == TaskStatus::Running {
            return Ok(CancelDisposition::RunningSignalRequired);
        }

        task.transition_to(TaskStatus::Cancelled)?;
        task.cancel_reason = Some(CancelReason::Explicit);
        // Dependents of a cancelled task can never become eligible.
        let cancelled = inner.cascade_cancel(task_id);
        info!(task_id = %task_id, cancelled_dependents = cancelled.len(), "Task cancelled");
        Ok(CancelDisposition::Cancelled {
            cancelled_dependents: cancelled,
        })
    }

    /// Cancel a task that was running, after the executor acknowledged the
    /// cancellation (or the grace period was enforced).
    pub async fn cancel_running(
        &self,
        task_id: Uuid,
        reason: CancelReason,
    ) -> OrchestratorResult<Vec<Uuid>> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Cancelled)?;
        task.cancel_reason = Some(reason);
        task.assigned_agent = None;
        task.deadline = None;
        let cancelled = inner.cascade_cancel(task_id);
        info!(task_id = %task_id, "Running task cancelled");
        Ok(cancelled)
    }

    pub async fn get_task(&self, task_id: Uuid) -> OrchestratorResult<Task> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(OrchestratorError::TaskNotFound(task_id))
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.enqueue_seq);
        tasks
    }

    /// Running tasks past their absolute deadline, for the timeout sweep.
    pub async fn running_past_deadline(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        inner
            .tasks
            .values()
            .filter(|t| t.past_deadline(now))
            .map(|t| t.id)
            .collect()
    }

    /// Whether any non-terminal tasks remain.
    pub async fn has_live_tasks(&self) -> bool {
        let inner = self.inner.read().await;
        inner.live_count() > 0
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Eligible => stats.eligible += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Checkpoint the queue for an external persistence layer.
    pub async fn snapshot(&self) -> TaskQueueSnapshot {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.enqueue_seq);
        TaskQueueSnapshot {
            tasks,
            resolver: inner.resolver.clone(),
            next_seq: inner.next_seq,
        }
    }

    /// Replace queue state from a checkpoint. The eligibility heap is
    /// rebuilt from task statuses.
    pub async fn restore(&self, snapshot: TaskQueueSnapshot) {
        let mut inner = self.inner.write().await;
        inner.tasks = snapshot.tasks.into_iter().map(|t| (t.id, t)).collect();
        inner.resolver = snapshot.resolver;
        inner.next_seq = snapshot.next_seq;
        inner.heap.clear();
        let eligible: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Eligible)
            .cloned()
            .collect();
        for task in eligible {
            inner.push_entry(&task);
        }
    }
}
