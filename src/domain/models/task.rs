//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute. They form a DAG
//! with dependencies and move through an explicit status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::FailureKind;

/// Status of a task in the orchestration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not met (or waiting out retry backoff)
    Pending,
    /// Task is ready to be picked up (dependencies met, backoff elapsed)
    Eligible,
    /// Task has been dequeued and is being matched to an agent/terminal
    Assigned,
    /// Task is currently being executed
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed terminally (retries exhausted)
    Failed,
    /// Task was cancelled (explicitly or by upstream failure)
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Eligible => "eligible",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "eligible" => Some(Self::Eligible),
            "assigned" => Some(Self::Assigned),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::Eligible, Self::Cancelled],
            Self::Eligible => vec![Self::Assigned, Self::Cancelled],
            // Assigned -> Eligible happens when matching finds no admissible
            // agent or the terminal pool is exhausted (task returned to queue).
            Self::Assigned => vec![Self::Running, Self::Eligible, Self::Cancelled],
            Self::Running => vec![Self::Completed, Self::Failed, Self::Cancelled],
            // Failed -> Pending is the retry path, bounded by max_retries.
            Self::Failed => vec![Self::Pending],
            Self::Completed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Closed set of task categories. Each kind maps to the agent capability
/// required to execute it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Research,
    Implementation,
    Analysis,
    /// Custom capability tag for domain-specific agents.
    Custom(String),
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::Custom("general".to_string())
    }
}

impl TaskKind {
    /// The agent capability required to execute a task of this kind.
    pub fn required_capability(&self) -> &str {
        match self {
            Self::Research => "research",
            Self::Implementation => "implementation",
            Self::Analysis => "analysis",
            Self::Custom(tag) => tag.as_str(),
        }
    }
}

/// Priority level for tasks. Five discrete, ordered bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Background = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "background" => Some(Self::Background),
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Why a task ended up cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Caller explicitly cancelled the task.
    Explicit,
    /// A dependency failed terminally; the task's preconditions can never be met.
    UpstreamFailure { failed_dependency: Uuid },
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit cancel",
            Self::UpstreamFailure { .. } => "upstream failure",
        }
    }
}

/// The last error recorded against a task, kept on terminal failure so
/// callers always see the taxonomy kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, message)
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("deadline exceeded after {timeout_ms}ms"),
        )
    }
}

/// A discrete unit of work that can be executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Detailed description/prompt
    pub description: String,
    /// Category, determines the required agent capability
    pub kind: TaskKind,
    /// Priority band
    pub priority: TaskPriority,
    /// Task IDs this depends on
    pub depends_on: Vec<Uuid>,
    /// Current status
    pub status: TaskStatus,
    /// Weak back-reference to the executing agent, by id only
    pub assigned_agent: Option<Uuid>,
    /// Execution timeout in milliseconds; None uses the configured default
    pub timeout_ms: Option<u64>,
    /// Retry count
    pub retry_count: u32,
    /// Maximum retries
    pub max_retries: u32,
    /// Monotonic enqueue sequence, assigned by the queue. Preserved across
    /// requeues so FIFO fairness within a priority band survives a failed match.
    pub enqueue_seq: u64,
    /// Earliest instant the task may become eligible (retry backoff timer)
    pub eligible_after: Option<DateTime<Utc>>,
    /// Absolute deadline, set when the task starts running
    pub deadline: Option<DateTime<Utc>>,
    /// Result payload on completion
    pub result: Option<serde_json::Value>,
    /// Last error, kept on terminal failure
    pub last_error: Option<TaskFailure>,
    /// Cancellation cause, recorded when status becomes Cancelled
    pub cancel_reason: Option<CancelReason>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task from a prompt/description.
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            kind: TaskKind::default(),
            priority: TaskPriority::default(),
            depends_on: Vec::new(),
            status: TaskStatus::default(),
            assigned_agent: None,
            timeout_ms: None,
            retry_count: 0,
            max_retries: 3,
            enqueue_seq: 0,
            eligible_after: None,
            deadline: None,
            result: None,
            last_error: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the task kind.
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) && task_id != self.id {
            self.depends_on.push(task_id);
        }
        self
    }

    /// Set execution timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set maximum retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status, maintaining lifecycle timestamps.
    pub fn transition_to(
        &mut self,
        new_status: TaskStatus,
    ) -> Result<(), crate::domain::errors::OrchestratorError> {
        if !self.can_transition_to(new_status) {
            return Err(crate::domain::errors::OrchestratorError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        self.status = new_status;
        self.updated_at = Utc::now();

        match new_status {
            // Retry path: the task is live again, execution timestamps
            // from the failed attempt no longer apply.
            TaskStatus::Pending => {
                self.started_at = None;
                self.completed_at = None;
            }
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the backoff timer (if any) has elapsed.
    pub fn backoff_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.eligible_after.is_none_or(|t| t <= now)
    }

    /// Whether a running task is past its absolute deadline.
    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.deadline.is_some_and(|d| d < now)
    }

    /// Validate task at the submission boundary.
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Task description cannot be empty".to_string());
        }
        if self.depends_on.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        if let TaskKind::Custom(tag) = &self.kind {
            if tag.trim().is_empty() {
                return Err("Custom task kind requires a non-empty capability tag".to_string());
            }
        }
        Ok(())
    }
}
