use serde::{Deserialize, Serialize};

/// Main configuration structure for Taskhive.
///
/// Loaded once at process start and passed into component constructors;
/// there is no hot-reload contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Terminal pool configuration
    #[serde(default)]
    pub pool: TerminalPoolConfig,

    /// Task queue configuration
    #[serde(default)]
    pub queue: TaskQueueConfig,

    /// Agent defaults
    #[serde(default)]
    pub agents: AgentConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Coordinator loop configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Terminal pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TerminalPoolConfig {
    /// Maximum number of pooled terminals
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Number of leases after which a terminal is destroyed and recreated
    #[serde(default = "default_recycle_threshold")]
    pub recycle_threshold: u32,

    /// Interval between background health checks
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// How long `acquire` blocks on an exhausted pool before failing
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

const fn default_pool_size() -> usize {
    5
}

const fn default_recycle_threshold() -> u32 {
    10
}

const fn default_health_check_interval_ms() -> u64 {
    30_000
}

const fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for TerminalPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            recycle_threshold: default_recycle_threshold(),
            health_check_interval_ms: default_health_check_interval_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskQueueConfig {
    /// Maximum number of live (non-terminal) tasks in the queue
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,

    /// Timeout applied to tasks that do not carry their own
    #[serde(default = "default_task_timeout_ms")]
    pub default_task_timeout_ms: u64,
}

const fn default_queue_max_size() -> usize {
    1_000
}

const fn default_task_timeout_ms() -> u64 {
    300_000
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            default_task_timeout_ms: default_task_timeout_ms(),
        }
    }
}

/// Agent defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Concurrency limit applied to agents spawned without an explicit one
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_default: usize,

    /// How long graceful termination waits for in-flight tasks before
    /// force-failing the remainder
    #[serde(default = "default_grace_timeout_ms")]
    pub grace_timeout_ms: u64,
}

const fn default_max_concurrent() -> usize {
    3
}

const fn default_grace_timeout_ms() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_default: default_max_concurrent(),
            grace_timeout_ms: default_grace_timeout_ms(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts for tasks that do not carry their own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Deterministic exponential backoff for the given attempt number
    /// (0-based): `initial * 2^attempt`, capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }
}

/// Coordinator loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Number of concurrent dispatch workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sleep between polls when no eligible work was found
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval of the background sweep that force-fails overdue tasks
    #[serde(default = "default_timeout_sweep_interval_ms")]
    pub timeout_sweep_interval_ms: u64,

    /// Grace period for a cancellation ack from the executor
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// How long shutdown waits for in-flight tasks to drain
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

const fn default_workers() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_timeout_sweep_interval_ms() -> u64 {
    1_000
}

const fn default_cancel_grace_ms() -> u64 {
    5_000
}

const fn default_drain_timeout_ms() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_sweep_interval_ms: default_timeout_sweep_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
