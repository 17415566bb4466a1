//! Domain models: pure data types with no I/O.

pub mod agent;
pub mod config;
pub mod grant;
pub mod task;
pub mod terminal;

pub use agent::{Agent, AgentStatus};
pub use config::{
    AgentConfig, Config, CoordinatorConfig, LoggingConfig, RetryConfig, TaskQueueConfig,
    TerminalPoolConfig,
};
pub use grant::{AgentLimits, ResourceGrant};
pub use task::{CancelReason, Task, TaskFailure, TaskKind, TaskPriority, TaskStatus};
pub use terminal::{Terminal, TerminalState};
