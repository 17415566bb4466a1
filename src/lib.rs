//! Taskhive: an agent task orchestration core.
//!
//! Coordinates a fleet of agent identities executing interdependent
//! tasks: a five-band priority queue with FIFO fairness, fail-fast DAG
//! dependency resolution, per-agent resource admission, a bounded pool
//! of recycled terminal sessions, and a coordinator control loop that
//! guarantees resource release on every execution path.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - `domain` - models, the error taxonomy, and ports (the
//!   [`AgentExecutor`](domain::ports::AgentExecutor) trait is the seam
//!   to the external execution layer)
//! - `services` - the task queue, dependency resolver, agent registry,
//!   resource ledger, and terminal pool
//! - `application` - the [`Coordinator`](application::Coordinator)
//!   control loop that drives the services
//! - `infrastructure` - configuration loading, logging, and executor
//!   adapters
//! - `cli` - the command-line interface

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{Coordinator, CoordinatorEvent, CoordinatorStats};
pub use domain::errors::{FailureKind, OrchestratorError, OrchestratorResult};
pub use domain::models::{
    Agent, AgentStatus, Config, Task, TaskKind, TaskPriority, TaskStatus, Terminal, TerminalState,
};
