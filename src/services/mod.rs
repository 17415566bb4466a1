//! Service layer: the queue, resolver, registry, ledger, and pool.

pub mod agent_registry;
pub mod dependency_resolver;
pub mod resource_ledger;
pub mod task_queue;
pub mod terminal_pool;

pub use agent_registry::{AgentRegistry, AgentRegistrySnapshot, TerminateOutcome};
pub use dependency_resolver::DependencyResolver;
pub use resource_ledger::{ResourceLedger, ResourceLedgerSnapshot};
pub use task_queue::{
    CancelDisposition, FailureDisposition, QueueStats, TaskQueueService, TaskQueueSnapshot,
};
pub use terminal_pool::{HealthProbe, PoolStats, TerminalPool};
