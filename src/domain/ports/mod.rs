//! Ports: narrow interfaces to out-of-scope collaborators.

pub mod executor;

pub use executor::{AgentExecutor, ExecutionOutput, ExecutionRequest};
