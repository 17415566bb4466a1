//! Executor adapters.

pub mod mock;

pub use mock::{MockBehavior, MockExecutor};
