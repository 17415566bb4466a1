//! Application layer: the coordinator control loop.

pub mod coordinator;

pub use coordinator::{Coordinator, CoordinatorEvent, CoordinatorStats};
