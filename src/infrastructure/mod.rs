//! Infrastructure layer: configuration, logging, and executor adapters.

pub mod config;
pub mod executors;
pub mod logging;
