//! Logging setup using tracing.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    match config.format.as_str() {
        "json" => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).init();
        }
        "pretty" => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).init();
        }
        other => return Err(anyhow!("Invalid log format: {other}")),
    }
    Ok(())
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("Invalid log level: {other}")),
    }
}
