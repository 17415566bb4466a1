//! Pooled terminal session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a pooled terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Available,
    Leased,
    Recycling,
    Dead,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Leased => write!(f, "leased"),
            Self::Recycling => write!(f, "recycling"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// A reusable execution session owned by the terminal pool and leased
/// (never owned) by whichever task/agent pairing is currently executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    pub id: Uuid,
    pub state: TerminalState,
    /// Number of completed leases; terminal is recycled once this
    /// reaches the configured threshold.
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TerminalState::Available,
            use_count: 0,
            created_at: Utc::now(),
            last_health_check_at: None,
        }
    }

    /// Mark leased.
    pub fn lease(&mut self) {
        self.state = TerminalState::Leased;
    }

    /// Record a completed lease. Returns true when the terminal has hit
    /// the recycle threshold and must be destroyed and recreated.
    pub fn record_use(&mut self, recycle_threshold: u32) -> bool {
        self.use_count += 1;
        if self.use_count >= recycle_threshold {
            self.state = TerminalState::Recycling;
            true
        } else {
            self.state = TerminalState::Available;
            false
        }
    }

    /// Record a health check observation.
    pub fn record_health_check(&mut self, healthy: bool) {
        self.last_health_check_at = Some(Utc::now());
        if !healthy {
            self.state = TerminalState::Dead;
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}
