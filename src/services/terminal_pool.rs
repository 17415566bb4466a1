//! Bounded terminal pool with recycling and health checks.
//!
//! Capacity is enforced with a semaphore: `acquire` forgets its permit
//! and `release` adds one back, so the in-flight lease count can never
//! exceed the pool size regardless of caller interleaving. Recycling
//! (after the configured number of uses) and dead-terminal replacement
//! swap a fresh terminal in without changing capacity, invisible to
//! callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Terminal, TerminalPoolConfig, TerminalState};

/// Pluggable liveness probe. The default probe always reports healthy;
/// tests inject failing probes to exercise replacement.
pub type HealthProbe = Arc<dyn Fn(&Terminal) -> bool + Send + Sync>;

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub leased: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    available: VecDeque<Terminal>,
    leased: HashMap<Uuid, Terminal>,
    /// Terminals created so far; capped at the pool size.
    created: usize,
}

pub struct TerminalPool {
    config: TerminalPoolConfig,
    permits: Semaphore,
    inner: Mutex<PoolInner>,
    probe: HealthProbe,
    shutdown_tx: broadcast::Sender<()>,
}

impl TerminalPool {
    pub fn new(config: TerminalPoolConfig) -> Self {
        Self::with_probe(config, Arc::new(|_| true))
    }

    pub fn with_probe(config: TerminalPoolConfig, probe: HealthProbe) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            permits: Semaphore::new(config.pool_size),
            config,
            inner: Mutex::new(PoolInner::default()),
            probe,
            shutdown_tx,
        }
    }

    /// Lease a terminal, waiting up to the configured acquire timeout for
    /// one to free up. Fails with `PoolExhausted` when the wait expires.
    pub async fn acquire(&self) -> OrchestratorResult<Terminal> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
        let permit = tokio::time::timeout(timeout, self.permits.acquire())
            .await
            .map_err(|_| OrchestratorError::PoolExhausted {
                waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| OrchestratorError::Execution(format!("terminal pool closed: {e}")))?;
        // The permit is returned manually in release().
        permit.forget();

        let mut inner = self.inner.lock().await;
        let mut terminal = match inner.available.pop_front() {
            Some(t) => t,
            None => {
                // Lazily create up to pool_size terminals. The permit we
                // hold guarantees we are within capacity.
                inner.created += 1;
                debug!(created = inner.created, "Terminal created");
                Terminal::new()
            }
        };
        terminal.lease();
        let leased = terminal.clone();
        inner.leased.insert(terminal.id, terminal);
        Ok(leased)
    }

    /// Return a leased terminal. The terminal is recycled (destroyed and
    /// replaced with a fresh one) once it reaches the use threshold.
    /// Releasing an id that is not currently leased fails with
    /// `TerminalNotFound`, which keeps double-release a visible bug
    /// instead of a silent permit leak.
    pub async fn release(&self, terminal_id: Uuid) -> OrchestratorResult<()> {
        let mut inner = self.inner.lock().await;
        let mut terminal = inner
            .leased
            .remove(&terminal_id)
            .ok_or(OrchestratorError::TerminalNotFound(terminal_id))?;

        if terminal.record_use(self.config.recycle_threshold) {
            debug!(terminal_id = %terminal_id, use_count = terminal.use_count, "Terminal recycled");
            let mut fresh = Terminal::new();
            fresh.state = TerminalState::Available;
            inner.available.push_back(fresh);
        } else {
            inner.available.push_back(terminal);
        }
        drop(inner);
        self.permits.add_permits(1);
        Ok(())
    }

    /// Probe idle terminals and replace any that fail, preserving total
    /// capacity. Leased terminals are not probed mid-lease.
    pub async fn health_check(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let mut replaced = 0;
        let count = inner.available.len();
        for _ in 0..count {
            if let Some(mut terminal) = inner.available.pop_front() {
                let healthy = (self.probe)(&terminal);
                terminal.record_health_check(healthy);
                if healthy {
                    inner.available.push_back(terminal);
                } else {
                    warn!(terminal_id = %terminal.id, "Terminal failed health check, replacing");
                    replaced += 1;
                    let mut fresh = Terminal::new();
                    fresh.state = TerminalState::Available;
                    inner.available.push_back(fresh);
                }
            }
        }
        replaced
    }

    /// Spawn the periodic health check daemon. Runs until `shutdown`.
    pub fn start_health_checker(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_millis(pool.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let replaced = pool.health_check().await;
                        if replaced > 0 {
                            info!(replaced, "Health check replaced dead terminals");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Terminal pool health checker stopping");
                        break;
                    }
                }
            }
        })
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        // Lazily created capacity counts as available.
        let uncreated = self
            .config
            .pool_size
            .saturating_sub(inner.leased.len() + inner.available.len());
        PoolStats {
            total: self.config.pool_size,
            available: inner.available.len() + uncreated,
            leased: inner.leased.len(),
        }
    }

    /// Stop background work. Outstanding leases stay valid until released.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_config(size: usize) -> TerminalPoolConfig {
        TerminalPoolConfig {
            pool_size: size,
            recycle_threshold: 3,
            health_check_interval_ms: 10_000,
            acquire_timeout_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_acquire_release_roundtrip() {
        let pool = TerminalPool::new(pool_config(2));
        let t = pool.acquire().await.unwrap();
        assert_eq!(t.state, TerminalState::Leased);
        assert_eq!(pool.stats().await.leased, 1);
        pool.release(t.id).await.unwrap();
        assert_eq!(pool.stats().await.leased, 0);
    }

    #[tokio::test]
    async fn test_pool_bound_blocks_then_serves() {
        let pool = Arc::new(TerminalPool::new(pool_config(1)));
        let held = pool.acquire().await.unwrap();

        // Second acquire waits; release from another task unblocks it.
        let pool2 = Arc::clone(&pool);
        let held_id = held.id;
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pool2.release(held_id).await.unwrap();
        });
        let t = pool.acquire().await.unwrap();
        releaser.await.unwrap();
        pool.release(t.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_exhaustion_times_out() {
        let pool = TerminalPool::new(pool_config(1));
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::PoolExhausted { .. }));
    }

    #[tokio::test]
    async fn test_double_release_rejected() {
        let pool = TerminalPool::new(pool_config(2));
        let t = pool.acquire().await.unwrap();
        pool.release(t.id).await.unwrap();
        let err = pool.release(t.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::TerminalNotFound(_)));
    }

    #[tokio::test]
    async fn test_recycle_after_threshold_preserves_capacity() {
        let pool = TerminalPool::new(pool_config(1));
        let first_id = pool.acquire().await.unwrap().id;
        pool.release(first_id).await.unwrap();

        let mut last_id = first_id;
        for _ in 0..2 {
            let t = pool.acquire().await.unwrap();
            last_id = t.id;
            pool.release(t.id).await.unwrap();
        }
        // Threshold is 3 uses; the original terminal was replaced.
        assert_eq!(last_id, first_id);
        let t = pool.acquire().await.unwrap();
        assert_ne!(t.id, first_id);
        assert_eq!(t.use_count, 0);
        pool.release(t.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check_replaces_dead() {
        let pool = TerminalPool::with_probe(pool_config(2), Arc::new(|_| false));
        let t = pool.acquire().await.unwrap();
        pool.release(t.id).await.unwrap();

        let replaced = pool.health_check().await;
        assert_eq!(replaced, 1);

        // Capacity intact: the replacement is immediately leasable.
        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id, t.id);
    }
}
