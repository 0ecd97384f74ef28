//! Session pool implementation.
//!
//! A [`SessionPool`] serves one settings-equivalence key. It keeps an idle
//! queue, bounds the sessions handed out with a semaphore, and shares one
//! procedure cache between every session it owns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mycat_client::procedure_cache::ProcedureCache;
use mycat_client::topology::{HostRecord, SessionFactory};
use mycat_client::{Config, Session};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;

struct IdleSession {
    session: Session,
    idle_since: Instant,
    generation: u64,
}

struct CheckedOut {
    generation: u64,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleSession>,
    checked_out: HashMap<u64, CheckedOut>,
    /// Bumped by [`SessionPool::clear`]; sessions from older generations are
    /// closed instead of re-queued.
    generation: u64,
    hosts: Option<Vec<HostRecord>>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    sessions_created: u64,
    sessions_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    health_checks_performed: u64,
    health_checks_failed: u64,
    resets_performed: u64,
    resets_failed: u64,
}

/// Pooled sessions for one settings key.
pub struct SessionPool {
    key: String,
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    procedure_cache: Arc<ProcedureCache>,
    closed: AtomicBool,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

impl SessionPool {
    /// Create a pool for sessions opened with `settings`.
    pub fn new(
        settings: &Config,
        config: PoolConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::info!(
            min = config.min_sessions,
            max = config.max_sessions,
            "session pool created"
        );
        Ok(Self {
            key: settings.equivalence_key(),
            permits: Arc::new(Semaphore::new(config.max_sessions as usize)),
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            procedure_cache: Arc::new(ProcedureCache::new(settings.procedure_cache_size)),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        })
    }

    /// Equivalence key of the settings this pool serves.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Procedure cache shared by the pool's sessions.
    #[must_use]
    pub fn procedure_cache(&self) -> Arc<ProcedureCache> {
        self.procedure_cache.clone()
    }

    /// Resolved host list, once set.
    #[must_use]
    pub fn hosts(&self) -> Option<Vec<HostRecord>> {
        self.state.lock().hosts.clone()
    }

    /// Remember the resolved host list.
    pub fn set_hosts(&self, hosts: Vec<HostRecord>) {
        self.state.lock().hosts = Some(hosts);
    }

    /// Whether `driver_id` was handed out by this pool and not returned.
    #[must_use]
    pub fn owns(&self, driver_id: u64) -> bool {
        self.state.lock().checked_out.contains_key(&driver_id)
    }

    fn expired(&self, session: &Session) -> bool {
        self.config
            .lifetime
            .is_some_and(|lifetime| session.created_at().elapsed() >= lifetime)
    }

    async fn close_session(&self, mut session: Session) {
        if let Err(e) = session.close().await {
            tracing::debug!(driver_id = session.driver_id(), error = %e, "closing pooled session failed");
        }
        self.metrics.lock().sessions_closed += 1;
    }

    fn check_out(&self, session: &Session, permit: OwnedSemaphorePermit) {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.checked_out.insert(
            session.driver_id(),
            CheckedOut {
                generation,
                _permit: permit,
            },
        );
        drop(state);
        self.metrics.lock().checkouts_successful += 1;
    }

    /// Take an idle session or open a new one.
    ///
    /// Waits up to the acquire timeout when every slot is handed out.
    pub async fn acquire(&self, settings: &Config) -> Result<Session, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        tracing::trace!("acquiring session from pool");

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                self.metrics.lock().checkouts_failed += 1;
                return Err(PoolError::Timeout(self.config.acquire_timeout));
            }
        };

        while let Some(mut candidate) = self.pop_idle() {
            if candidate.generation != self.generation()
                || !candidate.session.is_open()
                || self.expired(&candidate.session)
            {
                self.close_session(candidate.session).await;
                continue;
            }
            if self.needs_health_check(candidate.idle_since) {
                self.metrics.lock().health_checks_performed += 1;
                if let Err(e) = candidate.session.ping().await {
                    tracing::debug!(
                        driver_id = candidate.session.driver_id(),
                        error = %e,
                        "idle session failed health check"
                    );
                    self.metrics.lock().health_checks_failed += 1;
                    self.close_session(candidate.session).await;
                    continue;
                }
            }
            self.check_out(&candidate.session, permit);
            return Ok(candidate.session);
        }

        let session = match self.factory.create(settings).await {
            Ok(session) => session,
            Err(e) => {
                self.metrics.lock().checkouts_failed += 1;
                return Err(e.into());
            }
        };
        self.metrics.lock().sessions_created += 1;
        self.check_out(&session, permit);
        self.fill_to_minimum(settings).await;
        Ok(session)
    }

    fn pop_idle(&self) -> Option<IdleSession> {
        self.state.lock().idle.pop_back()
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn needs_health_check(&self, idle_since: Instant) -> bool {
        self.config
            .health_check_after
            .is_some_and(|after| idle_since.elapsed() >= after)
    }

    async fn fill_to_minimum(&self, settings: &Config) {
        loop {
            let (total, generation) = {
                let state = self.state.lock();
                (state.idle.len() + state.checked_out.len(), state.generation)
            };
            if total >= self.config.min_sessions as usize {
                return;
            }
            match self.factory.create(settings).await {
                Ok(session) => {
                    self.metrics.lock().sessions_created += 1;
                    self.state.lock().idle.push_front(IdleSession {
                        session,
                        idle_since: Instant::now(),
                        generation,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not open minimum pool sessions");
                    return;
                }
            }
        }
    }

    /// Take back a session handed out by [`acquire`](Self::acquire).
    ///
    /// Stale, expired or broken sessions are closed instead of queued.
    pub async fn release(&self, mut session: Session) {
        let entry = self.state.lock().checked_out.remove(&session.driver_id());
        let Some(entry) = entry else {
            tracing::debug!(driver_id = session.driver_id(), "released session not from this pool");
            self.close_session(session).await;
            return;
        };

        if self.is_closed()
            || entry.generation != self.generation()
            || !session.is_open()
            || self.expired(&session)
        {
            self.close_session(session).await;
            return;
        }

        if self.config.reset_on_release {
            self.metrics.lock().resets_performed += 1;
            if let Err(e) = session.reset(true).await {
                tracing::debug!(driver_id = session.driver_id(), error = %e, "session reset failed");
                self.metrics.lock().resets_failed += 1;
                self.close_session(session).await;
                return;
            }
        }

        let overflow = {
            let mut state = self.state.lock();
            if state.idle.len() >= self.config.max_sessions as usize {
                Some(session)
            } else {
                state.idle.push_back(IdleSession {
                    session,
                    idle_since: Instant::now(),
                    generation: entry.generation,
                });
                None
            }
        };
        if let Some(session) = overflow {
            self.close_session(session).await;
        }
        tracing::trace!("session returned to pool");
    }

    /// Drop a handed-out session without reusing it.
    pub async fn discard(&self, mut session: Session) {
        self.state.lock().checked_out.remove(&session.driver_id());
        if let Err(e) = session.abort().await {
            tracing::debug!(driver_id = session.driver_id(), error = %e, "aborting discarded session failed");
        }
        self.metrics.lock().sessions_closed += 1;
    }

    /// Close idle sessions and mark handed-out ones stale.
    pub async fn clear(&self) {
        let idle: Vec<IdleSession> = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.idle.drain(..).collect()
        };
        tracing::debug!(closed = idle.len(), "session pool cleared");
        for entry in idle {
            self.close_session(entry.session).await;
        }
    }

    /// Close the pool, dropping all idle sessions.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        self.clear().await;
        tracing::info!("session pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let available = state.idle.len() as u32;
        let in_use = state.checked_out.len() as u32;
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: self.config.max_sessions,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.metrics.lock();
        PoolMetrics {
            sessions_created: inner.sessions_created,
            sessions_closed: inner.sessions_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            uptime: self.created_at.elapsed(),
        }
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub available: u32,
    /// Number of sessions currently in use.
    pub in_use: u32,
    /// Total number of sessions.
    pub total: u32,
    /// Maximum allowed sessions.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total sessions opened since pool start.
    pub sessions_created: u64,
    /// Total sessions closed since pool start.
    pub sessions_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, open errors).
    pub checkouts_failed: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that failed.
    pub health_checks_failed: u64,
    /// Session resets performed.
    pub resets_performed: u64,
    /// Session resets that failed.
    pub resets_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
        assert!(!status.is_at_capacity());
    }
}
