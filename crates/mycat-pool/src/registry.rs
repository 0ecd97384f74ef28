//! One pool per settings-equivalence key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mycat_client::procedure_cache::ProcedureCache;
use mycat_client::topology::{HostRecord, PoolManager, SessionFactory};
use mycat_client::{Config, Session};
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::SessionPool;

/// [`PoolManager`] keeping a [`SessionPool`] per equivalence key.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use mycat_client::Environment;
/// use mycat_driver_pool::PoolRegistry;
///
/// let base = Environment::new();
/// let pools = Arc::new(PoolRegistry::new(base.factory().clone()));
/// let env = Environment::builder().pool(pools.clone()).build();
///
/// let mut conn = env.connect_str("server=db1;user id=app;pooling=true")?;
/// conn.open().await?;
/// conn.close().await?; // back to the pool
/// ```
pub struct PoolRegistry {
    factory: Arc<dyn SessionFactory>,
    pools: Mutex<HashMap<String, Arc<SessionPool>>>,
    health_check_after: Option<Duration>,
    reset_on_release: bool,
}

impl PoolRegistry {
    /// Pools opening sessions through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::builder(factory).build()
    }

    /// Configure a registry.
    #[must_use]
    pub fn builder(factory: Arc<dyn SessionFactory>) -> PoolRegistryBuilder {
        PoolRegistryBuilder {
            factory,
            defaults: PoolConfig::default(),
        }
    }

    /// The pool for `settings`, created on first use.
    pub fn pool(&self, settings: &Config) -> Result<Arc<SessionPool>, PoolError> {
        let key = settings.equivalence_key();
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
        let config = PoolConfig::from_settings(settings)
            .health_check_after(self.health_check_after)
            .reset_on_release(self.reset_on_release);
        let pool = Arc::new(SessionPool::new(settings, config, self.factory.clone())?);
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// The pool for `settings`, if one exists.
    #[must_use]
    pub fn get(&self, settings: &Config) -> Option<Arc<SessionPool>> {
        self.pools.lock().get(&settings.equivalence_key()).cloned()
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owner_of(&self, session: &Session) -> Option<Arc<SessionPool>> {
        let driver_id = session.driver_id();
        self.pools
            .lock()
            .values()
            .find(|pool| pool.owns(driver_id))
            .cloned()
    }

    /// Close every pool.
    pub async fn close(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .field("health_check_after", &self.health_check_after)
            .field("reset_on_release", &self.reset_on_release)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PoolManager for PoolRegistry {
    async fn acquire(&self, settings: &Config) -> mycat_client::Result<Session> {
        let pool = self.pool(settings)?;
        Ok(pool.acquire(settings).await?)
    }

    async fn release(&self, mut session: Session) {
        match self.owner_of(&session) {
            Some(pool) => pool.release(session).await,
            None => {
                tracing::debug!(driver_id = session.driver_id(), "closing session with no pool");
                if let Err(e) = session.close().await {
                    tracing::debug!(error = %e, "closing unowned session failed");
                }
            }
        }
    }

    async fn discard(&self, mut session: Session) {
        match self.owner_of(&session) {
            Some(pool) => pool.discard(session).await,
            None => {
                if let Err(e) = session.abort().await {
                    tracing::debug!(error = %e, "aborting unowned session failed");
                }
            }
        }
    }

    async fn clear_pool(&self, settings: &Config) {
        if let Some(pool) = self.get(settings) {
            pool.clear().await;
        }
    }

    async fn clear_all(&self) {
        let pools: Vec<_> = self.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.clear().await;
        }
    }

    fn procedure_cache(&self, settings: &Config) -> Arc<ProcedureCache> {
        match self.pool(settings) {
            Ok(pool) => pool.procedure_cache(),
            Err(e) => {
                tracing::warn!(error = %e, "no pool for settings; using a private procedure cache");
                Arc::new(ProcedureCache::new(settings.procedure_cache_size))
            }
        }
    }

    fn has_host_list(&self, settings: &Config) -> bool {
        self.get(settings).is_some_and(|pool| pool.hosts().is_some())
    }

    fn set_host_list(&self, settings: &Config, hosts: Vec<HostRecord>) {
        match self.pool(settings) {
            Ok(pool) => pool.set_hosts(hosts),
            Err(e) => tracing::warn!(error = %e, "cannot record host list"),
        }
    }
}

/// Builder for [`PoolRegistry`].
pub struct PoolRegistryBuilder {
    factory: Arc<dyn SessionFactory>,
    defaults: PoolConfig,
}

impl PoolRegistryBuilder {
    /// Ping sessions idle at least `idle` before reuse; `None` disables.
    #[must_use]
    pub fn health_check_after(mut self, idle: Option<Duration>) -> Self {
        self.defaults.health_check_after = idle;
        self
    }

    /// Enable or disable the session reset on release.
    #[must_use]
    pub fn reset_on_release(mut self, enabled: bool) -> Self {
        self.defaults.reset_on_release = enabled;
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> PoolRegistry {
        PoolRegistry {
            factory: self.factory,
            pools: Mutex::new(HashMap::new()),
            health_check_after: self.defaults.health_check_after,
            reset_on_release: self.defaults.reset_on_release,
        }
    }
}
