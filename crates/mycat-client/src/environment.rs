//! Shared driver environment.
//!
//! An [`Environment`] bundles what connections share: the settings
//! registry, the session factory, the optional pool, failover, replication,
//! tunnel, SRV and ambient-transaction collaborators, and the enlistment
//! registry. Cloning is cheap; every clone refers to the same state.

use std::sync::Arc;

use crate::config::Config;
use crate::connection::Connection;
use crate::enlist::EnlistmentRegistry;
use crate::error::Result;
use crate::registry::SettingsRegistry;
use crate::schema::InformationSchemaProvider;
use crate::topology::{
    AmbientTransactions, Connector, DirectSessionFactory, FailoverManager, PoolManager,
    ReplicationManager, SchemaProvider, SessionFactory, SrvResolver, TcpConnector, TunnelProvider,
};

/// Everything connections created from it share.
#[derive(Clone)]
pub struct Environment {
    pub(crate) registry: Arc<SettingsRegistry>,
    pub(crate) factory: Arc<dyn SessionFactory>,
    pub(crate) pool: Option<Arc<dyn PoolManager>>,
    pub(crate) failover: Option<Arc<dyn FailoverManager>>,
    pub(crate) replication: Option<Arc<dyn ReplicationManager>>,
    pub(crate) tunnels: Option<Arc<dyn TunnelProvider>>,
    pub(crate) srv: Option<Arc<dyn SrvResolver>>,
    pub(crate) ambient: Option<Arc<dyn AmbientTransactions>>,
    pub(crate) enlistments: Arc<EnlistmentRegistry>,
    pub(crate) schema: Arc<dyn SchemaProvider>,
}

impl Environment {
    /// Environment connecting over TCP without pooling or failover.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring an environment.
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// A closed connection using `settings`.
    #[must_use]
    pub fn connection(&self, settings: Config) -> Connection {
        Connection::new(self.clone(), settings)
    }

    /// A closed connection parsed from a connection string.
    pub fn connect_str(&self, conn_str: &str) -> Result<Connection> {
        Ok(self.connection(self.registry.parse(conn_str)?))
    }

    /// The settings registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SettingsRegistry> {
        &self.registry
    }

    /// The session factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// The pool manager, if pooling is available.
    #[must_use]
    pub fn pool(&self) -> Option<&Arc<dyn PoolManager>> {
        self.pool.as_ref()
    }

    /// The enlistment registry.
    #[must_use]
    pub fn enlistments(&self) -> &Arc<EnlistmentRegistry> {
        &self.enlistments
    }

    /// Close the idle sessions of the pool for `settings`.
    pub async fn clear_pool(&self, settings: &Config) {
        if let Some(pool) = &self.pool {
            pool.clear_pool(settings).await;
        }
    }

    /// Close the idle sessions of every pool.
    pub async fn clear_all_pools(&self) {
        if let Some(pool) = &self.pool {
            pool.clear_all().await;
        }
    }

    /// The same servers without pooling, failover, replication or
    /// enlistment.
    pub(crate) fn side_channel(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            factory: self.factory.clone(),
            pool: None,
            failover: None,
            replication: None,
            tunnels: self.tunnels.clone(),
            srv: self.srv.clone(),
            ambient: None,
            enlistments: Arc::new(EnlistmentRegistry::new()),
            schema: self.schema.clone(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("pooling", &self.pool.is_some())
            .field("failover", &self.failover.is_some())
            .field("replication", &self.replication.is_some())
            .field("tunnels", &self.tunnels.is_some())
            .field("srv", &self.srv.is_some())
            .field("ambient", &self.ambient.is_some())
            .field("enlistments", &self.enlistments)
            .finish()
    }
}

/// Builder for [`Environment`].
#[derive(Default)]
pub struct EnvironmentBuilder {
    registry: Option<Arc<SettingsRegistry>>,
    connector: Option<Arc<dyn Connector>>,
    factory: Option<Arc<dyn SessionFactory>>,
    pool: Option<Arc<dyn PoolManager>>,
    failover: Option<Arc<dyn FailoverManager>>,
    replication: Option<Arc<dyn ReplicationManager>>,
    tunnels: Option<Arc<dyn TunnelProvider>>,
    srv: Option<Arc<dyn SrvResolver>>,
    ambient: Option<Arc<dyn AmbientTransactions>>,
    schema: Option<Arc<dyn SchemaProvider>>,
}

impl EnvironmentBuilder {
    /// Share a settings registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<SettingsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Open transports with `connector` (default: [`TcpConnector`]).
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Create sessions with `factory`; overrides [`connector`](Self::connector).
    #[must_use]
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Pool sessions with `pool`.
    #[must_use]
    pub fn pool(mut self, pool: Arc<dyn PoolManager>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Select hosts with `failover`.
    #[must_use]
    pub fn failover(mut self, failover: Arc<dyn FailoverManager>) -> Self {
        self.failover = Some(failover);
        self
    }

    /// Route replication groups through `replication`.
    #[must_use]
    pub fn replication(mut self, replication: Arc<dyn ReplicationManager>) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Establish SSH tunnels with `tunnels`.
    #[must_use]
    pub fn tunnels(mut self, tunnels: Arc<dyn TunnelProvider>) -> Self {
        self.tunnels = Some(tunnels);
        self
    }

    /// Resolve `dns srv` names with `srv`.
    #[must_use]
    pub fn srv_resolver(mut self, srv: Arc<dyn SrvResolver>) -> Self {
        self.srv = Some(srv);
        self
    }

    /// Read the ambient transaction from `ambient`.
    #[must_use]
    pub fn ambient_transactions(mut self, ambient: Arc<dyn AmbientTransactions>) -> Self {
        self.ambient = Some(ambient);
        self
    }

    /// Answer schema requests with `schema` (default:
    /// [`InformationSchemaProvider`]).
    #[must_use]
    pub fn schema_provider(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Build the environment.
    #[must_use]
    pub fn build(self) -> Environment {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SettingsRegistry::new()));
        let factory = self.factory.unwrap_or_else(|| {
            let connector = self
                .connector
                .unwrap_or_else(|| Arc::new(TcpConnector));
            Arc::new(DirectSessionFactory::new(connector, registry.clone()))
        });
        Environment {
            registry,
            factory,
            pool: self.pool,
            failover: self.failover,
            replication: self.replication,
            tunnels: self.tunnels,
            srv: self.srv,
            ambient: self.ambient,
            enlistments: Arc::new(EnlistmentRegistry::new()),
            schema: self
                .schema
                .unwrap_or_else(|| Arc::new(InformationSchemaProvider)),
        }
    }
}
