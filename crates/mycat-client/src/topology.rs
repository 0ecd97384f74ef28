//! Collaborator contracts.
//!
//! A logical connection reaches the network only through these traits:
//! a [`Connector`] opens transports, a [`SessionFactory`] turns them into
//! authenticated sessions, and the optional managers decide which host and
//! which session to use. [`Environment`](crate::Environment) wires the
//! implementations together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mycat_codec::{PacketStream, PacketTransport};

use crate::config::{Config, Protocol};
use crate::error::{Error, Result};
use crate::hooks::{HookPipeline, SessionHook};
use crate::procedure_cache::ProcedureCache;
use crate::registry::SettingsRegistry;
use crate::schema::SchemaTable;
use crate::session::Session;
use crate::transaction::IsolationLevel;

/// Opens raw transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`, giving up after `timeout`.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn PacketTransport>>;
}

/// Connects over TCP, or Unix sockets on unix.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

async fn with_deadline<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout { fatal: false })?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn PacketTransport>> {
        match protocol {
            Protocol::Tcp => {
                tracing::debug!(host = %host, port, "opening tcp connection");
                let stream = with_deadline(timeout, tokio::net::TcpStream::connect((host, port))).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(PacketStream::new(stream)))
            }
            #[cfg(unix)]
            Protocol::Unix => {
                tracing::debug!(path = %host, "opening unix socket");
                let stream = with_deadline(timeout, tokio::net::UnixStream::connect(host)).await?;
                Ok(Box::new(PacketStream::new(stream)))
            }
            #[cfg(not(unix))]
            Protocol::Unix => Err(Error::NotSupported(
                "unix sockets are not available on this platform".into(),
            )),
            Protocol::Pipe => Err(Error::NotSupported("named pipes are not supported".into())),
            Protocol::Memory => Err(Error::NotSupported(
                "shared memory connections are not supported".into(),
            )),
        }
    }
}

/// Creates authenticated sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session to the first reachable host of `settings`.
    async fn create(&self, settings: &Config) -> Result<Session>;

    /// Open a session to one host, keeping the rest of `settings`.
    async fn create_for_host(&self, settings: &Config, host: &str, port: u16) -> Result<Session>;
}

/// Opens sessions directly through a [`Connector`].
pub struct DirectSessionFactory {
    connector: Arc<dyn Connector>,
    registry: Arc<SettingsRegistry>,
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl DirectSessionFactory {
    /// Factory drawing driver ids from `registry`.
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<SettingsRegistry>) -> Self {
        Self {
            connector,
            registry,
            hooks: Vec::new(),
        }
    }

    /// Install `hook` on every session this factory opens.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn pipeline(&self, settings: &Config) -> HookPipeline {
        self.hooks
            .iter()
            .cloned()
            .fold(HookPipeline::from_config(settings), HookPipeline::with_shared)
    }

    async fn open(&self, settings: &Config, host: &str, port: u16) -> Result<Session> {
        let transport = self
            .connector
            .connect(host, port, settings.protocol, settings.connect_timeout())
            .await?;
        Session::connect_with_hooks(
            self.registry.next_driver_id(),
            transport,
            settings,
            self.pipeline(settings),
        )
        .await
    }
}

impl std::fmt::Debug for DirectSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSessionFactory")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionFactory for DirectSessionFactory {
    async fn create(&self, settings: &Config) -> Result<Session> {
        let mut last_error = None;
        for (host, port) in settings.hosts()? {
            match self.open(settings, &host, port).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() => {
                    tracing::warn!(host = %host, port, error = %e, "host unreachable");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Config("no hosts to connect to".into())))
    }

    async fn create_for_host(&self, settings: &Config, host: &str, port: u16) -> Result<Session> {
        let settings = settings.clone().with_host(host, port);
        self.open(&settings, host, port).await
    }
}

/// Hands out pooled sessions.
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// An idle or newly created session for `settings`.
    async fn acquire(&self, settings: &Config) -> Result<Session>;

    /// Return a session; its settings select the pool.
    async fn release(&self, session: Session);

    /// Drop a session that failed while being opened.
    async fn discard(&self, session: Session);

    /// Close the idle sessions of one pool and retire the busy ones.
    async fn clear_pool(&self, settings: &Config);

    /// [`clear_pool`](Self::clear_pool) for every pool.
    async fn clear_all(&self);

    /// The procedure cache shared by the pool for `settings`.
    fn procedure_cache(&self, settings: &Config) -> Arc<ProcedureCache>;

    /// Whether the pool for `settings` already knows its hosts.
    fn has_host_list(&self, settings: &Config) -> bool;

    /// Remember the resolved hosts of the pool for `settings`.
    fn set_host_list(&self, settings: &Config, hosts: Vec<HostRecord>);
}

/// One failover candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Priority; higher is tried first by [`FailoverMethod::Priority`].
    pub priority: Option<u32>,
}

impl HostRecord {
    /// Record without a priority.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            priority: None,
        }
    }
}

/// Order in which failover candidates are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverMethod {
    /// In list order.
    #[default]
    Sequential,
    /// By descending priority.
    Priority,
    /// In random order.
    Random,
}

/// The active candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverGroup {
    /// Selection order.
    pub method: FailoverMethod,
    /// Candidates.
    pub hosts: Vec<HostRecord>,
}

/// What a failover attempt produced.
#[derive(Debug)]
pub struct FailoverOutcome {
    /// Settings rewritten for the host that answered.
    pub settings: Config,
    /// Session opened during the attempt, when it was not a pool attempt.
    pub session: Option<Session>,
}

/// Chooses among multiple hosts.
#[async_trait]
pub trait FailoverManager: Send + Sync {
    /// Parse a server list; a list naming more than one host activates a
    /// failover group.
    fn parse_host_list(&self, spec: &str, default_port: u16) -> Result<()>;

    /// Install resolved hosts as the failover group.
    fn set_host_list(&self, hosts: Vec<HostRecord>, method: FailoverMethod);

    /// Try the candidates until one accepts a connection.
    ///
    /// A pool attempt only validates the host and returns no session.
    async fn attempt_connection(
        &self,
        factory: &dyn SessionFactory,
        settings: &Config,
        is_pool_attempt: bool,
    ) -> Result<FailoverOutcome>;

    /// Forget the current group.
    fn reset(&self);

    /// The current group, if any.
    fn failover_group(&self) -> Option<FailoverGroup>;
}

/// Routes connections to replication groups.
#[async_trait]
pub trait ReplicationManager: Send + Sync {
    /// Whether `spec` names a replication group rather than hosts.
    fn is_replication_group(&self, spec: &str) -> bool;

    /// A session to a member of the group.
    async fn acquire_session(&self, spec: &str, factory: &dyn SessionFactory) -> Result<Session>;
}

/// An established SSH tunnel.
#[async_trait]
pub trait TunnelHandle: Send + Sync {
    /// Local `(host, port)` forwarding to the server.
    fn local_endpoint(&self) -> (String, u16);

    /// Tear the tunnel down.
    async fn close(&mut self) -> Result<()>;
}

/// Establishes SSH tunnels.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Forward a local endpoint to the server named in `settings`.
    async fn establish(&self, settings: &Config) -> Result<Box<dyn TunnelHandle>>;
}

/// A DNS SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Target host.
    pub target: String,
    /// Port.
    pub port: u16,
    /// Priority; lower is preferred.
    pub priority: u16,
    /// Weight among equal priorities.
    pub weight: u16,
}

/// Resolves DNS SRV names.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// SRV records for `name`, in preference order.
    async fn resolve(&self, name: &str) -> Result<Vec<SrvRecord>>;
}

/// A distributed transaction the caller is running in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientTransaction {
    /// Transaction identity.
    pub id: String,
    /// Requested isolation.
    pub isolation: IsolationLevel,
}

/// Source of the ambient transaction.
pub trait AmbientTransactions: Send + Sync {
    /// The transaction the current task runs in.
    fn current(&self) -> Option<AmbientTransaction>;
}

/// Schema metadata collections.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Rows of collection `name` matching the positional `restrictions`.
    async fn schema_collection(
        &self,
        session: &mut Session,
        name: &str,
        restrictions: &[Option<String>],
    ) -> Result<SchemaTable>;

    /// Parameter rows of the routines in `procedures`.
    async fn procedure_parameters(
        &self,
        session: &mut Session,
        restrictions: &[Option<String>],
        procedures: &SchemaTable,
    ) -> Result<SchemaTable>;
}
