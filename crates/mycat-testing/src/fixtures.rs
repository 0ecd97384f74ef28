//! Collaborator doubles and environment helpers.
//!
//! Besides settings and environments pointing at a [`MockServer`], this
//! module has doubles for the topology collaborators: [`ScriptedFailover`],
//! [`StaticReplication`], [`MockTunnels`] and [`StaticSrv`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mycat_client::topology::{
    AmbientTransaction, AmbientTransactions, DirectSessionFactory, FailoverGroup, FailoverManager,
    FailoverMethod, FailoverOutcome, HostRecord, ReplicationManager, SessionFactory, SrvRecord,
    SrvResolver, TunnelHandle, TunnelProvider,
};
use mycat_client::transaction::IsolationLevel;
use mycat_client::{
    Config, Environment, EnvironmentBuilder, Error, Session, SessionHook, SettingsRegistry,
};
use parking_lot::Mutex;

use crate::server::MockServer;
use crate::transport::MockConnector;

/// Settings pointing at a mock host, pooling off.
#[must_use]
pub fn settings() -> Config {
    Config::new()
        .server("mock")
        .user("app")
        .password("secret")
        .pooling(false)
}

/// Builder for an environment whose sessions reach `server`.
///
/// Returns the connector too so tests can refuse hosts and inspect
/// attempts.
#[must_use]
pub fn environment(server: &MockServer) -> (EnvironmentBuilder, MockConnector) {
    let connector = MockConnector::new(server.clone());
    (
        Environment::builder().connector(Arc::new(connector.clone())),
        connector,
    )
}

/// Like [`environment`], with `hook` installed on every session.
#[must_use]
pub fn environment_with_hook(
    server: &MockServer,
    hook: Arc<dyn SessionHook>,
) -> (EnvironmentBuilder, MockConnector) {
    let connector = MockConnector::new(server.clone());
    let registry = Arc::new(SettingsRegistry::new());
    let factory = DirectSessionFactory::new(Arc::new(connector.clone()), registry.clone())
        .with_hook(hook);
    (
        Environment::builder()
            .registry(registry)
            .session_factory(Arc::new(factory)),
        connector,
    )
}

/// Hook recording the settings of every session opened.
#[derive(Debug, Default)]
pub struct RecordingHook {
    opened: Mutex<Vec<Config>>,
    queries: Mutex<Vec<String>>,
}

impl RecordingHook {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of every session opened so far.
    #[must_use]
    pub fn opened(&self) -> Vec<Config> {
        self.opened.lock().clone()
    }

    /// Every statement sent so far.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

impl SessionHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_open(&self, _driver_id: u64, settings: &Config) {
        self.opened.lock().push(settings.clone());
    }

    fn on_query(&self, _driver_id: u64, sql: &str) {
        self.queries.lock().push(sql.to_string());
    }
}

/// Ambient transaction source the test sets directly.
#[derive(Debug, Default)]
pub struct ManualAmbient {
    current: Mutex<Option<AmbientTransaction>>,
}

impl ManualAmbient {
    /// No transaction in scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put transaction `id` in scope.
    pub fn begin(&self, id: &str, isolation: IsolationLevel) {
        *self.current.lock() = Some(AmbientTransaction {
            id: id.to_string(),
            isolation,
        });
    }

    /// Leave the transaction scope.
    pub fn end(&self) {
        *self.current.lock() = None;
    }
}

impl AmbientTransactions for ManualAmbient {
    fn current(&self) -> Option<AmbientTransaction> {
        self.current.lock().clone()
    }
}

/// One host tried by [`ScriptedFailover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverAttempt {
    /// Host tried.
    pub host: String,
    /// Whether it was a pool attempt.
    pub pooled: bool,
}

/// Failover manager trying its candidates in list order.
///
/// A host named with [`prefer`](Self::prefer) is tried first. Refused
/// hosts are skipped; any other error ends the attempt.
#[derive(Debug, Default)]
pub struct ScriptedFailover {
    preferred: Option<String>,
    group: Mutex<Option<FailoverGroup>>,
    attempts: Mutex<Vec<FailoverAttempt>>,
    host_lists: AtomicUsize,
    resets: AtomicUsize,
}

impl ScriptedFailover {
    /// Try hosts in list order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try `host` before the others.
    #[must_use]
    pub fn prefer(mut self, host: impl Into<String>) -> Self {
        self.preferred = Some(host.into());
        self
    }

    /// Every host tried so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<FailoverAttempt> {
        self.attempts.lock().clone()
    }

    /// How many host lists were parsed or installed.
    #[must_use]
    pub fn host_lists(&self) -> usize {
        self.host_lists.load(Ordering::SeqCst)
    }

    /// How many times the group was forgotten.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn candidates(&self) -> Vec<HostRecord> {
        let Some(group) = self.group.lock().clone() else {
            return Vec::new();
        };
        let mut hosts = group.hosts;
        if let Some(preferred) = &self.preferred {
            hosts.sort_by_key(|h| &h.host != preferred);
        }
        hosts
    }
}

#[async_trait]
impl FailoverManager for ScriptedFailover {
    fn parse_host_list(&self, spec: &str, default_port: u16) -> mycat_client::Result<()> {
        self.host_lists.fetch_add(1, Ordering::SeqCst);
        let hosts: Vec<HostRecord> = Config::new()
            .server(spec)
            .port(default_port)
            .hosts()?
            .into_iter()
            .map(|(host, port)| HostRecord::new(host, port))
            .collect();
        *self.group.lock() = (hosts.len() > 1).then(|| FailoverGroup {
            method: FailoverMethod::Sequential,
            hosts,
        });
        Ok(())
    }

    fn set_host_list(&self, hosts: Vec<HostRecord>, method: FailoverMethod) {
        self.host_lists.fetch_add(1, Ordering::SeqCst);
        *self.group.lock() = (!hosts.is_empty()).then_some(FailoverGroup { method, hosts });
    }

    async fn attempt_connection(
        &self,
        factory: &dyn SessionFactory,
        settings: &Config,
        is_pool_attempt: bool,
    ) -> mycat_client::Result<FailoverOutcome> {
        let mut last_error = None;
        for candidate in self.candidates() {
            self.attempts.lock().push(FailoverAttempt {
                host: candidate.host.clone(),
                pooled: is_pool_attempt,
            });
            match factory
                .create_for_host(settings, &candidate.host, candidate.port)
                .await
            {
                Ok(mut session) => {
                    let settings = settings.clone().with_host(&candidate.host, candidate.port);
                    if is_pool_attempt {
                        if let Err(e) = session.close().await {
                            tracing::debug!(error = %e, "closing validation session failed");
                        }
                        return Ok(FailoverOutcome {
                            settings,
                            session: None,
                        });
                    }
                    return Ok(FailoverOutcome {
                        settings,
                        session: Some(session),
                    });
                }
                Err(e) if e.is_transient() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Config("no failover candidates".into())))
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        *self.group.lock() = None;
    }

    fn failover_group(&self) -> Option<FailoverGroup> {
        self.group.lock().clone()
    }
}

/// Replication manager routing one group name to one member.
#[derive(Debug)]
pub struct StaticReplication {
    group: String,
    settings: Config,
    member: (String, u16),
    acquired: AtomicUsize,
}

impl StaticReplication {
    /// Route group `group` to `host:port`, opening sessions with `settings`.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        settings: Config,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            group: group.into(),
            settings,
            member: (host.into(), port),
            acquired: AtomicUsize::new(0),
        }
    }

    /// How many sessions were handed out.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicationManager for StaticReplication {
    fn is_replication_group(&self, spec: &str) -> bool {
        spec == self.group
    }

    async fn acquire_session(
        &self,
        spec: &str,
        factory: &dyn SessionFactory,
    ) -> mycat_client::Result<Session> {
        if spec != self.group {
            return Err(Error::InvalidArgument(format!(
                "unknown replication group '{spec}'"
            )));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let (host, port) = &self.member;
        factory.create_for_host(&self.settings, host, *port).await
    }
}

/// Tunnel provider whose tunnels all forward from one local endpoint.
#[derive(Debug)]
pub struct MockTunnels {
    endpoint: (String, u16),
    requested: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
}

impl MockTunnels {
    /// Tunnels listening on `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: (host.into(), port),
            requested: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Server of every tunnel established so far.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    /// How many tunnels were torn down.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvider for MockTunnels {
    async fn establish(&self, settings: &Config) -> mycat_client::Result<Box<dyn TunnelHandle>> {
        self.requested.lock().push(settings.server.clone());
        Ok(Box::new(MockTunnel {
            endpoint: self.endpoint.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct MockTunnel {
    endpoint: (String, u16),
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelHandle for MockTunnel {
    fn local_endpoint(&self) -> (String, u16) {
        self.endpoint.clone()
    }

    async fn close(&mut self) -> mycat_client::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// SRV resolver answering every name with the same records, in the order
/// given.
#[derive(Debug, Default)]
pub struct StaticSrv {
    records: Vec<SrvRecord>,
    lookups: Mutex<Vec<String>>,
}

impl StaticSrv {
    /// Answer with `records`.
    #[must_use]
    pub fn new(records: Vec<SrvRecord>) -> Self {
        Self {
            records,
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Every name resolved so far.
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl SrvResolver for StaticSrv {
    async fn resolve(&self, name: &str) -> mycat_client::Result<Vec<SrvRecord>> {
        self.lookups.lock().push(name.to_string());
        Ok(self.records.clone())
    }
}

/// An SRV record.
#[must_use]
pub fn srv(target: &str, port: u16, priority: u16, weight: u16) -> SrvRecord {
    SrvRecord {
        target: target.to_string(),
        port,
        priority,
        weight,
    }
}
