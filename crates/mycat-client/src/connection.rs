//! Logical connections.
//!
//! A [`Connection`] is what callers hold. It owns at most one physical
//! [`Session`] at a time, obtained on [`open`](Connection::open) from an
//! enlisted transaction, a replication group, a failover attempt, the pool
//! or a fresh handshake, and gives it back to where it came from on
//! [`close`](Connection::close).
//!
//! ```text
//! Closed --open()--> Connecting --> Open --close()/abort()--> Closed
//!                        |
//!                        +--(any failure)--> Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use mycat_protocol::Any;
use mycat_protocol::crud::{Delete, Find, Insert, Update};
use mycat_protocol::prepare::PreparableMessage;
use tracing::Instrument;

use crate::cancel::{self, CancellationToken, SideChannelFactory};
use crate::config::{Config, Protocol};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::instrumentation::{DB_SYSTEM, OperationTimer, span_names};
use crate::procedure_cache::{ProcedureCache, ProcedureLookup};
use crate::result::{ResultStream, ResultSummary};
use crate::row::Row;
use crate::schema::{SchemaSource, SchemaTable};
use crate::session::{Session, SharedSession};
use crate::state::{ConnectionState, StateChange, StateMachine};
use crate::statement::PreparedStatement;
use crate::timeout::{CommandDeadline, CommandTimer};
use crate::topology::{
    AmbientTransaction, FailoverMethod, HostRecord, PoolManager, TunnelHandle,
};
use crate::transaction::{IsolationLevel, Transaction, TransactionScope, isolation_statement};

/// Timeout of the side connection that kills a timed-out statement, and
/// read timeout while the interrupted result is drained.
const CANCEL_TIMEOUT_SECS: u32 = 5;

/// Give a session back to `pool`, or close it when there is none.
///
/// A pooled session is rolled back first if the server reports an open
/// transaction; a broken one is discarded instead of queued.
pub(crate) async fn release_session(
    shared: SharedSession,
    pool: Option<Arc<dyn PoolManager>>,
) -> Result<()> {
    let mut session = match Arc::try_unwrap(shared) {
        Ok(mutex) => mutex.into_inner(),
        Err(shared) => {
            tracing::warn!("session still referenced elsewhere; closing it in place");
            return shared.lock().await.close().await;
        }
    };
    let Some(pool) = pool else {
        return session.close().await;
    };
    if !session.is_open() {
        pool.discard(session).await;
        return Ok(());
    }
    if let Err(e) = session.rollback_if_in_transaction().await {
        tracing::warn!(
            driver_id = session.driver_id(),
            error = %e,
            "rollback before release failed"
        );
        pool.discard(session).await;
        return Ok(());
    }
    pool.release(session).await;
    Ok(())
}

/// Drop a session without returning it for reuse.
async fn discard_session(shared: SharedSession, pool: Option<Arc<dyn PoolManager>>) {
    match Arc::try_unwrap(shared) {
        Ok(mutex) => {
            let mut session = mutex.into_inner();
            match pool {
                Some(pool) => pool.discard(session).await,
                None => {
                    if let Err(e) = session.abort().await {
                        tracing::debug!(error = %e, "abort of discarded session failed");
                    }
                }
            }
        }
        Err(shared) => {
            if let Err(e) = shared.lock().await.abort().await {
                tracing::debug!(error = %e, "abort of discarded session failed");
            }
        }
    }
}

/// A logical connection to the server.
pub struct Connection {
    env: Environment,
    settings: Config,
    active_settings: Option<Config>,
    machine: StateMachine,
    session: Option<SharedSession>,
    pool: Option<Arc<dyn PoolManager>>,
    procedure_cache: Option<Arc<ProcedureCache>>,
    tunnel: Option<Box<dyn TunnelHandle>>,
    enlisted: Option<String>,
    database: Option<String>,
    server_thread: Option<u64>,
    has_been_open: bool,
    command_timeout: u32,
    next_statement_id: u32,
}

impl Connection {
    pub(crate) fn new(env: Environment, settings: Config) -> Self {
        Self {
            env,
            settings,
            active_settings: None,
            machine: StateMachine::default(),
            session: None,
            pool: None,
            procedure_cache: None,
            tunnel: None,
            enlisted: None,
            database: None,
            server_thread: None,
            has_been_open: false,
            command_timeout: 0,
            next_statement_id: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Receive state notifications.
    pub fn subscribe(&mut self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.machine.subscribe(Arc::new(listener));
    }

    /// Requested settings.
    #[must_use]
    pub fn settings(&self) -> &Config {
        &self.settings
    }

    /// Settings the current session was opened with, after failover and
    /// tunnel rewrites.
    #[must_use]
    pub fn active_settings(&self) -> Option<&Config> {
        self.active_settings.as_ref()
    }

    /// Replace the settings of a closed connection.
    pub fn set_settings(&mut self, settings: Config) -> Result<()> {
        if self.state() != ConnectionState::Closed {
            return Err(Error::InvalidState(format!(
                "settings cannot change while the connection is {}",
                self.state()
            )));
        }
        self.settings = settings;
        Ok(())
    }

    /// Connection string; secrets are hidden once the connection has been
    /// opened unless `persist security info` is set.
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.settings
            .to_connection_string(!self.has_been_open || self.settings.persist_security_info)
    }

    /// Server thread of the current session.
    #[must_use]
    pub fn server_thread(&self) -> Option<u64> {
        self.server_thread
    }

    /// Whether the connection was ever fully opened.
    #[must_use]
    pub fn has_been_open(&self) -> bool {
        self.has_been_open
    }

    /// Active command deadline in seconds; 0 when none is set.
    #[must_use]
    pub fn command_timeout(&self) -> u32 {
        self.command_timeout
    }

    /// Procedure cache in use while open.
    #[must_use]
    pub fn procedure_cache(&self) -> Option<&Arc<ProcedureCache>> {
        self.procedure_cache.as_ref()
    }

    /// The current session, shared with the enlistment registry.
    #[must_use]
    pub fn session(&self) -> Option<&SharedSession> {
        self.session.as_ref()
    }

    /// Whether the server reported an expired password during the open.
    pub async fn is_password_expired(&self) -> bool {
        match &self.session {
            Some(shared) => shared.lock().await.password_expired(),
            None => false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == ConnectionState::Open {
            Ok(())
        } else {
            Err(Error::not_open())
        }
    }

    fn shared(&self) -> Result<SharedSession> {
        self.session.clone().ok_or_else(Error::not_open)
    }

    async fn holds_open_session(&self) -> bool {
        match &self.session {
            Some(shared) => shared.lock().await.is_open(),
            None => false,
        }
    }

    fn adopt(&mut self, session: Session, acquired: &mut bool) {
        self.session = Some(Arc::new(tokio::sync::Mutex::new(session)));
        *acquired = true;
    }

    /// Open the connection.
    ///
    /// Fails with [`Error::InvalidState`] when already open. On any failure
    /// the connection is back in [`ConnectionState::Closed`] and a session
    /// acquired by the attempt has been discarded.
    pub async fn open(&mut self) -> Result<()> {
        if self.state() == ConnectionState::Open {
            return Err(Error::InvalidState("connection is already open".into()));
        }
        let span = tracing::info_span!(
            span_names::CONNECT,
            db.system = DB_SYSTEM,
            server.address = %self.settings.server,
            server.port = self.settings.port,
        );
        self.machine.set_state(ConnectionState::Connecting, true);
        let timer = OperationTimer::start("connect");
        let mut acquired = false;
        let opened = self.open_inner(&mut acquired).instrument(span).await;
        timer.finish(opened.is_ok());
        if let Err(e) = &opened {
            tracing::debug!(error = %e, "open failed");
            self.abandon_attempt(acquired).await;
            self.machine.set_state(ConnectionState::Closed, true);
        }
        opened
    }

    async fn open_inner(&mut self, acquired: &mut bool) -> Result<()> {
        let env = self.env.clone();
        let mut settings = self.settings.clone();
        let ambient = if settings.auto_enlist {
            env.ambient.as_ref().and_then(|a| a.current())
        } else {
            None
        };

        if let Some(tx) = &ambient {
            if let Some(enlisted) = env.enlistments.lookup(&tx.id) {
                if enlisted.in_active_use || enlisted.settings_key != settings.equivalence_key() {
                    return Err(Error::NotSupported(
                        "multiple connections in transaction not supported".into(),
                    ));
                }
                env.enlistments.set_active(&tx.id, true);
                self.enlisted = Some(tx.id.clone());
                self.session = Some(enlisted.session);
            }
        }

        if settings.protocol == Protocol::Tcp && settings.ssh.is_configured() {
            let provider = env.tunnels.clone().ok_or_else(|| {
                Error::NotSupported("ssh tunnels require a tunnel provider".into())
            })?;
            let tunnel = provider.establish(&settings).await?;
            let (host, port) = tunnel.local_endpoint();
            tracing::debug!(host = %host, port, "ssh tunnel established");
            self.tunnel = Some(tunnel);
            settings = settings.with_host(&host, port);
        }

        let pool = if settings.pooling {
            if env.pool.is_none() {
                tracing::debug!("pooling requested without a pool manager; opening unpooled");
            }
            env.pool.clone()
        } else {
            None
        };
        self.pool = pool.clone();

        if pool.as_ref().is_none_or(|p| !p.has_host_list(&settings)) {
            let hosts = self.resolve_hosts(&settings).await?;
            if let Some(pool) = &pool {
                pool.set_host_list(&settings, hosts.clone());
            }
            if settings.dns_srv && env.failover.is_none() {
                settings.server = hosts
                    .iter()
                    .map(|h| format!("{}:{}", h.host, h.port))
                    .collect::<Vec<_>>()
                    .join(",");
                settings.dns_srv = false;
            }
        }

        let failover = env
            .failover
            .clone()
            .filter(|f| f.failover_group().is_some());
        let replication = env
            .replication
            .clone()
            .filter(|r| r.is_replication_group(&settings.server));

        if let Some(replication) = replication {
            match self.session.clone() {
                Some(held) => {
                    settings = held.lock().await.settings().clone();
                }
                None => {
                    let session = replication
                        .acquire_session(&settings.server, env.factory.as_ref())
                        .await?;
                    settings = session.settings().clone();
                    self.adopt(session, acquired);
                }
            }
        } else if let Some(failover) = failover.as_ref().filter(|_| pool.is_none()) {
            let outcome = failover
                .attempt_connection(env.factory.as_ref(), &settings, false)
                .await?;
            settings = outcome.settings;
            if let Some(mut session) = outcome.session {
                if self.session.is_none() {
                    self.adopt(session, acquired);
                } else if let Err(e) = session.close().await {
                    tracing::debug!(error = %e, "closing surplus failover session failed");
                }
            }
        }

        if let Some(pool) = &pool {
            if let Some(failover) = &failover {
                let outcome = failover
                    .attempt_connection(env.factory.as_ref(), &settings, true)
                    .await?;
                settings = outcome.settings;
                if let Some(mut surplus) = outcome.session {
                    if let Err(e) = surplus.close().await {
                        tracing::debug!(error = %e, "closing surplus failover session failed");
                    }
                }
            }
            if !self.holds_open_session().await {
                let session = pool.acquire(&settings).await?;
                self.adopt(session, acquired);
            }
            self.procedure_cache = Some(pool.procedure_cache(&settings));
        } else {
            if !self.holds_open_session().await {
                let session = env.factory.create(&settings).await?;
                self.adopt(session, acquired);
            }
            self.procedure_cache = Some(Arc::new(ProcedureCache::new(
                settings.procedure_cache_size,
            )));
        }
        self.active_settings = Some(settings.clone());

        self.machine.set_state(ConnectionState::Open, false);
        let shared = self.shared()?;
        let expired = {
            let mut session = shared.lock().await;
            session.configure().await?;
            self.server_thread = session.server_thread();
            session.password_expired()
        };

        if expired {
            if let Some(pool) = &pool {
                pool.clear_pool(&settings).await;
            }
        } else if let Some(database) = settings.database.clone().filter(|d| !d.is_empty()) {
            self.change_database(&database).await?;
        }

        if let Some(tx) = &ambient {
            self.enlist(tx).await?;
        }

        self.has_been_open = true;
        self.machine.set_state(ConnectionState::Open, true);
        tracing::info!(
            thread = ?self.server_thread,
            pooled = self.pool.is_some(),
            password_expired = expired,
            "connection opened"
        );
        Ok(())
    }

    async fn resolve_hosts(&self, settings: &Config) -> Result<Vec<HostRecord>> {
        let failover = self.env.failover.as_ref();
        if let Some(failover) = failover {
            failover.reset();
        }

        if settings.dns_srv {
            let resolver = self.env.srv.as_ref().ok_or_else(|| {
                Error::NotSupported("dns srv requires an srv resolver".into())
            })?;
            let mut records = resolver.resolve(&settings.server).await?;
            if records.is_empty() {
                return Err(Error::Config(format!(
                    "no dns srv records found for '{}'",
                    settings.server
                )));
            }
            records.sort_by_key(|r| (r.priority, std::cmp::Reverse(r.weight)));
            let hosts: Vec<HostRecord> = records
                .into_iter()
                .map(|r| HostRecord::new(r.target, r.port))
                .collect();
            if let Some(failover) = failover {
                failover.set_host_list(hosts.clone(), FailoverMethod::Sequential);
            }
            return Ok(hosts);
        }

        if let Some(failover) = failover {
            failover.parse_host_list(&settings.server, settings.port)?;
        }
        Ok(settings
            .hosts()?
            .into_iter()
            .map(|(host, port)| HostRecord::new(host, port))
            .collect())
    }

    async fn abandon_attempt(&mut self, acquired: bool) {
        let pool = self.pool.take();
        if let Some(shared) = self.session.take() {
            if acquired {
                discard_session(shared, pool).await;
            }
        }
        if let Some(tx) = self.enlisted.take() {
            self.env.enlistments.set_active(&tx, false);
        }
        self.reset_fields().await;
    }

    async fn reset_fields(&mut self) {
        self.pool = None;
        self.procedure_cache = None;
        self.active_settings = None;
        self.database = None;
        self.server_thread = None;
        self.command_timeout = 0;
        if let Some(mut tunnel) = self.tunnel.take() {
            if let Err(e) = tunnel.close().await {
                tracing::debug!(error = %e, "closing ssh tunnel failed");
            }
        }
        if let Some(failover) = &self.env.failover {
            failover.reset();
        }
    }

    async fn enlist(&mut self, tx: &AmbientTransaction) -> Result<()> {
        if self.enlisted.as_deref() == Some(tx.id.as_str()) {
            return Ok(());
        }
        let shared = self.shared()?;
        {
            let mut session = shared.lock().await;
            let statement = isolation_statement(tx.isolation, TransactionScope::Next)?;
            session.execute(&statement, &[]).await?;
            session.execute("BEGIN", &[]).await?;
        }
        self.env
            .enlistments
            .enlist(tx, shared, &self.settings, self.pool.clone())?;
        self.enlisted = Some(tx.id.clone());
        Ok(())
    }

    /// Close the connection.
    ///
    /// A no-op when already closed. The session goes back to the pool, or
    /// is closed, unless it is enlisted in a pending ambient transaction;
    /// then it stays with the transaction until it completes.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(shared) = &self.session {
            shared.lock().await.clear_password_expired();
        }
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        let mut outcome = Ok(());
        if let Some(shared) = self.session.take() {
            if let Err(e) = shared.lock().await.drain_pending().await {
                tracing::debug!(error = %e, "draining open result on close failed");
            }
            let pending = self
                .enlisted
                .take()
                .filter(|tx| self.env.enlistments.is_pending(tx));
            match pending {
                Some(tx) => self.env.enlistments.set_active(&tx, false),
                None => outcome = release_session(shared, self.pool.take()).await,
            }
        }
        self.reset_fields().await;
        self.machine.set_state(ConnectionState::Closed, true);
        outcome
    }

    /// Check that the server answers.
    ///
    /// On failure the session is discarded and the connection is closed.
    /// A session enlisted in an ambient transaction leaves the transaction
    /// too, so the next connection in it opens a fresh session.
    pub async fn ping(&mut self) -> bool {
        if let Some(shared) = self.session.clone() {
            let answered = shared.lock().await.ping().await;
            drop(shared);
            match answered {
                Ok(()) => return true,
                Err(e) => {
                    tracing::debug!(thread = ?self.server_thread, error = %e, "ping failed");
                }
            }
            if let Some(shared) = self.session.take() {
                if let Some(tx) = self.enlisted.take() {
                    self.env.enlistments.remove(&tx);
                }
                discard_session(shared, self.pool.take()).await;
            }
            self.reset_fields().await;
        }
        self.machine.set_state(ConnectionState::Closed, true);
        false
    }

    /// Tear the session down without a polite close. Errors are logged.
    ///
    /// An enlisted session is dropped from its ambient transaction.
    pub async fn abort(&mut self) {
        if let Some(shared) = self.session.take() {
            if let Err(e) = shared.lock().await.abort().await {
                tracing::warn!(
                    thread = ?self.server_thread,
                    error = %e,
                    "error occurred aborting the connection"
                );
            }
            if let Some(tx) = self.enlisted.take() {
                self.env.enlistments.remove(&tx);
            }
            discard_session(shared, self.pool.take()).await;
        }
        self.reset_fields().await;
        self.machine.set_state(ConnectionState::Closed, true);
    }

    /// Kill the statement running on this connection's server thread.
    ///
    /// Runs `KILL QUERY` over a separate unpooled connection whose timeouts
    /// are `timeout_seconds`.
    pub async fn cancel_query(&self, timeout_seconds: u32) -> Result<()> {
        let thread = self
            .server_thread
            .ok_or_else(|| Error::InvalidState("no server thread to cancel".into()))?;
        let span = tracing::info_span!(span_names::CANCEL, thread, timeout_seconds);
        async {
            let factory = SideChannelFactory::new(&self.env);
            let mut side = factory
                .open(&self.side_channel_settings(), timeout_seconds)
                .await?;
            let killed = match side.session.clone() {
                Some(shared) => shared.lock().await.kill_query(thread).await,
                None => Err(Error::not_open()),
            };
            if let Err(e) = &killed {
                if e.is_timeout() {
                    side.abort().await;
                    return Err(Error::Timeout { fatal: true });
                }
            }
            let closed = side.close().await;
            killed.and(closed)
        }
        .instrument(span)
        .await
    }

    /// Settings a side connection needs to reach this session's server.
    ///
    /// The host chosen by failover, replication or SRV resolution, already
    /// resolved, unless a tunnel rewrote it to a local endpoint; the side
    /// connection then opens its own tunnel from the requested settings.
    fn side_channel_settings(&self) -> Config {
        match (&self.active_settings, &self.tunnel) {
            (Some(active), None) => Config {
                dns_srv: false,
                ..active.clone()
            },
            _ => self.settings.clone(),
        }
    }

    /// Recover from a timed-out or aborted command.
    ///
    /// Kills the statement, then drains the interrupted result with a short
    /// read timeout. When that fails the connection is aborted and the
    /// timeout becomes fatal. Timeouts are returned as
    /// [`Error::Timeout`]; other triggers are swallowed after recovery.
    pub async fn handle_timeout_or_thread_abort(&mut self, error: Error) -> Result<()> {
        if self.settings.is_kill_query() {
            self.abort().await;
            return if error.is_timeout() {
                Err(Error::Timeout { fatal: true })
            } else {
                Ok(())
            };
        }

        let recovered = self.recover_after_cancel().await;
        let fatal = match recovered {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(
                    thread = ?self.server_thread,
                    error = %e,
                    "could not kill query, aborting connection"
                );
                self.abort().await;
                true
            }
        };
        if error.is_timeout() {
            Err(Error::Timeout { fatal })
        } else {
            Ok(())
        }
    }

    async fn recover_after_cancel(&mut self) -> Result<()> {
        self.cancel_query(CANCEL_TIMEOUT_SECS).await?;
        let shared = self.shared()?;
        let mut session = shared.lock().await;
        session.set_read_timeout(Some(Duration::from_secs(u64::from(CANCEL_TIMEOUT_SECS))));
        match session.drain_pending().await {
            // The interrupted statement ends with an error.
            Ok(()) | Err(Error::Server { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fail(&mut self, error: Error) -> Error {
        if error.is_timeout() {
            return match self.handle_timeout_or_thread_abort(error).await {
                Err(e) => e,
                Ok(()) => Error::Cancelled,
            };
        }
        if error.is_fatal() {
            self.abort().await;
        }
        error
    }

    /// Database in use: the last one switched to, else the server's.
    pub async fn current_database(&mut self) -> Result<String> {
        if let Some(database) = self.database.clone().filter(|d| !d.is_empty()) {
            return Ok(database);
        }
        let rows = self.query_all("SELECT DATABASE()", &[]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.try_get::<String>(0))
            .unwrap_or_default())
    }

    /// Switch the default database.
    pub async fn change_database(&mut self, database: &str) -> Result<()> {
        if database.trim().is_empty() {
            return Err(Error::InvalidArgument("database name must not be empty".into()));
        }
        self.ensure_open()?;
        let shared = self.shared()?;
        let seconds = self.settings.default_command_timeout;
        let timer = CommandTimer::start(self, seconds);
        // Held for the whole switch so an enlistment completion cannot
        // interleave its rollback.
        let switched = shared.lock().await.set_database(database).await;
        timer.finish(self);
        switched?;
        self.database = Some(database.to_string());
        Ok(())
    }

    /// Begin a local transaction.
    pub async fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
        scope: TransactionScope,
    ) -> Result<Transaction<'_>> {
        self.ensure_open()?;
        if self.shared()?.lock().await.in_transaction() {
            return Err(Error::NotSupported("nested transactions are not supported".into()));
        }
        let statement = isolation_statement(isolation, scope)?;
        tracing::debug!(
            name = span_names::BEGIN_TRANSACTION,
            isolation = ?isolation,
            "beginning transaction"
        );
        self.execute(&statement, &[]).await?;
        self.execute("BEGIN", &[]).await?;
        Ok(Transaction::new(self, isolation))
    }

    fn begin_command(&mut self) -> Result<(SharedSession, CommandTimer)> {
        self.ensure_open()?;
        let shared = self.shared()?;
        let seconds = self.settings.default_command_timeout;
        Ok((shared, CommandTimer::start(self, seconds)))
    }

    async fn end_command<T>(&mut self, timer: CommandTimer, outcome: Result<T>) -> Result<T> {
        let outcome = match outcome {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e).await),
        };
        timer.finish(self);
        outcome
    }

    /// Run a statement and discard its rows.
    pub async fn execute(&mut self, sql: &str, args: &[Any]) -> Result<ResultSummary> {
        let span = tracing::debug_span!(span_names::EXECUTE, db.system = DB_SYSTEM);
        async {
            let (shared, timer) = self.begin_command()?;
            let outcome = shared.lock().await.execute(sql, args).await;
            drop(shared);
            self.end_command(timer, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn stream(&mut self) -> Result<ResultStream<'_>> {
        let shared = self.session.as_ref().ok_or_else(Error::not_open)?;
        Ok(ResultStream::new(Box::new(shared.lock().await)))
    }

    /// Run a statement and stream its rows.
    pub async fn query(&mut self, sql: &str, args: &[Any]) -> Result<ResultStream<'_>> {
        let span = tracing::debug_span!(span_names::QUERY, db.system = DB_SYSTEM);
        async {
            let (shared, timer) = self.begin_command()?;
            let outcome = shared.lock().await.begin_sql(sql, args).await;
            drop(shared);
            self.end_command(timer, outcome).await
        }
        .instrument(span)
        .await?;
        self.stream().await
    }

    /// Run a statement and buffer the rows of its first result set.
    pub async fn query_all(&mut self, sql: &str, args: &[Any]) -> Result<Vec<Row>> {
        let mut stream = self.query(sql, args).await?;
        let rows = stream.collect_rows().await?;
        stream.close().await?;
        Ok(rows)
    }

    /// Read from a collection or table.
    pub async fn find(&mut self, find: &Find) -> Result<ResultStream<'_>> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.begin_find(find).await;
        drop(shared);
        self.end_command(timer, outcome).await?;
        self.stream().await
    }

    /// Insert rows.
    pub async fn insert(&mut self, insert: &Insert) -> Result<ResultSummary> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.insert(insert).await;
        drop(shared);
        self.end_command(timer, outcome).await
    }

    /// Update rows.
    pub async fn update(&mut self, update: &Update) -> Result<ResultSummary> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.update(update).await;
        drop(shared);
        self.end_command(timer, outcome).await
    }

    /// Delete rows.
    pub async fn delete(&mut self, delete: &Delete) -> Result<ResultSummary> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.delete(delete).await;
        drop(shared);
        self.end_command(timer, outcome).await
    }

    /// Prepare `message` on the server.
    pub async fn prepare(&mut self, message: PreparableMessage) -> Result<PreparedStatement> {
        self.next_statement_id = self.next_statement_id.wrapping_add(1);
        let statement = PreparedStatement::new(self.next_statement_id, message)?;
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.prepare(&statement).await;
        drop(shared);
        self.end_command(timer, outcome).await?;
        Ok(statement)
    }

    /// Execute a prepared statement with positional `args`.
    pub async fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        args: &[Any],
    ) -> Result<ResultStream<'_>> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.begin_prepared(statement, args).await;
        drop(shared);
        self.end_command(timer, outcome).await?;
        self.stream().await
    }

    /// Release a prepared statement.
    pub async fn deallocate(&mut self, statement: &PreparedStatement) -> Result<()> {
        let (shared, timer) = self.begin_command()?;
        let outcome = shared.lock().await.deallocate(statement).await;
        drop(shared);
        self.end_command(timer, outcome).await
    }

    /// Metadata of a stored routine, cached per connection or per pool.
    ///
    /// `cache_key` is the key returned by an earlier lookup.
    pub async fn get_procedure(
        &mut self,
        name: &str,
        cache_key: Option<&str>,
    ) -> Result<ProcedureLookup> {
        self.ensure_open()?;
        let cache = self.procedure_cache.clone().ok_or_else(Error::not_open)?;
        let shared = self.shared()?;
        let mut session = shared.lock().await;
        let mut source = SchemaSource::new(self.env.schema.as_ref(), &mut session);
        cache
            .get_procedure(&mut source, name, cache_key, self.settings.logging)
            .await
    }

    /// A schema collection such as `databases` or `procedures`.
    pub async fn schema_collection(
        &mut self,
        name: &str,
        restrictions: &[Option<String>],
    ) -> Result<SchemaTable> {
        self.ensure_open()?;
        let shared = self.shared()?;
        let mut session = shared.lock().await;
        self.env
            .schema
            .schema_collection(&mut session, name, restrictions)
            .await
    }

    /// Close the idle sessions of the pool for `settings`.
    pub async fn clear_pool(env: &Environment, settings: &Config) {
        env.clear_pool(settings).await;
    }

    /// Close the idle sessions of every pool.
    pub async fn clear_all_pools(env: &Environment) {
        env.clear_all_pools().await;
    }

    /// [`open`](Self::open), unless `token` has already fired.
    ///
    /// The token is checked once before starting; an open in progress is
    /// not interrupted.
    pub async fn open_with_cancel(&mut self, token: &CancellationToken) -> Result<()> {
        cancel::check(token)?;
        self.open().await
    }

    /// [`ping`](Self::ping), unless `token` has already fired.
    ///
    /// The token is checked once before starting.
    pub async fn ping_with_cancel(&mut self, token: &CancellationToken) -> Result<bool> {
        cancel::check(token)?;
        Ok(self.ping().await)
    }

    /// [`change_database`](Self::change_database), unless `token` has
    /// already fired.
    ///
    /// The token is checked once before starting.
    pub async fn change_database_with_cancel(
        &mut self,
        database: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        cancel::check(token)?;
        self.change_database(database).await
    }

    /// [`execute`](Self::execute), unless `token` has already fired.
    ///
    /// The token is checked once before starting; a statement in flight
    /// runs to completion.
    pub async fn execute_with_cancel(
        &mut self,
        sql: &str,
        args: &[Any],
        token: &CancellationToken,
    ) -> Result<ResultSummary> {
        cancel::check(token)?;
        self.execute(sql, args).await
    }

    /// [`query`](Self::query), unless `token` has already fired.
    ///
    /// The token is checked once before starting.
    pub async fn query_with_cancel(
        &mut self,
        sql: &str,
        args: &[Any],
        token: &CancellationToken,
    ) -> Result<ResultStream<'_>> {
        cancel::check(token)?;
        self.query(sql, args).await
    }
}

impl CommandDeadline for Connection {
    fn set_command_timeout(&mut self, seconds: u32) -> bool {
        if !self.has_been_open || self.command_timeout != 0 {
            return false;
        }
        let Some(shared) = &self.session else {
            return false;
        };
        let Ok(mut session) = shared.try_lock() else {
            return false;
        };
        session.set_read_timeout(
            (seconds > 0).then(|| Duration::from_secs(u64::from(seconds))),
        );
        self.command_timeout = seconds;
        true
    }

    fn clear_command_timeout(&mut self) {
        if !self.has_been_open {
            return;
        }
        self.command_timeout = 0;
        if let Some(shared) = &self.session {
            if let Ok(mut session) = shared.try_lock() {
                session.set_read_timeout(self.settings.command_timeout());
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(shared) = self.session.take() else {
            return;
        };
        if let Some(tx) = self.enlisted.take() {
            self.env.enlistments.set_active(&tx, false);
            return;
        }
        let pool = self.pool.take();
        let tunnel = self.tunnel.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = release_session(shared, pool).await {
                        tracing::debug!(error = %e, "releasing dropped connection failed");
                    }
                    if let Some(mut tunnel) = tunnel {
                        if let Err(e) = tunnel.close().await {
                            tracing::debug!(error = %e, "closing ssh tunnel failed");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!("connection dropped outside a runtime; session abandoned");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("thread", &self.server_thread)
            .field("pooled", &self.pool.is_some())
            .field("enlisted", &self.enlisted)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_on_closed_is_noop() {
        let mut conn = Environment::new().connection(Config::new());
        let seen = Arc::new(parking_lot::Mutex::new(0));
        let sink = seen.clone();
        conn.subscribe(move |_| *sink.lock() += 1);
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test]
    async fn test_operations_need_open() {
        let mut conn = Environment::new().connection(Config::new());
        assert!(matches!(
            conn.execute("SELECT 1", &[]).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            conn.change_database("").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            conn.change_database("shop").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            conn.begin_transaction(IsolationLevel::Chaos, TransactionScope::Next)
                .await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_command_timeout_needs_open() {
        let mut conn = Environment::new().connection(Config::new());
        assert!(!conn.set_command_timeout(10));
        assert_eq!(conn.command_timeout(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let mut conn = Environment::new().connection(Config::new());
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            conn.open_with_cancel(&token).await,
            Err(Error::Cancelled)
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_connection_string_hides_secrets_after_open() {
        let mut conn = Environment::new().connection(Config::new().password("pw"));
        assert!(conn.connection_string().contains("password=pw"));
        conn.has_been_open = true;
        assert!(!conn.connection_string().contains("password"));
    }
}
