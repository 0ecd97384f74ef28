//! Physical sessions.
//!
//! A [`Session`] is one authenticated X Protocol connection. It is owned by
//! exactly one logical connection while in use and handed to the pool
//! between uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mycat_auth::AuthMethod;
use mycat_codec::PacketTransport;
use mycat_protocol::classic::ServerStatus;
use mycat_protocol::crud::{Delete, Find, Insert, StmtExecute, Update};
use mycat_protocol::prepare::{Deallocate, Prepare};
use mycat_protocol::session::Capability;
use mycat_protocol::{Any, ClientMessage};

use crate::config::{AuthMode, Config};
use crate::error::{Error, Result};
use crate::hooks::HookPipeline;
use crate::instrumentation::extract_operation;
use crate::protocol::XProtocol;
use crate::result::{ResultState, ResultStream, ResultSummary};
use crate::row::Row;
use crate::statement::PreparedStatement;

/// A session shared between a logical connection and the enlistment
/// registry.
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Mechanisms tried, in order, when no mechanism is configured.
#[must_use]
pub fn default_mechanisms(tls_active: bool) -> &'static [AuthMethod] {
    if tls_active {
        &[AuthMethod::Plain]
    } else {
        &[AuthMethod::Sha256Memory, AuthMethod::MySql41]
    }
}

/// One authenticated connection to the server.
pub struct Session {
    driver_id: u64,
    protocol: XProtocol,
    settings: Config,
    status: ServerStatus,
    hooks: HookPipeline,
    created_at: Instant,
    open: bool,
}

impl Session {
    /// Run the handshake over `transport` and return the open session.
    pub async fn connect(
        driver_id: u64,
        transport: Box<dyn PacketTransport>,
        settings: &Config,
    ) -> Result<Self> {
        Self::connect_with_hooks(
            driver_id,
            transport,
            settings,
            HookPipeline::from_config(settings),
        )
        .await
    }

    /// Like [`connect`](Self::connect) with an explicit hook pipeline.
    pub async fn connect_with_hooks(
        driver_id: u64,
        transport: Box<dyn PacketTransport>,
        settings: &Config,
        hooks: HookPipeline,
    ) -> Result<Self> {
        if settings.ssl_mode.requires_tls() {
            return Err(Error::NotSupported(format!(
                "ssl mode {:?} requires a TLS transport",
                settings.ssl_mode
            )));
        }

        let mut session = Self {
            driver_id,
            protocol: XProtocol::new(transport),
            settings: settings.clone(),
            status: ServerStatus::AUTO_COMMIT,
            hooks,
            created_at: Instant::now(),
            open: false,
        };
        session.protocol.set_read_timeout(settings.connect_timeout());

        let capabilities = session.protocol.get_capabilities().await?;
        tracing::debug!(
            driver_id,
            count = capabilities.capabilities.len(),
            "server capabilities received"
        );
        session
            .protocol
            .set_capabilities(vec![connect_attributes()])
            .await?;
        session.authenticate().await?;

        session.protocol.set_read_timeout(settings.command_timeout());
        session.open = true;
        tracing::info!(
            driver_id,
            thread = ?session.server_thread(),
            password_expired = session.password_expired(),
            "session established"
        );
        session.hooks.on_open(driver_id, &session.settings);
        Ok(session)
    }

    async fn authenticate(&mut self) -> Result<()> {
        let credentials = self.settings.credentials();
        let candidates: &[AuthMethod] = match &self.settings.auth {
            AuthMode::Method(method) => std::slice::from_ref(method),
            // No TLS transport is wired, so PLAIN is never picked implicitly.
            AuthMode::Default => default_mechanisms(false),
        };

        let mut last_error = None;
        for method in candidates {
            let mut mechanism = method.create(&credentials);
            match self.protocol.authenticate(mechanism.as_mut()).await {
                Ok(()) => return Ok(()),
                Err(Error::Authentication(e)) if e.is_rejection() => {
                    tracing::debug!(
                        driver_id = self.driver_id,
                        mechanism = method.name(),
                        error = %e,
                        "authentication rejected"
                    );
                    last_error = Some(Error::Authentication(e));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::Config("no authentication mechanism configured".into())
        }))
    }

    /// Post-handshake configuration.
    pub async fn configure(&mut self) -> Result<()> {
        if self.password_expired() {
            return Ok(());
        }
        if let Some(charset) = self.settings.character_set.clone() {
            self.execute(&format!("SET NAMES {charset}"), &[]).await?;
        }
        Ok(())
    }

    /// Driver-assigned id.
    #[must_use]
    pub fn driver_id(&self) -> u64 {
        self.driver_id
    }

    /// Settings the session was opened with.
    #[must_use]
    pub fn settings(&self) -> &Config {
        &self.settings
    }

    /// Server thread id.
    #[must_use]
    pub fn server_thread(&self) -> Option<u64> {
        self.protocol.notices().client_id
    }

    /// Whether the server reported an expired password.
    #[must_use]
    pub fn password_expired(&self) -> bool {
        self.protocol.notices().password_expired
    }

    /// Forget the expired-password flag.
    pub fn clear_password_expired(&mut self) {
        self.protocol.notices_mut().password_expired = false;
    }

    /// Current default schema, as last reported by the server.
    #[must_use]
    pub fn current_schema(&self) -> Option<&str> {
        self.protocol.notices().current_schema.as_deref()
    }

    /// Status flags.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Whether a server-side transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.status.contains(ServerStatus::IN_TRANSACTION)
    }

    /// Whether the session can still be used.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// When the session was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Hooks installed on this session.
    #[must_use]
    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    /// Protocol engine.
    #[must_use]
    pub fn protocol(&self) -> &XProtocol {
        &self.protocol
    }

    /// Mutable protocol engine.
    pub fn protocol_mut(&mut self) -> &mut XProtocol {
        &mut self.protocol
    }

    /// Read deadline for every server reply.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.protocol.set_read_timeout(timeout);
    }

    /// Current read deadline.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.protocol.read_timeout()
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(driver_id = self.driver_id, error = %e, "session broken");
                self.open = false;
            }
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::InvalidState("session is closed".into()))
        }
    }

    fn sync_status(&mut self) {
        let notices = self.protocol.notices_mut();
        if std::mem::take(&mut notices.transaction_ended) {
            self.status.remove(ServerStatus::IN_TRANSACTION);
        }
    }

    fn note_statement(&mut self, sql: &str) {
        match extract_operation(sql) {
            "BEGIN" => self.status.insert(ServerStatus::IN_TRANSACTION),
            "COMMIT" | "ROLLBACK" => self.status.remove(ServerStatus::IN_TRANSACTION),
            _ => {}
        }
    }

    fn report_closed(&mut self, state: ResultState) -> ResultSummary {
        self.sync_status();
        let summary = state.into_summary(self.status);
        self.hooks.on_result_closed(self.driver_id, &summary);
        summary
    }

    /// Drain a result left open by an earlier command.
    pub async fn drain_pending(&mut self) -> Result<()> {
        if self.protocol.result().is_some() {
            self.finish_result().await?;
        }
        Ok(())
    }

    async fn start<M: ClientMessage>(&mut self, message: &M, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.drain_pending().await?;
        self.hooks.on_query(self.driver_id, text);
        let started = self.protocol.start_result(message).await;
        self.track(started)?;
        let columns = self.protocol.result().map_or(0, |r| r.columns().len());
        self.hooks.on_result(self.driver_id, columns);
        Ok(())
    }

    pub(crate) async fn next_row(&mut self) -> Result<Option<Row>> {
        let read = self.protocol.read_row().await;
        let Some(values) = self.track(read)? else {
            return Ok(None);
        };
        let result = self
            .protocol
            .result()
            .ok_or_else(|| Error::InvalidState("no active result".into()))?;
        Ok(Some(Row::new(
            result.columns.clone(),
            values,
            result.usage.clone(),
        )))
    }

    pub(crate) async fn next_result(&mut self) -> Result<bool> {
        if self.protocol.result().is_none() {
            return Ok(false);
        }
        let drained = self.protocol.drain_result().await;
        self.track(drained)?;
        let next = self.protocol.begin_next_result().await;
        match self.track(next)? {
            Some(previous) => {
                self.report_closed(previous);
                let columns = self.protocol.result().map_or(0, |r| r.columns().len());
                self.hooks.on_result(self.driver_id, columns);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Skip whatever is left of the current statement and summarize it.
    pub(crate) async fn finish_result(&mut self) -> Result<ResultSummary> {
        if self.protocol.result().is_none() {
            return Ok(ResultSummary::default());
        }
        loop {
            let drained = self.protocol.drain_result().await;
            self.track(drained)?;
            let next = self.protocol.begin_next_result().await;
            match self.track(next)? {
                Some(previous) => {
                    self.report_closed(previous);
                }
                None => break,
            }
        }
        let summary = match self.protocol.take_result() {
            Some(state) => self.report_closed(state),
            None => ResultSummary::default(),
        };
        self.hooks.on_query_closed(self.driver_id);
        Ok(summary)
    }

    /// Run a statement and discard its rows.
    pub async fn execute(&mut self, sql: &str, args: &[Any]) -> Result<ResultSummary> {
        self.start(&StmtExecute::sql(sql, args.to_vec()), sql).await?;
        let summary = self.finish_result().await?;
        self.note_statement(sql);
        Ok(summary)
    }

    pub(crate) async fn begin_sql(&mut self, sql: &str, args: &[Any]) -> Result<()> {
        self.start(&StmtExecute::sql(sql, args.to_vec()), sql).await
    }

    pub(crate) async fn begin_find(&mut self, find: &Find) -> Result<()> {
        self.start(find, "crud find").await
    }

    pub(crate) async fn begin_prepared(
        &mut self,
        statement: &PreparedStatement,
        args: &[Any],
    ) -> Result<()> {
        self.start(&statement.execute(args), "prepared execute").await?;
        self.hooks
            .on_statement_executed(self.driver_id, statement.id());
        Ok(())
    }

    /// Run a statement and stream its rows.
    pub async fn query(&mut self, sql: &str, args: &[Any]) -> Result<ResultStream<'_>> {
        self.begin_sql(sql, args).await?;
        Ok(ResultStream::new(Box::new(self)))
    }

    /// Run a statement and buffer its first result set.
    pub async fn query_all(&mut self, sql: &str, args: &[Any]) -> Result<Vec<Row>> {
        let mut stream = self.query(sql, args).await?;
        let rows = stream.collect_rows().await?;
        stream.close().await?;
        Ok(rows)
    }

    /// Check that the server answers.
    pub async fn ping(&mut self) -> Result<()> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }

    /// Switch the default schema.
    pub async fn set_database(&mut self, database: &str) -> Result<()> {
        self.execute(&format!("USE {}", quote_identifier(database)), &[])
            .await?;
        self.protocol.notices_mut().current_schema = Some(database.to_string());
        self.hooks.on_set_database(self.driver_id, database);
        Ok(())
    }

    /// Roll back if a server-side transaction is open.
    pub async fn rollback_if_in_transaction(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.execute("ROLLBACK", &[]).await?;
        }
        Ok(())
    }

    /// Kill the statement running on `thread_id`.
    pub async fn kill_query(&mut self, thread_id: u64) -> Result<()> {
        self.execute(&format!("KILL QUERY {thread_id}"), &[])
            .await
            .map(|_| ())
    }

    /// Reset session state on the server.
    pub async fn reset(&mut self, keep_open: bool) -> Result<()> {
        self.ensure_open()?;
        self.drain_pending().await?;
        let reset = self.protocol.reset_session(keep_open).await;
        self.track(reset)?;
        self.status = ServerStatus::AUTO_COMMIT;
        Ok(())
    }

    /// Close the connection politely.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return self.protocol.shutdown().await;
        }
        self.open = false;
        let closed = self.protocol.close_connection().await;
        self.hooks.on_close(self.driver_id);
        closed
    }

    /// Drop the connection without telling the server.
    pub async fn abort(&mut self) -> Result<()> {
        let was_open = std::mem::replace(&mut self.open, false);
        let result = self.protocol.shutdown().await;
        if was_open {
            self.hooks.on_close(self.driver_id);
        }
        result
    }

    /// Read rows from a collection or table.
    pub async fn find(&mut self, find: &Find) -> Result<ResultStream<'_>> {
        self.begin_find(find).await?;
        Ok(ResultStream::new(Box::new(self)))
    }

    /// Insert rows.
    pub async fn insert(&mut self, insert: &Insert) -> Result<ResultSummary> {
        self.start(insert, "crud insert").await?;
        self.finish_result().await
    }

    /// Update rows.
    pub async fn update(&mut self, update: &Update) -> Result<ResultSummary> {
        self.start(update, "crud update").await?;
        self.finish_result().await
    }

    /// Delete rows.
    pub async fn delete(&mut self, delete: &Delete) -> Result<ResultSummary> {
        self.start(delete, "crud delete").await?;
        self.finish_result().await
    }

    /// Prepare a statement on the server.
    pub async fn prepare(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.ensure_open()?;
        self.drain_pending().await?;
        let sent = self
            .protocol
            .send(&Prepare {
                stmt_id: statement.id(),
                stmt: statement.template().clone(),
            })
            .await;
        self.track(sent)?;
        let ok = self.protocol.read_ok().await;
        self.track(ok)?;
        self.hooks
            .on_statement_prepared(self.driver_id, statement.id());
        Ok(())
    }

    /// Execute a prepared statement and stream its result.
    pub async fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        args: &[Any],
    ) -> Result<ResultStream<'_>> {
        self.begin_prepared(statement, args).await?;
        Ok(ResultStream::new(Box::new(self)))
    }

    /// Release a prepared statement.
    pub async fn deallocate(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.ensure_open()?;
        self.drain_pending().await?;
        let sent = self
            .protocol
            .send(&Deallocate {
                stmt_id: statement.id(),
            })
            .await;
        self.track(sent)?;
        let ok = self.protocol.read_ok().await;
        self.track(ok)?;
        self.hooks.on_statement_closed(self.driver_id, statement.id());
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("driver_id", &self.driver_id)
            .field("thread", &self.server_thread())
            .field("open", &self.open)
            .field("status", &self.status)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Connection attributes announced after the handshake starts.
fn connect_attributes() -> Capability {
    Capability {
        name: "session_connect_attrs".into(),
        value: Any::object([
            ("_client_name", Any::from("mycat-driver")),
            ("_client_version", Any::from(env!("CARGO_PKG_VERSION"))),
            ("_os", Any::from(std::env::consts::OS)),
            ("_pid", Any::from(u64::from(std::process::id()))),
        ]),
    }
}

/// Back-quote an identifier, doubling embedded back quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use mycat_protocol::notice::StateParam;
    use mycat_protocol::resultset::{FetchDone, StmtExecuteOk};
    use mycat_protocol::session::{AuthenticateContinue, AuthenticateOk, Capabilities};
    use mycat_codec::Packet;

    use super::*;
    use crate::protocol::tests::{Script, column, error, ok, row, state};

    fn handshake() -> Vec<Packet> {
        vec![
            Packet::from_server(&Capabilities::default()),
            ok(None),
            Packet::from_server(&AuthenticateContinue {
                auth_data: Bytes::from_static(b"01234567890123456789"),
            }),
            state(StateParam::ClientIdAssigned, 42u64),
            Packet::from_server(&AuthenticateOk::default()),
        ]
    }

    fn done() -> Vec<Packet> {
        vec![Packet::from_server(&FetchDone), Packet::from_server(&StmtExecuteOk)]
    }

    async fn open(mut replies: Vec<Packet>) -> (Session, Script) {
        let mut all = handshake();
        all.append(&mut replies);
        let script = Script::new(all);
        let settings = Config::new().user("root").password("pw");
        let session = Session::connect(1, Box::new(script.clone()), &settings)
            .await
            .unwrap();
        (session, script)
    }

    #[test]
    fn test_default_mechanisms() {
        assert_eq!(default_mechanisms(true), &[AuthMethod::Plain]);
        assert_eq!(
            default_mechanisms(false),
            &[AuthMethod::Sha256Memory, AuthMethod::MySql41]
        );
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("db"), "`db`");
        assert_eq!(quote_identifier("a`b"), "`a``b`");
    }

    #[tokio::test]
    async fn test_connect_records_thread() {
        let (session, script) = open(vec![]).await;
        assert!(session.is_open());
        assert_eq!(session.server_thread(), Some(42));
        let written = script.written.lock();
        // capabilities get, capabilities set, auth start, auth continue
        assert_eq!(
            written.iter().map(|p| p.message_type).collect::<Vec<_>>(),
            vec![1, 2, 4, 5]
        );
    }

    #[tokio::test]
    async fn test_default_auth_falls_back_to_mysql41() {
        let mut replies = vec![
            Packet::from_server(&Capabilities::default()),
            ok(None),
            Packet::from_server(&AuthenticateContinue {
                auth_data: Bytes::from_static(b"01234567890123456789"),
            }),
            error(1045),
        ];
        replies.extend(handshake().into_iter().skip(2));
        let script = Script::new(replies);
        let session = Session::connect(1, Box::new(script.clone()), &Config::new())
            .await
            .unwrap();
        assert!(session.is_open());

        let starts: Vec<_> = script
            .written
            .lock()
            .iter()
            .filter(|p| p.message_type == 4)
            .map(|p| p.payload.clone())
            .collect();
        assert_eq!(starts.len(), 2);
    }

    #[tokio::test]
    async fn test_tls_required_not_supported() {
        let script = Script::new(vec![]);
        let settings = Config::new().ssl_mode(crate::config::SslMode::Required);
        let err = Session::connect(1, Box::new(script.clone()), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
        assert!(script.written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_query_drains_abandoned_result() {
        let mut replies = vec![column("n"), row(1), row(2)];
        replies.extend(done());
        replies.extend([column("n"), row(3)]);
        replies.extend(done());
        let (mut session, _) = open(replies).await;

        {
            let mut stream = session.query("SELECT n FROM t", &[]).await.unwrap();
            let first = stream.next_row().await.unwrap().unwrap();
            assert_eq!(first.get::<i64>(0).unwrap(), 1);
        }

        let rows = session.query_all("SELECT 3", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>(0).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transaction_marker() {
        let mut replies = done();
        replies.push(state(StateParam::TrxCommitted, true));
        replies.extend(done());
        let (mut session, _) = open(replies).await;
        session.execute("BEGIN", &[]).await.unwrap();
        assert!(session.in_transaction());
        session.execute("DO 1", &[]).await.unwrap();
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_fatal_error_closes_session() {
        let (mut session, _) = open(vec![]).await;
        let err = session.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!session.is_open());
        assert!(matches!(
            session.execute("SELECT 1", &[]).await,
            Err(Error::InvalidState(_))
        ));
    }
}
