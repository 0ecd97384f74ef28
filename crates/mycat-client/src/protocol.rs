//! X Protocol engine.
//!
//! Sits on top of a [`PacketTransport`] and implements the message
//! discipline every exchange shares:
//!
//! - a one-packet lookahead so callers can [`peek`](XProtocol::peek) without
//!   consuming;
//! - notices are dispatched wherever they appear;
//! - an `ERROR` where anything else was expected fails the exchange with
//!   [`Error::Server`];
//! - any other unexpected type is a [`Error::ProtocolViolation`].

use std::time::Duration;

use bytes::Bytes;
use mycat_auth::{AuthError, AuthMechanism};
use mycat_codec::{Packet, PacketTransport};
use mycat_protocol::notice::{
    Frame, NoticeScope, NoticeType, SessionStateChanged, StateParam, Warning, WarningLevel,
};
use mycat_protocol::resultset::{ColumnMetaData, Row};
use mycat_protocol::session::{
    AuthenticateContinue, AuthenticateOk, AuthenticateStart, Capabilities, CapabilitiesGet,
    CapabilitiesSet, Capability, ConnectionClose, ExpectClose, ExpectOpen, OkMessage, Reset,
    ServerError, SessionClose,
};
use mycat_protocol::{
    ClientMessage, Decode, LEGACY_PROTOCOL_MARKER, Scalar, ServerMessage, ServerMessageType,
};

use crate::error::{Error, Result};
use crate::result::ResultState;
use crate::row::Column;

/// Capability names the client may set.
pub const SETTABLE_CAPABILITIES: [&str; 3] = ["tls", "session_connect_attrs", "compression"];

/// Session-level state reported through notices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionNotices {
    /// Server-assigned client (thread) id.
    pub client_id: Option<u64>,
    /// The account password has expired.
    pub password_expired: bool,
    /// Current default schema.
    pub current_schema: Option<String>,
    /// A transaction was committed or rolled back since this was last cleared.
    pub transaction_ended: bool,
}

/// Protocol engine for one physical connection.
pub struct XProtocol {
    transport: Box<dyn PacketTransport>,
    pending: Option<Packet>,
    read_timeout: Option<Duration>,
    notices: SessionNotices,
    result: Option<ResultState>,
}

impl XProtocol {
    /// Wrap a transport.
    pub fn new(transport: Box<dyn PacketTransport>) -> Self {
        Self {
            transport,
            pending: None,
            read_timeout: None,
            notices: SessionNotices::default(),
            result: None,
        }
    }

    /// Deadline applied to every read from the transport.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Current read deadline.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Session-level notice state.
    #[must_use]
    pub fn notices(&self) -> &SessionNotices {
        &self.notices
    }

    pub(crate) fn notices_mut(&mut self) -> &mut SessionNotices {
        &mut self.notices
    }

    /// Result currently being read, if any.
    #[must_use]
    pub fn result(&self) -> Option<&ResultState> {
        self.result.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn result_mut(&mut self) -> Option<&mut ResultState> {
        self.result.as_mut()
    }

    /// Hand over the current result, open or not.
    pub(crate) fn take_result(&mut self) -> Option<ResultState> {
        self.result.take()
    }

    /// Whether a result is open on the wire.
    #[must_use]
    pub fn has_open_result(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.closed)
    }

    async fn fetch(&mut self) -> Result<Packet> {
        let packet = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.read_packet())
                .await
                .map_err(|_| Error::Timeout { fatal: false })??,
            None => self.transport.read_packet().await?,
        };
        tracing::trace!(
            message_type = packet.message_type,
            len = packet.payload.len(),
            "received message"
        );
        Ok(packet)
    }

    /// Look at the next packet without consuming it.
    pub async fn peek(&mut self) -> Result<&Packet> {
        if self.pending.is_none() {
            let packet = self.fetch().await?;
            self.pending = Some(packet);
        }
        self.pending
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("lookahead packet missing".into()))
    }

    /// Consume the next packet.
    pub async fn read(&mut self) -> Result<Packet> {
        match self.pending.take() {
            Some(packet) => Ok(packet),
            None => self.fetch().await,
        }
    }

    /// Send a client message.
    pub async fn send<M: ClientMessage>(&mut self, message: &M) -> Result<()> {
        tracing::trace!(message_type = ?M::TYPE, "sending message");
        self.transport
            .write_packet(Packet::from_client(message))
            .await?;
        Ok(())
    }

    /// Classify a packet that is not the one the caller wanted.
    ///
    /// Notices are dispatched and `Ok` is returned so the caller keeps
    /// reading; everything else is turned into the matching error.
    fn handle_unexpected(&mut self, packet: Packet, expected: &str) -> Result<()> {
        match ServerMessageType::from_u8(packet.message_type) {
            Ok(ServerMessageType::Notice) => self.dispatch_notice(&packet),
            Ok(ServerMessageType::Error) => Err(packet.decode::<ServerError>()?.into()),
            _ if packet.message_type == LEGACY_PROTOCOL_MARKER => Err(Error::NotSupported(
                "unsupported protocol version: server answered with the legacy protocol".into(),
            )),
            _ => Err(Error::violation(expected, packet.message_type)),
        }
    }

    /// Read until a message of type `M` arrives.
    pub async fn read_expected<M: ServerMessage>(&mut self) -> Result<M> {
        loop {
            let packet = self.read().await?;
            if packet.message_type == M::TYPE as u8 {
                return Ok(packet.decode::<M>()?);
            }
            self.handle_unexpected(packet, &format!("{:?}", M::TYPE))?;
        }
    }

    /// Read until an OK arrives.
    pub async fn read_ok(&mut self) -> Result<OkMessage> {
        self.read_expected::<OkMessage>().await
    }

    /// Apply a notice to the session and the active result.
    pub fn dispatch_notice(&mut self, packet: &Packet) -> Result<()> {
        let frame: Frame = packet.decode()?;
        if frame.scope == NoticeScope::Global {
            tracing::trace!(frame_type = frame.frame_type, "global notice ignored");
            return Ok(());
        }

        match frame.notice_type() {
            Some(NoticeType::Warning) => {
                let warning = Warning::decode_exact(frame.payload)?;
                tracing::debug!(code = warning.code, msg = %warning.msg, "server warning");
                match &mut self.result {
                    Some(result) => result.warnings.push(warning),
                    None => tracing::debug!("warning outside of a result dropped"),
                }
            }
            Some(NoticeType::SessionStateChanged) => {
                let change = SessionStateChanged::decode_exact(frame.payload)?;
                self.apply_state_change(change);
            }
            Some(NoticeType::SessionVariableChanged) | None => {
                tracing::trace!(frame_type = frame.frame_type, "notice ignored");
            }
        }
        Ok(())
    }

    fn apply_state_change(&mut self, change: SessionStateChanged) {
        match change.param {
            StateParam::ClientIdAssigned => self.notices.client_id = change.first_u64(),
            StateParam::AccountExpired => self.notices.password_expired = true,
            StateParam::CurrentSchema => self.notices.current_schema = change.first_string(),
            StateParam::TrxCommitted | StateParam::TrxRolledback => {
                self.notices.transaction_ended = true;
            }
            param => {
                let Some(result) = &mut self.result else {
                    tracing::debug!(?param, "state change outside of a result dropped");
                    return;
                };
                match param {
                    StateParam::RowsAffected => {
                        result.affected_rows = change.first_u64().unwrap_or_default();
                    }
                    StateParam::GeneratedInsertId => result.last_insert_id = change.first_u64(),
                    StateParam::ProducedMessage => result.warnings.push(Warning {
                        level: WarningLevel::Note,
                        code: 0,
                        msg: change.first_string().unwrap_or_default(),
                    }),
                    StateParam::GeneratedDocumentIds => {
                        result
                            .document_ids
                            .extend(change.values.iter().filter_map(|v| match v {
                                Scalar::String(s) => Some(s.clone()),
                                Scalar::Octets(b) => Some(String::from_utf8_lossy(b).into_owned()),
                                _ => None,
                            }));
                    }
                    _ => tracing::trace!(?param, "state change ignored"),
                }
            }
        }
    }

    /// Run the authentication exchange with `mechanism`.
    pub async fn authenticate(&mut self, mechanism: &mut dyn AuthMechanism) -> Result<()> {
        let start = mechanism.start()?;
        tracing::debug!(mechanism = mechanism.name(), "starting authentication");
        self.send(&AuthenticateStart {
            mech_name: mechanism.name().to_string(),
            auth_data: start.auth_data.map(Bytes::from),
            initial_response: start.initial_response.map(Bytes::from),
        })
        .await?;

        loop {
            let packet = self.read().await?;
            match ServerMessageType::from_u8(packet.message_type) {
                Ok(ServerMessageType::AuthenticateContinue) => {
                    let challenge: AuthenticateContinue = packet.decode()?;
                    if let Some(response) = mechanism.next_response(&challenge.auth_data)? {
                        self.send(&AuthenticateContinue {
                            auth_data: Bytes::from(response),
                        })
                        .await?;
                    }
                }
                Ok(ServerMessageType::AuthenticateOk) => {
                    let ok: AuthenticateOk = packet.decode()?;
                    mechanism.complete(ok.auth_data.as_deref())?;
                    tracing::debug!(mechanism = mechanism.name(), "authenticated");
                    return Ok(());
                }
                Ok(ServerMessageType::Error) => {
                    let err: ServerError = packet.decode()?;
                    return Err(AuthError::Rejected {
                        code: err.code,
                        sql_state: err.sql_state,
                        message: err.msg,
                    }
                    .into());
                }
                _ => {
                    self.handle_unexpected(packet, "authentication reply")?;
                }
            }
        }
    }

    /// Ask the server for its capabilities.
    pub async fn get_capabilities(&mut self) -> Result<Capabilities> {
        self.send(&CapabilitiesGet).await?;
        self.read_expected::<Capabilities>().await
    }

    /// Set client capabilities; only `tls`, `session_connect_attrs` and
    /// `compression` are accepted.
    pub async fn set_capabilities(&mut self, capabilities: Vec<Capability>) -> Result<()> {
        if let Some(bad) = capabilities
            .iter()
            .find(|c| !SETTABLE_CAPABILITIES.contains(&c.name.as_str()))
        {
            return Err(Error::InvalidArgument(format!(
                "capability '{}' cannot be set",
                bad.name
            )));
        }
        self.send(&CapabilitiesSet {
            capabilities: Capabilities { capabilities },
        })
        .await?;
        self.read_ok().await?;
        Ok(())
    }

    /// Open an expectation block.
    pub async fn expect_open(&mut self, expect: &ExpectOpen) -> Result<()> {
        self.send(expect).await?;
        self.read_ok().await?;
        Ok(())
    }

    /// Close the innermost expectation block.
    pub async fn expect_close(&mut self) -> Result<()> {
        self.send(&ExpectClose).await?;
        self.read_ok().await?;
        Ok(())
    }

    /// Reset session state.
    pub async fn reset_session(&mut self, keep_open: bool) -> Result<()> {
        self.send(&Reset {
            keep_open: Some(keep_open),
        })
        .await?;
        self.read_ok().await?;
        Ok(())
    }

    /// End the session; the server answers with `bye`.
    pub async fn close_session(&mut self) -> Result<()> {
        self.send(&SessionClose).await?;
        let ok = self.read_ok().await?;
        if ok.msg.as_deref() != Some("bye") {
            tracing::debug!(msg = ?ok.msg, "unexpected session close reply");
        }
        Ok(())
    }

    /// Close the connection and shut the transport down.
    pub async fn close_connection(&mut self) -> Result<()> {
        self.send(&ConnectionClose).await?;
        let ok = self.read_ok().await;
        let shutdown = self.transport.shutdown().await;
        ok?;
        shutdown?;
        Ok(())
    }

    /// Send a message that produces a result and read its column metadata.
    pub async fn start_result<M: ClientMessage>(&mut self, message: &M) -> Result<()> {
        self.send(message).await?;
        self.result = Some(ResultState::new());
        self.read_columns().await
    }

    /// Read the column metadata of the next result set.
    pub(crate) async fn read_columns(&mut self) -> Result<()> {
        let mut columns = Vec::new();
        loop {
            let message_type = self.peek().await?.message_type;
            match ServerMessageType::from_u8(message_type) {
                Ok(ServerMessageType::ColumnMetaData) => {
                    let meta: ColumnMetaData = self.read().await?.decode()?;
                    columns.push(Column::from_metadata(columns.len(), meta));
                }
                Ok(ServerMessageType::Notice) => {
                    let packet = self.read().await?;
                    self.dispatch_notice(&packet)?;
                }
                Ok(ServerMessageType::Error) => {
                    let packet = self.read().await?;
                    self.result = None;
                    return Err(packet.decode::<ServerError>()?.into());
                }
                _ => break,
            }
        }
        if let Some(result) = &mut self.result {
            result.set_columns(columns);
        }
        Ok(())
    }

    /// Read one row, or close the result and return `None` at its end.
    pub async fn read_row(&mut self) -> Result<Option<Vec<Bytes>>> {
        if !self.has_open_result() {
            return Ok(None);
        }
        while self.peek().await?.is::<Frame>() {
            let packet = self.read().await?;
            self.dispatch_notice(&packet)?;
        }
        if !self.peek().await?.is::<Row>() {
            self.close_result().await?;
            return Ok(None);
        }
        let row: Row = self.read().await?.decode()?;
        if let Some(result) = &mut self.result {
            result.rows_read += 1;
        }
        Ok(Some(row.fields))
    }

    /// Drain the rest of the current result set up to its terminal marker.
    pub async fn close_result(&mut self) -> Result<()> {
        if !self.has_open_result() {
            return Ok(());
        }
        loop {
            let packet = self.read().await?;
            let kind = ServerMessageType::from_u8(packet.message_type).ok();
            match kind {
                Some(
                    ServerMessageType::FetchDoneMoreResultsets
                    | ServerMessageType::FetchDoneMoreOutParams,
                ) => {
                    self.mark_closed(|r| r.has_more_results = true);
                    return Ok(());
                }
                Some(ServerMessageType::Ok) => {
                    let ok: OkMessage = packet.decode()?;
                    self.mark_closed(|r| r.message = ok.msg);
                    return Ok(());
                }
                Some(ServerMessageType::StmtExecuteOk) => {
                    self.mark_closed(|_| {});
                    return Ok(());
                }
                Some(ServerMessageType::FetchDone | ServerMessageType::FetchSuspended) => {}
                Some(ServerMessageType::Notice) => self.dispatch_notice(&packet)?,
                Some(ServerMessageType::Error) => {
                    self.result = None;
                    return Err(packet.decode::<ServerError>()?.into());
                }
                _ => {
                    return Err(Error::ProtocolViolation(format!(
                        "unexpected message type {} while throwing away results",
                        packet.message_type
                    )));
                }
            }
        }
    }

    fn mark_closed(&mut self, update: impl FnOnce(&mut ResultState)) {
        if let Some(result) = &mut self.result {
            update(result);
            result.closed = true;
        }
    }

    /// Skip every remaining row and close the result.
    pub async fn drain_result(&mut self) -> Result<()> {
        while self.read_row().await?.is_some() {
            if let Some(result) = &mut self.result {
                result.rows_read -= 1;
                result.rows_skipped += 1;
            }
        }
        Ok(())
    }

    /// Start reading the result set announced by a more-results marker.
    ///
    /// Returns the finished result set it replaces, or `None` when no
    /// further set was announced.
    pub(crate) async fn begin_next_result(&mut self) -> Result<Option<ResultState>> {
        match &self.result {
            Some(r) if r.closed && r.has_more_results => {}
            _ => return Ok(None),
        }
        let previous = self.result.replace(ResultState::new());
        self.read_columns().await?;
        Ok(previous)
    }

    /// Shut the transport down without a goodbye.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.pending = None;
        self.result = None;
        self.transport.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for XProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XProtocol")
            .field("pending", &self.pending.as_ref().map(|p| p.message_type))
            .field("read_timeout", &self.read_timeout)
            .field("notices", &self.notices)
            .field("open_result", &self.has_open_result())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use mycat_auth::{AuthMethod, Credentials, ScramAlgorithm, ScramClient};
    use mycat_codec::CodecError;
    use mycat_protocol::notice::SessionVariableChanged;
    use mycat_protocol::resultset::{
        FetchDone, FetchDoneMoreResultsets, FieldType, StmtExecuteOk, field,
    };
    use mycat_protocol::session::ErrorSeverity;
    use mycat_protocol::{Any, Encode};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;

    /// Scripted peer for engine tests.
    #[derive(Clone, Default)]
    pub(crate) struct Script {
        pub(crate) replies: Arc<Mutex<VecDeque<Packet>>>,
        pub(crate) written: Arc<Mutex<Vec<Packet>>>,
    }

    impl Script {
        pub(crate) fn new(replies: Vec<Packet>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                written: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl PacketTransport for Script {
        async fn read_packet(&mut self) -> std::result::Result<Packet, CodecError> {
            self.replies
                .lock()
                .pop_front()
                .ok_or(CodecError::ConnectionClosed)
        }

        async fn write_packet(&mut self, packet: Packet) -> std::result::Result<(), CodecError> {
            self.written.lock().push(packet);
            Ok(())
        }

        async fn shutdown(&mut self) -> std::result::Result<(), CodecError> {
            Ok(())
        }
    }

    pub(crate) fn notice(kind: NoticeType, payload: &impl Encode) -> Packet {
        Packet::from_server(&Frame::new(kind, NoticeScope::Local, payload))
    }

    pub(crate) fn state(param: StateParam, value: impl Into<Scalar>) -> Packet {
        notice(
            NoticeType::SessionStateChanged,
            &SessionStateChanged::new(param, value),
        )
    }

    pub(crate) fn warning(code: u32, msg: &str) -> Packet {
        notice(
            NoticeType::Warning,
            &Warning {
                level: WarningLevel::Warning,
                code,
                msg: msg.into(),
            },
        )
    }

    pub(crate) fn ok(msg: Option<&str>) -> Packet {
        Packet::from_server(&OkMessage {
            msg: msg.map(String::from),
        })
    }

    pub(crate) fn error(code: u32) -> Packet {
        Packet::from_server(&ServerError {
            severity: ErrorSeverity::Error,
            code,
            sql_state: "HY000".into(),
            msg: "boom".into(),
        })
    }

    pub(crate) fn column(name: &str) -> Packet {
        Packet::from_server(&ColumnMetaData::new(name, FieldType::Sint))
    }

    pub(crate) fn row(value: i64) -> Packet {
        Packet::from_server(&Row {
            fields: vec![field::sint(value)],
        })
    }

    fn engine(replies: Vec<Packet>) -> (XProtocol, Script) {
        let script = Script::new(replies);
        (XProtocol::new(Box::new(script.clone())), script)
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let (mut xp, _) = engine(vec![ok(None), ok(Some("x"))]);
        assert_eq!(xp.peek().await.unwrap().message_type, 0);
        assert_eq!(xp.peek().await.unwrap().payload, ok(None).payload);
        let first = xp.read().await.unwrap();
        assert_eq!(first.payload, ok(None).payload);
        assert_eq!(xp.read_ok().await.unwrap().msg.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_read_expected_dispatches_notices() {
        let (mut xp, _) = engine(vec![
            state(StateParam::ClientIdAssigned, 42u64),
            notice(
                NoticeType::SessionVariableChanged,
                &SessionVariableChanged {
                    param: "autocommit".into(),
                    value: None,
                },
            ),
            ok(None),
        ]);
        xp.read_ok().await.unwrap();
        assert_eq!(xp.notices().client_id, Some(42));
    }

    #[tokio::test]
    async fn test_read_expected_error_and_violation() {
        let (mut xp, _) = engine(vec![error(1045)]);
        assert!(matches!(
            xp.read_ok().await,
            Err(Error::Server { code: 1045, .. })
        ));

        let (mut xp, _) = engine(vec![row(1)]);
        assert!(matches!(
            xp.read_ok().await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_legacy_server_detected() {
        let (mut xp, _) = engine(vec![Packet::new(LEGACY_PROTOCOL_MARKER, Bytes::new())]);
        let err = xp.get_capabilities().await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(m) if m.contains("unsupported protocol version")));
    }

    #[tokio::test]
    async fn test_global_notice_ignored() {
        let frame = Frame::new(
            NoticeType::SessionStateChanged,
            NoticeScope::Global,
            &SessionStateChanged::new(StateParam::AccountExpired, true),
        );
        let (mut xp, _) = engine(vec![Packet::from_server(&frame), ok(None)]);
        xp.read_ok().await.unwrap();
        assert!(!xp.notices().password_expired);
    }

    #[tokio::test]
    async fn test_result_with_interleaved_notices() {
        let (mut xp, _) = engine(vec![
            warning(1, "before metadata"),
            column("id"),
            state(StateParam::GeneratedInsertId, 7u64),
            row(1),
            warning(2, "between rows"),
            row(2),
            Packet::from_server(&FetchDone),
            state(StateParam::RowsAffected, 2u64),
            state(StateParam::ProducedMessage, "Rows matched: 2"),
            Packet::from_server(&StmtExecuteOk),
        ]);
        xp.start_result(&mycat_protocol::crud::StmtExecute::sql("SELECT 1", vec![]))
            .await
            .unwrap();
        assert_eq!(xp.result().unwrap().columns().len(), 1);

        assert!(xp.read_row().await.unwrap().is_some());
        assert!(xp.read_row().await.unwrap().is_some());
        assert!(xp.read_row().await.unwrap().is_none());

        let result = xp.take_result().unwrap();
        assert!(result.closed);
        assert_eq!(result.rows_read, 2);
        assert_eq!(result.affected_rows, 2);
        assert_eq!(result.last_insert_id, Some(7));
        assert_eq!(result.warnings.len(), 3);
        assert_eq!(result.warnings[2].code, 0);
    }

    #[derive(Debug, Clone)]
    enum Interleaved {
        Warning(u32),
        RowsAffected(u64),
        InsertId(u64),
    }

    impl Interleaved {
        fn packet(&self) -> Packet {
            match self {
                Self::Warning(code) => warning(*code, "interleaved"),
                Self::RowsAffected(n) => state(StateParam::RowsAffected, *n),
                Self::InsertId(id) => state(StateParam::GeneratedInsertId, *id),
            }
        }
    }

    fn interleaved() -> impl Strategy<Value = Interleaved> {
        prop_oneof![
            any::<u32>().prop_map(Interleaved::Warning),
            any::<u64>().prop_map(Interleaved::RowsAffected),
            any::<u64>().prop_map(Interleaved::InsertId),
        ]
    }

    proptest! {
        #[test]
        fn notices_anywhere_in_a_result_are_applied(
            rows in 0usize..8,
            notices in proptest::collection::vec((0usize..16, interleaved()), 0..12),
        ) {
            // Slot s < rows precedes row s, slot rows precedes FetchDone and
            // slot rows + 1 follows it.
            let slots = rows + 2;
            let mut replies = vec![column("id")];
            let mut sent = Vec::new();
            for slot in 0..slots {
                for (_, notice) in notices.iter().filter(|(at, _)| at % slots == slot) {
                    replies.push(notice.packet());
                    sent.push(notice.clone());
                }
                if slot < rows {
                    replies.push(row(i64::try_from(slot).unwrap()));
                } else if slot == rows {
                    replies.push(Packet::from_server(&FetchDone));
                }
            }
            replies.push(Packet::from_server(&StmtExecuteOk));

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let result = runtime.block_on(async {
                let (mut xp, _) = engine(replies);
                xp.start_result(&mycat_protocol::crud::StmtExecute::sql("SELECT id FROM t", vec![]))
                    .await
                    .unwrap();
                while xp.read_row().await.unwrap().is_some() {}
                xp.take_result().unwrap()
            });

            let warnings = sent.iter().filter(|n| matches!(n, Interleaved::Warning(_))).count();
            let affected = sent.iter().rev().find_map(|n| match n {
                Interleaved::RowsAffected(v) => Some(*v),
                _ => None,
            });
            let insert_id = sent.iter().rev().find_map(|n| match n {
                Interleaved::InsertId(v) => Some(*v),
                _ => None,
            });
            prop_assert!(result.closed);
            prop_assert_eq!(result.rows_read, u64::try_from(rows).unwrap());
            prop_assert_eq!(result.warnings.len(), warnings);
            prop_assert_eq!(result.affected_rows, affected.unwrap_or(0));
            prop_assert_eq!(result.last_insert_id, insert_id);
        }
    }

    #[tokio::test]
    async fn test_close_result_error_clears_result() {
        let (mut xp, _) = engine(vec![row(1), error(1317)]);
        xp.result = Some(ResultState::new());
        xp.result_mut().unwrap().set_columns(vec![]);
        xp.drain_result().await.unwrap_err();
        assert!(xp.result().is_none());
    }

    #[tokio::test]
    async fn test_close_result_rejects_stray_message() {
        let (mut xp, _) = engine(vec![column("late")]);
        xp.result = Some(ResultState::new());
        let err = xp.close_result().await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(m) if m.contains("throwing away results")));
    }

    #[tokio::test]
    async fn test_more_results() {
        let (mut xp, _) = engine(vec![
            column("a"),
            row(1),
            Packet::from_server(&FetchDoneMoreResultsets),
            column("b"),
            row(2),
            Packet::from_server(&FetchDone),
            Packet::from_server(&StmtExecuteOk),
        ]);
        xp.start_result(&mycat_protocol::crud::StmtExecute::sql("CALL p()", vec![]))
            .await
            .unwrap();
        xp.drain_result().await.unwrap();
        let first = xp.begin_next_result().await.unwrap().unwrap();
        assert_eq!(first.rows_skipped, 1);
        assert_eq!(xp.result().unwrap().columns()[0].name, "b");
        xp.drain_result().await.unwrap();
        assert!(xp.begin_next_result().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        struct Silent;

        #[async_trait]
        impl PacketTransport for Silent {
            async fn read_packet(&mut self) -> std::result::Result<Packet, CodecError> {
                std::future::pending().await
            }
            async fn write_packet(&mut self, _: Packet) -> std::result::Result<(), CodecError> {
                Ok(())
            }
            async fn shutdown(&mut self) -> std::result::Result<(), CodecError> {
                Ok(())
            }
        }

        let mut xp = XProtocol::new(Box::new(Silent));
        xp.set_read_timeout(Some(Duration::from_millis(10)));
        assert!(matches!(
            xp.read_ok().await,
            Err(Error::Timeout { fatal: false })
        ));
    }

    #[tokio::test]
    async fn test_authenticate_plain() {
        let (mut xp, script) = engine(vec![Packet::from_server(&AuthenticateOk::default())]);
        let creds = Credentials::new("root", "pw");
        let mut mech = AuthMethod::Plain.create(&creds);
        xp.authenticate(mech.as_mut()).await.unwrap();

        let written = script.written.lock();
        let start = AuthenticateStart::decode_exact(written[0].payload.clone()).unwrap();
        assert_eq!(start.mech_name, "PLAIN");
        assert_eq!(start.auth_data.unwrap().as_ref(), b"\0root\0pw");
    }

    #[tokio::test]
    async fn test_authenticate_nonce_exchange() {
        let (mut xp, script) = engine(vec![
            Packet::from_server(&AuthenticateContinue {
                auth_data: Bytes::from_static(b"01234567890123456789"),
            }),
            notice(
                NoticeType::SessionStateChanged,
                &SessionStateChanged::new(StateParam::ClientIdAssigned, 9u64),
            ),
            Packet::from_server(&AuthenticateOk::default()),
        ]);
        let creds = Credentials::new("root", "pw");
        let mut mech = AuthMethod::MySql41.create(&creds);
        xp.authenticate(mech.as_mut()).await.unwrap();
        assert_eq!(script.written.lock().len(), 2);
        assert_eq!(xp.notices().client_id, Some(9));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (mut xp, _) = engine(vec![error(1045)]);
        let creds = Credentials::new("root", "bad");
        let mut mech = AuthMethod::Plain.create(&creds);
        let err = xp.authenticate(mech.as_mut()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication(AuthError::Rejected { code: 1045, .. })
        ));
    }

    #[tokio::test]
    async fn test_scram_without_server_signature_fails() {
        let creds = Credentials::new("user", "pencil");
        let mut client =
            ScramClient::with_nonce(ScramAlgorithm::Sha1, &creds, "fyko+d2lbbFgONRv9qkxdawL");
        let (mut xp, _) = engine(vec![
            Packet::from_server(&AuthenticateContinue {
                auth_data: Bytes::from_static(
                    b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
                ),
            }),
            Packet::from_server(&AuthenticateOk::default()),
        ]);
        assert!(matches!(
            xp.authenticate(&mut client).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_set_capabilities_filters_names() {
        let (mut xp, script) = engine(vec![ok(None)]);
        let err = xp
            .set_capabilities(vec![Capability {
                name: "doc.formats".into(),
                value: Any::from("text"),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(script.written.lock().is_empty());

        xp.set_capabilities(vec![Capability {
            name: "tls".into(),
            value: Any::from(false),
        }])
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_close_session_expects_bye() {
        let (mut xp, script) = engine(vec![ok(Some("bye"))]);
        xp.close_session().await.unwrap();
        assert_eq!(script.written.lock()[0].message_type, 7);
    }
}
