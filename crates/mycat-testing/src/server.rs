//! Scriptable in-process server.
//!
//! [`MockServer`] answers client messages the way an X Protocol server
//! would, closely enough for the client to run its handshake, statements,
//! CRUD, prepared statements and `KILL QUERY`. Replies to SQL statements are
//! picked by prefix rules; everything else gets a fixed answer. Every
//! statement is logged so tests can assert on what went over the wire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use mycat_codec::Packet;
use mycat_protocol::crud::{Delete, Find, Insert, StmtExecute, Update};
use mycat_protocol::message::ClientMessageType;
use mycat_protocol::notice::{Frame, NoticeScope, NoticeType, SessionStateChanged, StateParam};
use mycat_protocol::prepare::{Deallocate, Execute, PreparableMessage, Prepare};
use mycat_protocol::resultset::{ColumnMetaData, FetchDone, FieldType, Row, StmtExecuteOk, field};
use mycat_protocol::session::{
    AuthenticateContinue, AuthenticateOk, AuthenticateStart, Capabilities, ErrorSeverity,
    OkMessage, ServerError,
};
use mycat_protocol::{Any, Decode, Scalar};
use parking_lot::Mutex;

/// Error code the server reports for a killed statement.
pub const ER_QUERY_INTERRUPTED: u32 = 1317;

/// What the server sends back for one statement.
#[derive(Debug, Clone)]
pub enum Reply {
    /// An empty result.
    Done,
    /// A result set.
    Rows {
        /// Column metadata.
        columns: Vec<ColumnMetaData>,
        /// Encoded field values, row by row.
        rows: Vec<Vec<Bytes>>,
    },
    /// A server error.
    Error {
        /// MySQL error code.
        code: u32,
        /// Error text.
        message: String,
    },
    /// Nothing until the statement is killed.
    Hang,
    /// Raw packets, sent as given.
    Packets(Vec<Packet>),
}

impl Reply {
    /// One signed integer column.
    pub fn ints(column: &str, values: impl IntoIterator<Item = i64>) -> Self {
        Self::Rows {
            columns: vec![ColumnMetaData::new(column, FieldType::Sint)],
            rows: values.into_iter().map(|v| vec![field::sint(v)]).collect(),
        }
    }

    /// Text columns; `None` is NULL.
    pub fn text(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        Self::Rows {
            columns: columns
                .iter()
                .map(|c| ColumnMetaData::new(*c, FieldType::Bytes))
                .collect(),
            rows: rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|v| v.map_or_else(field::null, field::string))
                        .collect()
                })
                .collect(),
        }
    }

    /// A server error.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    fn into_response(self) -> Response {
        match self {
            Self::Done => Response::packets(done()),
            Self::Rows { columns, rows } => {
                let mut packets: Vec<Packet> =
                    columns.iter().map(Packet::from_server).collect();
                packets.extend(rows.into_iter().map(|fields| Packet::from_server(&Row { fields })));
                packets.extend(done());
                Response::packets(packets)
            }
            Self::Error { code, message } => Response::packets(vec![error_packet(code, &message)]),
            Self::Hang => Response {
                packets: Vec::new(),
                hang: true,
                thread: None,
            },
            Self::Packets(packets) => Response::packets(packets),
        }
    }
}

fn done() -> Vec<Packet> {
    vec![
        Packet::from_server(&FetchDone),
        Packet::from_server(&StmtExecuteOk),
    ]
}

fn ok_packet(msg: Option<&str>) -> Packet {
    Packet::from_server(&OkMessage {
        msg: msg.map(String::from),
    })
}

/// An error packet.
pub fn error_packet(code: u32, message: &str) -> Packet {
    Packet::from_server(&ServerError {
        severity: ErrorSeverity::Error,
        code,
        sql_state: "HY000".into(),
        msg: message.into(),
    })
}

/// A session-state notice.
pub fn state_notice(param: StateParam, value: impl Into<Scalar>) -> Packet {
    Packet::from_server(&Frame::new(
        NoticeType::SessionStateChanged,
        NoticeScope::Local,
        &SessionStateChanged::new(param, value),
    ))
}

/// Answer to one client packet.
#[derive(Debug, Default)]
pub(crate) struct Response {
    pub(crate) packets: Vec<Packet>,
    /// Block further reads until the connection's statement is killed.
    pub(crate) hang: bool,
    /// Server thread assigned by a completed handshake.
    pub(crate) thread: Option<u64>,
}

impl Response {
    fn packets(packets: Vec<Packet>) -> Self {
        Self {
            packets,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
    once: bool,
}

#[derive(Debug)]
struct ServerState {
    next_thread: u64,
    account_expired: bool,
    reject_auth: Option<u32>,
    rules: Vec<Rule>,
    statements: Vec<String>,
    executed: Vec<PreparableMessage>,
    message_types: Vec<u8>,
    prepared: HashMap<u32, PreparableMessage>,
    killed: HashSet<u64>,
    handshakes: usize,
    resets: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            next_thread: 1,
            account_expired: false,
            reject_auth: None,
            rules: Vec::new(),
            statements: Vec::new(),
            executed: Vec::new(),
            message_types: Vec::new(),
            prepared: HashMap::new(),
            killed: HashSet::new(),
            handshakes: 0,
            resets: 0,
        }
    }
}

/// In-process server shared by every transport connected to it.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    /// A server answering every statement with an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign server threads starting at `thread`.
    #[must_use]
    pub fn first_thread(self, thread: u64) -> Self {
        self.state.lock().next_thread = thread;
        self
    }

    /// Report an expired account during every handshake.
    #[must_use]
    pub fn account_expired(self) -> Self {
        self.state.lock().account_expired = true;
        self
    }

    /// Reject every authentication attempt with `code`.
    #[must_use]
    pub fn reject_auth(self, code: u32) -> Self {
        self.state.lock().reject_auth = Some(code);
        self
    }

    /// Answer statements starting with `prefix` with `reply`.
    ///
    /// Rules are tried in the order they were added.
    #[must_use]
    pub fn on(self, prefix: impl Into<String>, reply: Reply) -> Self {
        self.add_rule(prefix.into(), reply, false);
        self
    }

    /// Like [`on`](Self::on) for the next matching statement only.
    #[must_use]
    pub fn on_once(self, prefix: impl Into<String>, reply: Reply) -> Self {
        self.add_rule(prefix.into(), reply, true);
        self
    }

    fn add_rule(&self, prefix: String, reply: Reply, once: bool) {
        self.state.lock().rules.push(Rule {
            prefix,
            reply,
            once,
        });
    }

    /// SQL text of every statement received, prepared executions rendered
    /// with their arguments.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Every executed message with arguments bound, in arrival order.
    #[must_use]
    pub fn executed(&self) -> Vec<PreparableMessage> {
        self.state.lock().executed.clone()
    }

    /// Type byte of every client message received.
    #[must_use]
    pub fn message_types(&self) -> Vec<u8> {
        self.state.lock().message_types.clone()
    }

    /// Number of handshakes started.
    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.state.lock().handshakes
    }

    /// Number of session resets received.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    /// Forget the statement and message logs.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.statements.clear();
        state.executed.clear();
        state.message_types.clear();
    }

    /// Whether a kill for `thread` is waiting; consumes it.
    pub(crate) fn take_kill(&self, thread: u64) -> bool {
        self.state.lock().killed.remove(&thread)
    }

    pub(crate) fn handle(&self, packet: &Packet) -> Response {
        self.state.lock().message_types.push(packet.message_type);
        match self.dispatch(packet) {
            Ok(response) => response,
            Err(e) => Response::packets(vec![error_packet(5000, &e.to_string())]),
        }
    }

    fn dispatch(&self, packet: &Packet) -> Result<Response, mycat_protocol::ProtocolError> {
        let kind = ClientMessageType::from_u8(packet.message_type)?;
        let payload = packet.payload.clone();
        Ok(match kind {
            ClientMessageType::CapabilitiesGet => {
                self.state.lock().handshakes += 1;
                Response::packets(vec![Packet::from_server(&Capabilities::default())])
            }
            ClientMessageType::CapabilitiesSet
            | ClientMessageType::ExpectOpen
            | ClientMessageType::ExpectClose => Response::packets(vec![ok_packet(None)]),
            ClientMessageType::ConClose | ClientMessageType::SessClose => {
                Response::packets(vec![ok_packet(Some("bye"))])
            }
            ClientMessageType::SessReset => {
                self.state.lock().resets += 1;
                Response::packets(vec![ok_packet(None)])
            }
            ClientMessageType::AuthenticateStart => {
                let start = AuthenticateStart::decode_exact(payload)?;
                if let Some(code) = self.state.lock().reject_auth {
                    return Ok(Response::packets(vec![error_packet(
                        code,
                        "Access denied",
                    )]));
                }
                match start.mech_name.as_str() {
                    "PLAIN" | "EXTERNAL" => self.authenticated(),
                    _ => Response::packets(vec![Packet::from_server(&AuthenticateContinue {
                        auth_data: Bytes::from_static(b"01234567890123456789"),
                    })]),
                }
            }
            ClientMessageType::AuthenticateContinue => self.authenticated(),
            ClientMessageType::StmtExecute => {
                let stmt = StmtExecute::decode_exact(payload)?;
                self.statement(PreparableMessage::Stmt(stmt))
            }
            ClientMessageType::CrudFind => {
                self.statement(PreparableMessage::Find(Find::decode_exact(payload)?))
            }
            ClientMessageType::CrudInsert => {
                self.statement(PreparableMessage::Insert(Insert::decode_exact(payload)?))
            }
            ClientMessageType::CrudUpdate => {
                self.statement(PreparableMessage::Update(Update::decode_exact(payload)?))
            }
            ClientMessageType::CrudDelete => {
                self.statement(PreparableMessage::Delete(Delete::decode_exact(payload)?))
            }
            ClientMessageType::Prepare => {
                let prepare = Prepare::decode_exact(payload)?;
                self.state.lock().prepared.insert(prepare.stmt_id, prepare.stmt);
                Response::packets(vec![ok_packet(None)])
            }
            ClientMessageType::PrepareExecute => {
                let execute = Execute::decode_exact(payload)?;
                let template = self.state.lock().prepared.get(&execute.stmt_id).cloned();
                let Some(template) = template else {
                    return Ok(Response::packets(vec![error_packet(
                        5110,
                        "Statement with ID not found",
                    )]));
                };
                let args: Vec<Scalar> = execute
                    .args
                    .into_iter()
                    .filter_map(|a| match a {
                        Any::Scalar(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                self.statement(template.instantiate(&args)?)
            }
            ClientMessageType::Deallocate => {
                let deallocate = Deallocate::decode_exact(payload)?;
                self.state.lock().prepared.remove(&deallocate.stmt_id);
                Response::packets(vec![ok_packet(None)])
            }
        })
    }

    fn authenticated(&self) -> Response {
        let mut state = self.state.lock();
        let thread = state.next_thread;
        state.next_thread += 1;
        let mut packets = Vec::new();
        if state.account_expired {
            packets.push(state_notice(StateParam::AccountExpired, true));
        }
        packets.push(state_notice(StateParam::ClientIdAssigned, thread));
        packets.push(Packet::from_server(&AuthenticateOk::default()));
        Response {
            packets,
            hang: false,
            thread: Some(thread),
        }
    }

    fn statement(&self, message: PreparableMessage) -> Response {
        let mut state = self.state.lock();
        let sql = match &message {
            PreparableMessage::Stmt(stmt) => Some(stmt.stmt.clone()),
            _ => None,
        };
        state.executed.push(message);
        let Some(sql) = sql else {
            return Reply::Done.into_response();
        };
        state.statements.push(sql.clone());

        if let Some(thread) = sql
            .strip_prefix("KILL QUERY ")
            .and_then(|t| t.trim().parse::<u64>().ok())
        {
            state.killed.insert(thread);
        }

        let Some(index) = state.rules.iter().position(|r| sql.starts_with(&r.prefix)) else {
            return Reply::Done.into_response();
        };
        let reply = if state.rules[index].once {
            state.rules.remove(index).reply
        } else {
            state.rules[index].reply.clone()
        };
        reply.into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mycat_protocol::ServerMessageType;

    use super::*;

    fn sql(text: &str) -> Packet {
        Packet::from_client(&StmtExecute::sql(text, vec![]))
    }

    #[test]
    fn test_rules_match_by_prefix() {
        let server = MockServer::new()
            .on_once("SELECT 1", Reply::ints("one", [1]))
            .on("SELECT", Reply::error(1146, "no such table"));

        let first = server.handle(&sql("SELECT 1"));
        assert_eq!(first.packets.len(), 4);
        let second = server.handle(&sql("SELECT 1"));
        assert_eq!(second.packets[0].message_type, ServerMessageType::Error as u8);
        assert_eq!(server.statements(), vec!["SELECT 1", "SELECT 1"]);
    }

    #[test]
    fn test_kill_is_recorded() {
        let server = MockServer::new();
        server.handle(&sql("KILL QUERY 42"));
        assert!(server.take_kill(42));
        assert!(!server.take_kill(42));
    }

    #[test]
    fn test_threads_are_assigned_in_order() {
        let server = MockServer::new().first_thread(42);
        assert_eq!(server.authenticated().thread, Some(42));
        assert_eq!(server.authenticated().thread, Some(43));
    }
}
