//! Connection, session and authentication messages.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bool, get_bytes, get_opt, get_seq, get_string, get_u32, get_varint,
    put_bool, put_bytes, put_opt, put_seq, put_string, put_varint,
};
use crate::datatypes::Any;
use crate::error::ProtocolError;
use crate::message::{ClientMessage, ClientMessageType, ServerMessage, ServerMessageType};

empty_message!(
    /// Request the server capability set.
    CapabilitiesGet
);
empty_message!(
    /// Close the session, keeping the connection.
    SessionClose
);
empty_message!(
    /// Close the connection.
    ConnectionClose
);
empty_message!(
    /// Close the innermost expectation block.
    ExpectClose
);

impl ClientMessage for CapabilitiesGet {
    const TYPE: ClientMessageType = ClientMessageType::CapabilitiesGet;
}

impl ClientMessage for SessionClose {
    const TYPE: ClientMessageType = ClientMessageType::SessClose;
}

impl ClientMessage for ConnectionClose {
    const TYPE: ClientMessageType = ClientMessageType::ConClose;
}

impl ClientMessage for ExpectClose {
    const TYPE: ClientMessageType = ClientMessageType::ExpectClose;
}

/// First message of the authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateStart {
    /// Mechanism name, e.g. `SHA256_MEMORY`.
    pub mech_name: String,
    /// Mechanism-specific data.
    pub auth_data: Option<Bytes>,
    /// Initial response, when the mechanism sends one up front.
    pub initial_response: Option<Bytes>,
}

impl Encode for AuthenticateStart {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.mech_name);
        put_opt(buf, self.auth_data.as_deref(), put_bytes);
        put_opt(buf, self.initial_response.as_deref(), put_bytes);
    }
}

impl Decode for AuthenticateStart {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            mech_name: get_string(src)?,
            auth_data: get_opt(src, get_bytes)?,
            initial_response: get_opt(src, get_bytes)?,
        })
    }
}

impl ClientMessage for AuthenticateStart {
    const TYPE: ClientMessageType = ClientMessageType::AuthenticateStart;
}

/// Challenge or response in the middle of an authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateContinue {
    /// Exchange data.
    pub auth_data: Bytes,
}

impl Encode for AuthenticateContinue {
    fn encode(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.auth_data);
    }
}

impl Decode for AuthenticateContinue {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            auth_data: get_bytes(src)?,
        })
    }
}

impl ClientMessage for AuthenticateContinue {
    const TYPE: ClientMessageType = ClientMessageType::AuthenticateContinue;
}

impl ServerMessage for AuthenticateContinue {
    const TYPE: ServerMessageType = ServerMessageType::AuthenticateContinue;
}

/// Authentication succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticateOk {
    /// Final mechanism data.
    pub auth_data: Option<Bytes>,
}

impl Encode for AuthenticateOk {
    fn encode(&self, buf: &mut BytesMut) {
        put_opt(buf, self.auth_data.as_deref(), put_bytes);
    }
}

impl Decode for AuthenticateOk {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            auth_data: get_opt(src, get_bytes)?,
        })
    }
}

impl ServerMessage for AuthenticateOk {
    const TYPE: ServerMessageType = ServerMessageType::AuthenticateOk;
}

/// Reset the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reset {
    /// Keep the session open instead of requiring re-authentication.
    pub keep_open: Option<bool>,
}

impl Encode for Reset {
    fn encode(&self, buf: &mut BytesMut) {
        put_opt(buf, self.keep_open.as_ref(), |b, v| put_bool(b, *v));
    }
}

impl Decode for Reset {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            keep_open: get_opt(src, get_bool)?,
        })
    }
}

impl ClientMessage for Reset {
    const TYPE: ClientMessageType = ClientMessageType::SessReset;
}

/// Generic success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OkMessage {
    /// Optional message text.
    pub msg: Option<String>,
}

impl Encode for OkMessage {
    fn encode(&self, buf: &mut BytesMut) {
        put_opt(buf, self.msg.as_deref(), put_string);
    }
}

impl Decode for OkMessage {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg: get_opt(src, get_string)?,
        })
    }
}

impl ServerMessage for OkMessage {
    const TYPE: ServerMessageType = ServerMessageType::Ok;
}

/// Severity of a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorSeverity {
    /// The statement failed; the session survives.
    #[default]
    Error = 0,
    /// The session is unusable.
    Fatal = 1,
}

/// Error report from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Severity.
    pub severity: ErrorSeverity,
    /// Server error code.
    pub code: u32,
    /// Five-character SQLSTATE.
    pub sql_state: String,
    /// Message text.
    pub msg: String,
}

impl Encode for ServerError {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.severity as u64);
        put_varint(buf, u64::from(self.code));
        put_string(buf, &self.sql_state);
        put_string(buf, &self.msg);
    }
}

impl Decode for ServerError {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let severity = match get_varint(src)? {
            0 => ErrorSeverity::Error,
            1 => ErrorSeverity::Fatal,
            tag => return Err(ProtocolError::InvalidTag { kind: "severity", tag }),
        };
        Ok(Self {
            severity,
            code: get_u32(src, "error code")?,
            sql_state: get_string(src)?,
            msg: get_string(src)?,
        })
    }
}

impl ServerMessage for ServerError {
    const TYPE: ServerMessageType = ServerMessageType::Error;
}

/// A named capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    /// Capability name, e.g. `tls`.
    pub name: String,
    /// Capability value.
    pub value: Any,
}

impl Encode for Capability {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.name);
        self.value.encode(buf);
    }
}

impl Decode for Capability {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: get_string(src)?,
            value: Any::decode(src)?,
        })
    }
}

/// A capability set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Capabilities {
    /// The capabilities.
    pub capabilities: Vec<Capability>,
}

impl Capabilities {
    /// Look up a capability by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Any> {
        self.capabilities
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }
}

impl Encode for Capabilities {
    fn encode(&self, buf: &mut BytesMut) {
        put_seq(buf, &self.capabilities);
    }
}

impl Decode for Capabilities {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            capabilities: get_seq(src)?,
        })
    }
}

impl ServerMessage for Capabilities {
    const TYPE: ServerMessageType = ServerMessageType::Capabilities;
}

/// Change session capabilities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapabilitiesSet {
    /// Capabilities to apply.
    pub capabilities: Capabilities,
}

impl Encode for CapabilitiesSet {
    fn encode(&self, buf: &mut BytesMut) {
        self.capabilities.encode(buf);
    }
}

impl Decode for CapabilitiesSet {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            capabilities: Capabilities::decode(src)?,
        })
    }
}

impl ClientMessage for CapabilitiesSet {
    const TYPE: ClientMessageType = ClientMessageType::CapabilitiesSet;
}

/// How a new expectation block starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectContext {
    /// Inherit the enclosing block's conditions.
    #[default]
    CopyPrevious = 0,
    /// Start with no conditions.
    Empty = 1,
}

/// Whether a condition is added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionOp {
    /// Add or replace the condition.
    #[default]
    Set = 0,
    /// Remove the condition.
    Unset = 1,
}

/// Well-known condition key: stop executing after the first error.
pub const EXPECT_NO_ERROR: u32 = 1;
/// Well-known condition key: require a server field.
pub const EXPECT_FIELD_EXIST: u32 = 2;
/// Well-known condition key: require the docid generation feature.
pub const EXPECT_DOCID_GENERATED: u32 = 3;

/// One expectation condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Condition key.
    pub key: u32,
    /// Optional condition value.
    pub value: Option<Bytes>,
    /// Set or unset.
    pub op: ConditionOp,
}

impl Encode for Condition {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.key));
        put_opt(buf, self.value.as_deref(), put_bytes);
        put_varint(buf, self.op as u64);
    }
}

impl Decode for Condition {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let key = get_u32(src, "condition key")?;
        let value = get_opt(src, get_bytes)?;
        let op = match get_varint(src)? {
            0 => ConditionOp::Set,
            1 => ConditionOp::Unset,
            tag => return Err(ProtocolError::InvalidTag { kind: "condition op", tag }),
        };
        Ok(Self { key, value, op })
    }
}

/// Open an expectation block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpectOpen {
    /// Starting context.
    pub op: ExpectContext,
    /// Conditions.
    pub conditions: Vec<Condition>,
}

impl Encode for ExpectOpen {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.op as u64);
        put_seq(buf, &self.conditions);
    }
}

impl Decode for ExpectOpen {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let op = match get_varint(src)? {
            0 => ExpectContext::CopyPrevious,
            1 => ExpectContext::Empty,
            tag => return Err(ProtocolError::InvalidTag { kind: "expect op", tag }),
        };
        Ok(Self {
            op,
            conditions: get_seq(src)?,
        })
    }
}

impl ClientMessage for ExpectOpen {
    const TYPE: ClientMessageType = ClientMessageType::ExpectOpen;
}
