//! Server push notices.
//!
//! A NOTICE message carries a [`Frame`]: a frame type, a scope and an
//! opaque payload that is decoded according to the frame type.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bytes, get_opt, get_seq, get_string, get_u32, get_varint, put_bytes,
    put_opt, put_seq, put_string, put_varint,
};
use crate::datatypes::Scalar;
use crate::error::ProtocolError;
use crate::message::{ServerMessage, ServerMessageType};

/// Notice scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoticeScope {
    /// Applies to the whole server.
    Global = 1,
    /// Applies to the current session or result.
    #[default]
    Local = 2,
}

/// Known notice frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeType {
    /// A warning attached to the current result.
    Warning = 1,
    /// A session variable changed.
    SessionVariableChanged = 2,
    /// Session or result state changed.
    SessionStateChanged = 3,
}

impl NoticeType {
    /// Map a raw frame type; unknown types yield `None`.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Warning),
            2 => Some(Self::SessionVariableChanged),
            3 => Some(Self::SessionStateChanged),
            _ => None,
        }
    }
}

/// A notice frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw frame type, see [`NoticeType`].
    pub frame_type: u32,
    /// Scope.
    pub scope: NoticeScope,
    /// Type-specific payload.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame around an encoded payload.
    pub fn new(kind: NoticeType, scope: NoticeScope, payload: &impl Encode) -> Self {
        Self {
            frame_type: kind as u32,
            scope,
            payload: payload.to_bytes(),
        }
    }

    /// Known frame type, if any.
    #[must_use]
    pub fn notice_type(&self) -> Option<NoticeType> {
        NoticeType::from_u32(self.frame_type)
    }
}

impl Encode for Frame {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.frame_type));
        put_varint(buf, self.scope as u64);
        put_bytes(buf, &self.payload);
    }
}

impl Decode for Frame {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let frame_type = get_u32(src, "frame type")?;
        let scope = match get_varint(src)? {
            1 => NoticeScope::Global,
            2 => NoticeScope::Local,
            tag => {
                return Err(ProtocolError::InvalidTag {
                    kind: "notice scope",
                    tag,
                });
            }
        };
        Ok(Self {
            frame_type,
            scope,
            payload: get_bytes(src)?,
        })
    }
}

impl ServerMessage for Frame {
    const TYPE: ServerMessageType = ServerMessageType::Notice;
}

/// Warning severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarningLevel {
    /// Informational note.
    Note = 1,
    /// Warning.
    #[default]
    Warning = 2,
    /// Error.
    Error = 3,
}

/// Payload of a warning notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Severity.
    pub level: WarningLevel,
    /// Error code.
    pub code: u32,
    /// Message text.
    pub msg: String,
}

impl Encode for Warning {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.level as u64);
        put_varint(buf, u64::from(self.code));
        put_string(buf, &self.msg);
    }
}

impl Decode for Warning {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let level = match get_varint(src)? {
            1 => WarningLevel::Note,
            2 => WarningLevel::Warning,
            3 => WarningLevel::Error,
            tag => {
                return Err(ProtocolError::InvalidTag {
                    kind: "warning level",
                    tag,
                });
            }
        };
        Ok(Self {
            level,
            code: get_u32(src, "warning code")?,
            msg: get_string(src)?,
        })
    }
}

/// Payload of a session-variable notice.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionVariableChanged {
    /// Variable name.
    pub param: String,
    /// New value, if any.
    pub value: Option<Scalar>,
}

impl Encode for SessionVariableChanged {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.param);
        put_opt(buf, self.value.as_ref(), |b, v| v.encode(b));
    }
}

impl Decode for SessionVariableChanged {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            param: get_string(src)?,
            value: get_opt(src, Scalar::decode)?,
        })
    }
}

/// Which piece of state a state-changed notice reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateParam {
    /// Current default schema.
    CurrentSchema,
    /// The account password has expired.
    AccountExpired,
    /// Auto-increment id generated by the statement.
    GeneratedInsertId,
    /// Rows affected by the statement.
    RowsAffected,
    /// Rows found by the statement.
    RowsFound,
    /// Rows matched by the statement.
    RowsMatched,
    /// The transaction was committed.
    TrxCommitted,
    /// The transaction was rolled back.
    TrxRolledback,
    /// Informational message produced by the statement.
    ProducedMessage,
    /// Server-assigned client id.
    ClientIdAssigned,
    /// Document ids generated by an insert.
    GeneratedDocumentIds,
    /// Any parameter this driver does not track.
    Other(u32),
}

impl StateParam {
    /// Map a raw parameter id.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::CurrentSchema,
            2 => Self::AccountExpired,
            3 => Self::GeneratedInsertId,
            4 => Self::RowsAffected,
            5 => Self::RowsFound,
            6 => Self::RowsMatched,
            7 => Self::TrxCommitted,
            9 => Self::TrxRolledback,
            10 => Self::ProducedMessage,
            11 => Self::ClientIdAssigned,
            12 => Self::GeneratedDocumentIds,
            other => Self::Other(other),
        }
    }

    /// Raw parameter id.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::CurrentSchema => 1,
            Self::AccountExpired => 2,
            Self::GeneratedInsertId => 3,
            Self::RowsAffected => 4,
            Self::RowsFound => 5,
            Self::RowsMatched => 6,
            Self::TrxCommitted => 7,
            Self::TrxRolledback => 9,
            Self::ProducedMessage => 10,
            Self::ClientIdAssigned => 11,
            Self::GeneratedDocumentIds => 12,
            Self::Other(v) => v,
        }
    }
}

/// Payload of a state-changed notice.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateChanged {
    /// Reported parameter.
    pub param: StateParam,
    /// Parameter values; most parameters carry exactly one.
    pub values: Vec<Scalar>,
}

impl SessionStateChanged {
    /// State change with a single value.
    pub fn new(param: StateParam, value: impl Into<Scalar>) -> Self {
        Self {
            param,
            values: vec![value.into()],
        }
    }

    /// First value as an unsigned integer.
    #[must_use]
    pub fn first_u64(&self) -> Option<u64> {
        match self.values.first()? {
            Scalar::Unsigned(v) => Some(*v),
            Scalar::Signed(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// First value as text.
    #[must_use]
    pub fn first_string(&self) -> Option<String> {
        match self.values.first()? {
            Scalar::String(s) => Some(s.clone()),
            Scalar::Octets(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// First value as a boolean.
    #[must_use]
    pub fn first_bool(&self) -> Option<bool> {
        match self.values.first()? {
            Scalar::Bool(b) => Some(*b),
            Scalar::Unsigned(v) => Some(*v != 0),
            Scalar::Signed(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl Encode for SessionStateChanged {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.param.as_u32()));
        put_seq(buf, &self.values);
    }
}

impl Decode for SessionStateChanged {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            param: StateParam::from_u32(get_u32(src, "state parameter")?),
            values: get_seq(src)?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_frame() {
        let warning = Warning {
            level: WarningLevel::Note,
            code: 1287,
            msg: "deprecated".into(),
        };
        let frame = Frame::new(NoticeType::Warning, NoticeScope::Local, &warning);
        let frame = Frame::decode_exact(frame.to_bytes()).unwrap();
        assert_eq!(frame.notice_type(), Some(NoticeType::Warning));
        assert_eq!(Warning::decode_exact(frame.payload).unwrap(), warning);
    }

    #[test]
    fn test_state_param_mapping() {
        assert_eq!(StateParam::from_u32(9), StateParam::TrxRolledback);
        assert_eq!(StateParam::from_u32(8), StateParam::Other(8));
        assert_eq!(StateParam::GeneratedDocumentIds.as_u32(), 12);
    }

    #[test]
    fn test_state_values() {
        let change = SessionStateChanged::new(StateParam::RowsAffected, 3u64);
        assert_eq!(change.first_u64(), Some(3));
        let change = SessionStateChanged::new(StateParam::CurrentSchema, "db");
        assert_eq!(change.first_string().as_deref(), Some("db"));
    }

    #[test]
    fn test_unknown_frame_type() {
        let frame = Frame {
            frame_type: 99,
            scope: NoticeScope::Local,
            payload: Bytes::new(),
        };
        assert_eq!(frame.notice_type(), None);
    }

    #[test]
    fn test_bad_scope() {
        let mut src = Bytes::from_static(&[1, 7, 0]);
        assert!(Frame::decode(&mut src).is_err());
    }
}
