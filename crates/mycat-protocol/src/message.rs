//! Binary protocol message type identifiers.

use bytes::Bytes;

use crate::codec::{Decode, Encode};
use crate::error::ProtocolError;

/// A server reply carrying this id came from a legacy-protocol port.
pub const LEGACY_PROTOCOL_MARKER: u8 = 10;

/// Message types sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientMessageType {
    /// Request the server capability set.
    CapabilitiesGet = 1,
    /// Change session capabilities.
    CapabilitiesSet = 2,
    /// Close the connection.
    ConClose = 3,
    /// Begin authentication.
    AuthenticateStart = 4,
    /// Continue an authentication exchange.
    AuthenticateContinue = 5,
    /// Reset the session.
    SessReset = 6,
    /// Close the session.
    SessClose = 7,
    /// Execute a statement.
    StmtExecute = 12,
    /// CRUD find.
    CrudFind = 17,
    /// CRUD insert.
    CrudInsert = 18,
    /// CRUD update.
    CrudUpdate = 19,
    /// CRUD delete.
    CrudDelete = 20,
    /// Open an expectation block.
    ExpectOpen = 24,
    /// Close an expectation block.
    ExpectClose = 25,
    /// Prepare a statement template.
    Prepare = 40,
    /// Execute a prepared statement.
    PrepareExecute = 41,
    /// Release a prepared statement.
    Deallocate = 42,
}

impl ClientMessageType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::CapabilitiesGet,
            2 => Self::CapabilitiesSet,
            3 => Self::ConClose,
            4 => Self::AuthenticateStart,
            5 => Self::AuthenticateContinue,
            6 => Self::SessReset,
            7 => Self::SessClose,
            12 => Self::StmtExecute,
            17 => Self::CrudFind,
            18 => Self::CrudInsert,
            19 => Self::CrudUpdate,
            20 => Self::CrudDelete,
            24 => Self::ExpectOpen,
            25 => Self::ExpectClose,
            40 => Self::Prepare,
            41 => Self::PrepareExecute,
            42 => Self::Deallocate,
            other => return Err(ProtocolError::InvalidClientMessageType(other)),
        })
    }
}

/// Message types sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerMessageType {
    /// Generic success.
    Ok = 0,
    /// Error report.
    Error = 1,
    /// Capability set.
    Capabilities = 2,
    /// Authentication challenge.
    AuthenticateContinue = 3,
    /// Authentication succeeded.
    AuthenticateOk = 4,
    /// Asynchronous notice.
    Notice = 11,
    /// Column metadata for a result set.
    ColumnMetaData = 12,
    /// One result row.
    Row = 13,
    /// End of a result set.
    FetchDone = 14,
    /// Cursor fetch suspended.
    FetchSuspended = 15,
    /// End of a result set, more follow.
    FetchDoneMoreResultsets = 16,
    /// Statement finished.
    StmtExecuteOk = 17,
    /// End of a result set, output parameters follow.
    FetchDoneMoreOutParams = 18,
}

impl ServerMessageType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Capabilities,
            3 => Self::AuthenticateContinue,
            4 => Self::AuthenticateOk,
            11 => Self::Notice,
            12 => Self::ColumnMetaData,
            13 => Self::Row,
            14 => Self::FetchDone,
            15 => Self::FetchSuspended,
            16 => Self::FetchDoneMoreResultsets,
            17 => Self::StmtExecuteOk,
            18 => Self::FetchDoneMoreOutParams,
            other => return Err(ProtocolError::InvalidServerMessageType(other)),
        })
    }

    /// Whether this message ends the current result set.
    #[must_use]
    pub fn is_fetch_done(self) -> bool {
        matches!(
            self,
            Self::FetchDone | Self::FetchDoneMoreResultsets | Self::FetchDoneMoreOutParams
        )
    }
}

/// A message the client sends.
pub trait ClientMessage: Encode {
    /// Wire type id.
    const TYPE: ClientMessageType;
}

/// A message the server sends.
pub trait ServerMessage: Decode {
    /// Wire type id.
    const TYPE: ServerMessageType;

    /// Decode a whole message payload.
    fn from_payload(payload: Bytes) -> Result<Self, ProtocolError> {
        Self::decode_exact(payload)
    }
}
