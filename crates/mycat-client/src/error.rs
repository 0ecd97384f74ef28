//! Client error types.

use mycat_auth::AuthError;
use mycat_codec::CodecError;
use mycat_protocol::ProtocolError;
use mycat_protocol::session::ServerError;
use thiserror::Error;

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// The server sent a message the protocol does not allow at this point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server reported an error.
    #[error("server error {code} ({sql_state}): {message}")]
    Server {
        /// MySQL error code.
        code: u32,
        /// SQLSTATE.
        sql_state: String,
        /// Error text.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// A command or connection deadline expired.
    ///
    /// `fatal` is set when the bounded cancellation failed and the
    /// connection had to be aborted.
    #[error("operation timed out (fatal: {fatal})")]
    Timeout {
        /// Whether the connection was torn down.
        fatal: bool,
    },

    /// The request is valid but this driver does not support it.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The connection or result is in the wrong state for this call.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error outside the framing layer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or transport error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The operation was cancelled before it started.
    #[error("operation cancelled")]
    Cancelled,

    /// A pool manager failed.
    #[error("pool error: {0}")]
    Pool(String),
}

impl Error {
    /// Whether the connection can no longer be used after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Timeout { fatal } => *fatal,
            Self::ProtocolViolation(_) | Self::Io(_) => true,
            Self::Codec(e) => e.is_disconnect(),
            _ => false,
        }
    }

    /// Whether retrying the operation on a new connection may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io(_) => true,
            Self::Codec(e) => e.is_disconnect(),
            Self::Pool(_) => true,
            _ => false,
        }
    }

    /// Whether this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn violation(expected: &str, actual: u8) -> Self {
        Self::ProtocolViolation(format!(
            "expected {expected}, received message type {actual}"
        ))
    }

    pub(crate) fn not_open() -> Self {
        Self::InvalidState("connection must be open".into())
    }
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Self {
        Self::Server {
            code: e.code,
            sql_state: e.sql_state,
            message: e.msg,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mycat_protocol::session::ErrorSeverity;

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            Error::Timeout { fatal: true }.to_string(),
            "operation timed out (fatal: true)"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Timeout { fatal: true }.is_fatal());
        assert!(!Error::Timeout { fatal: false }.is_fatal());
        assert!(Error::Codec(CodecError::ConnectionClosed).is_fatal());
        assert!(!Error::NotSupported("x".into()).is_fatal());
        assert!(Error::Timeout { fatal: false }.is_transient());
    }

    #[test]
    fn test_from_server_error() {
        let err: Error = ServerError {
            severity: ErrorSeverity::Error,
            code: 1146,
            sql_state: "42S02".into(),
            msg: "Table 'x' doesn't exist".into(),
        }
        .into();
        assert!(matches!(err, Error::Server { code: 1146, .. }));
    }
}
