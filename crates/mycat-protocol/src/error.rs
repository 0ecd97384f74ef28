//! Protocol-level error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol structures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload data is truncated or incomplete.
    #[error("incomplete payload: expected {expected} bytes, got {actual}")]
    IncompletePayload {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes available.
        actual: usize,
    },

    /// A varint ran past ten bytes or overflowed 64 bits.
    #[error("malformed varint")]
    MalformedVarint,

    /// Unknown client message type.
    #[error("invalid client message type: {0}")]
    InvalidClientMessageType(u8),

    /// Unknown server message type.
    #[error("invalid server message type: {0}")]
    InvalidServerMessageType(u8),

    /// Unknown value tag inside a payload.
    #[error("invalid {kind} tag: {tag}")]
    InvalidTag {
        /// Which structure carried the tag.
        kind: &'static str,
        /// The tag value.
        tag: u64,
    },

    /// Text field was not valid UTF-8.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// Invalid field value in a protocol structure.
    #[error("invalid {field} value: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Description of the invalid value.
        value: String,
    },

    /// A placeholder referenced an argument that was not supplied.
    #[error("placeholder {position} has no bound argument ({supplied} supplied)")]
    MissingArgument {
        /// Placeholder position.
        position: u32,
        /// Number of arguments supplied.
        supplied: usize,
    },

    /// Bytes were left over after a complete structure was decoded.
    #[error("{0} trailing bytes after message payload")]
    TrailingBytes(usize),
}
