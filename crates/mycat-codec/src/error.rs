//! Codec error types.

use thiserror::Error;

/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error during read/write operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] mycat_protocol::ProtocolError),

    /// Packet too large.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Actual packet size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The envelope length cannot even hold the type byte.
    #[error("invalid envelope length {0}")]
    InvalidLength(u32),

    /// Legacy packet arrived out of sequence.
    #[error("packet out of order: expected sequence {expected}, got {actual}")]
    OutOfOrder {
        /// Expected sequence number.
        expected: u8,
        /// Received sequence number.
        actual: u8,
    },

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Whether the peer is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
