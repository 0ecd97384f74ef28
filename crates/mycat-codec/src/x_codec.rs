//! Envelope codec for the binary message protocol.
//!
//! Every message is framed as `{u32 LE length}{u8 type}{payload}` where the
//! length counts the type byte and the payload but not itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mycat_protocol::codec::Encode;
use mycat_protocol::{ClientMessage, ServerMessage};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 4;

/// Default upper bound for a single message, 64 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// One framed message: a type id and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message type id.
    pub message_type: u8,
    /// Encoded payload.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet from raw parts.
    pub fn new(message_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Wrap a client message.
    pub fn from_client<M: ClientMessage>(message: &M) -> Self {
        Self::new(M::TYPE as u8, message.to_bytes())
    }

    /// Wrap a server message. Used by mock servers.
    pub fn from_server<M: ServerMessage + Encode>(message: &M) -> Self {
        Self::new(M::TYPE as u8, message.to_bytes())
    }

    /// Whether this packet carries the given server message.
    #[must_use]
    pub fn is<M: ServerMessage>(&self) -> bool {
        self.message_type == M::TYPE as u8
    }

    /// Decode the payload as a server message.
    pub fn decode<M: ServerMessage>(&self) -> Result<M, CodecError> {
        Ok(M::from_payload(self.payload.clone())?)
    }

    /// Total size on the wire.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        LENGTH_SIZE + 1 + self.payload.len()
    }
}

/// Codec for binary protocol envelopes.
#[derive(Debug, Clone)]
pub struct XCodec {
    max_message_size: usize,
}

impl XCodec {
    /// Create a codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the maximum accepted message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Current size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for XCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for XCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let raw_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if raw_len == 0 {
            return Err(CodecError::InvalidLength(raw_len));
        }
        let length = raw_len as usize;
        if length > self.max_message_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        let total = LENGTH_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let message_type = src.get_u8();
        let payload = src.split_to(length - 1).freeze();

        tracing::trace!(message_type, payload_len = payload.len(), "decoded message");

        Ok(Some(Packet {
            message_type,
            payload,
        }))
    }
}

impl Encoder<Packet> for XCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.payload.len() + 1;
        if length > self.max_message_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        dst.reserve(LENGTH_SIZE + length);
        dst.put_u32_le(length as u32);
        dst.put_u8(item.message_type);
        dst.put_slice(&item.payload);

        tracing::trace!(
            message_type = item.message_type,
            payload_len = item.payload.len(),
            "encoded message"
        );

        Ok(())
    }
}
