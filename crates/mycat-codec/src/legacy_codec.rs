//! Framing for the legacy packet protocol.
//!
//! Legacy packets carry a 3-byte length and a sequence number that counts
//! up per exchange. The codec checks the sequence on decode and stamps it on
//! encode; [`LegacyCodec::reset_sequence`] starts a new exchange.

use bytes::{Buf, Bytes, BytesMut};
use mycat_protocol::classic::{MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// One legacy packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPacket {
    /// Sequence number.
    pub sequence: u8,
    /// Payload.
    pub payload: Bytes,
}

/// Codec for legacy packets.
#[derive(Debug, Clone, Default)]
pub struct LegacyCodec {
    next_sequence: u8,
}

impl LegacyCodec {
    /// Create a codec expecting sequence 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.next_sequence = 0;
    }

    /// Next expected sequence number.
    #[must_use]
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }
}

impl Decoder for LegacyCodec {
    type Item = LegacyPacket;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::decode(&mut Bytes::copy_from_slice(&src[..PACKET_HEADER_SIZE]))?;
        let total = PACKET_HEADER_SIZE + header.length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        if header.sequence != self.next_sequence {
            return Err(CodecError::OutOfOrder {
                expected: self.next_sequence,
                actual: header.sequence,
            });
        }
        self.next_sequence = self.next_sequence.wrapping_add(1);

        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(header.length as usize).freeze();
        Ok(Some(LegacyPacket {
            sequence: header.sequence,
            payload,
        }))
    }
}

impl Encoder<Bytes> for LegacyCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_PACKET_PAYLOAD {
            return Err(CodecError::PacketTooLarge {
                size: item.len(),
                max: MAX_PACKET_PAYLOAD,
            });
        }
        let header = PacketHeader::new(item.len(), self.next_sequence)?;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        dst.reserve(PACKET_HEADER_SIZE + item.len());
        header.encode(dst);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_advances() {
        let mut codec = LegacyCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(&[3, b'x']), &mut buf).unwrap();
        codec.encode(Bytes::from_static(&[14]), &mut buf).unwrap();
        assert_eq!(&buf[..6], &[2, 0, 0, 0, 3, b'x']);
        assert_eq!(&buf[6..], &[1, 0, 0, 1, 14]);
        assert_eq!(codec.next_sequence(), 2);
    }

    #[test]
    fn test_decode_checks_sequence() {
        let mut codec = LegacyCodec::new();
        let mut buf = BytesMut::from(&[1u8, 0, 0, 1, 0xFF][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::OutOfOrder {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_decode_after_reset() {
        let mut codec = LegacyCodec::new();
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0x0A][..]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.payload[0], 0x0A);
        codec.reset_sequence();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().unwrap().payload.is_empty());
    }
}
