//! Framing behaviour across split reads.

#![allow(clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use mycat_codec::{CodecError, Packet, PacketStream, PacketTransport, XCodec};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

#[tokio::test]
async fn envelope_split_across_reads() {
    let mock = tokio_test::io::Builder::new()
        .read(&[6, 0])
        .read(&[0, 0, 13, 1])
        .read(&[2, 3, 4, 5])
        .build();
    let mut stream = PacketStream::new(mock);
    let packet = stream.read_packet().await.unwrap();
    assert_eq!(packet.message_type, 13);
    assert_eq!(&packet.payload[..], &[1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn truncated_envelope_is_an_error() {
    let mock = tokio_test::io::Builder::new().read(&[9, 0, 0, 0, 13]).build();
    let mut stream = PacketStream::new(mock);
    let err = stream.read_packet().await.unwrap_err();
    assert!(err.is_disconnect() || matches!(err, CodecError::Io(_)));
}

#[tokio::test]
async fn stream_enforces_codec_limit() {
    let mock = tokio_test::io::Builder::new()
        .read(&[3, 0, 0, 0, 12, 1, 2])
        .read(&[200, 0, 0, 0, 12])
        .build();
    let mut stream = PacketStream::with_limit(mock, XCodec::new().with_max_message_size(16));
    assert_eq!(stream.buffered(), 0);
    let packet = stream.read_packet().await.unwrap();
    assert_eq!(&packet.payload[..], &[1, 2]);
    assert!(matches!(
        stream.read_packet().await,
        Err(CodecError::PacketTooLarge { size: 200, max: 16 })
    ));
}

proptest! {
    #[test]
    fn any_packet_survives_the_codec(
        message_type in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut codec = XCodec::new();
        let mut buf = BytesMut::new();
        let packet = Packet::new(message_type, Bytes::from(payload));
        codec.encode(packet.clone(), &mut buf).unwrap();
        prop_assert_eq!(buf.len(), packet.wire_size());
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut codec = XCodec::new().with_max_message_size(1024);
        let mut buf = BytesMut::from(&data[..]);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
}
