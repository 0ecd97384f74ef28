//! Whole-message transport abstraction.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::framed::PacketStream;
use crate::x_codec::Packet;

/// Exchanges whole envelopes with the server.
///
/// The protocol engine only ever talks to this trait, so tests can swap the
/// network for a scripted peer.
#[async_trait]
pub trait PacketTransport: Send {
    /// Read the next envelope. End of stream is [`CodecError::ConnectionClosed`].
    async fn read_packet(&mut self) -> Result<Packet, CodecError>;

    /// Write and flush one envelope.
    async fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError>;

    /// Close the write half.
    async fn shutdown(&mut self) -> Result<(), CodecError>;
}

#[async_trait]
impl<T> PacketTransport for PacketStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_packet(&mut self) -> Result<Packet, CodecError> {
        match self.next().await {
            Some(result) => result,
            None => Err(CodecError::ConnectionClosed),
        }
    }

    async fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        self.send(packet).await
    }

    async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.get_mut().shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<P> PacketTransport for Box<P>
where
    P: PacketTransport + ?Sized,
{
    async fn read_packet(&mut self) -> Result<Packet, CodecError> {
        (**self).read_packet().await
    }

    async fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        (**self).write_packet(packet).await
    }

    async fn shutdown(&mut self) -> Result<(), CodecError> {
        (**self).shutdown().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_stream_transport_reads_and_writes() {
        let mock = tokio_test::io::Builder::new()
            .write(&[2, 0, 0, 0, 1, 0xAA])
            .read(&[1, 0, 0, 0, 0])
            .build();
        let mut stream = PacketStream::new(mock);
        stream
            .write_packet(Packet::new(1, Bytes::from_static(&[0xAA])))
            .await
            .unwrap();
        let reply = stream.read_packet().await.unwrap();
        assert_eq!(reply.message_type, 0);
        assert!(reply.payload.is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_closed() {
        let mock = tokio_test::io::Builder::new().build();
        let mut stream = PacketStream::new(mock);
        assert!(matches!(
            stream.read_packet().await,
            Err(CodecError::ConnectionClosed)
        ));
    }
}
