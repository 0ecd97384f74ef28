//! Envelope stream over an async byte transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::x_codec::{Packet, XCodec};

pin_project! {
    /// Whole X Protocol envelopes read from and written to a socket.
    ///
    /// Reads yield one [`Packet`] per envelope however the bytes were
    /// split on the wire; writes encode one envelope per packet.
    pub struct PacketStream<T> {
        #[pin]
        frames: Framed<T, XCodec>,
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Frame `transport` with the default message size limit.
    pub fn new(transport: T) -> Self {
        Self::with_limit(transport, XCodec::new())
    }

    /// Frame `transport` with a codec carrying its own size limit.
    pub fn with_limit(transport: T, codec: XCodec) -> Self {
        Self {
            frames: Framed::new(transport, codec),
        }
    }

    /// The socket, for shutdown.
    pub fn get_mut(&mut self) -> &mut T {
        self.frames.get_mut()
    }

    /// Bytes received that do not yet form a whole envelope.
    pub fn buffered(&self) -> usize {
        self.frames.read_buffer().len()
    }
}

impl<T> Stream for PacketStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().frames.poll_next(cx)
    }
}

impl<T> Sink<Packet> for PacketStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().frames.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, packet: Packet) -> Result<(), Self::Error> {
        tracing::trace!(message_type = packet.message_type, "queueing envelope");
        self.project().frames.start_send(packet)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().frames.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().frames.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for PacketStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("buffered", &self.frames.read_buffer().len())
            .finish_non_exhaustive()
    }
}
