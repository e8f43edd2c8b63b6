//! Transport seam between sessions and the network.
//!
//! A [`Connector`] performs the handshake and hands back the two halves of a
//! duplex connection: a [`TransportSink`] the session writes through and a
//! [`TransportSource`] its reader task drains. The default implementation,
//! [`TcpConnector`], runs over `tokio::net::TcpStream`.
//!
//! Connections are message-oriented. Stream transports carry each message as
//! one frame prefixed with its length as a 4-byte big-endian integer, so one
//! `send` reaches the peer as one message and every message the peer writes
//! is received whole, however the bytes are split in transit.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest frame accepted or produced by [`frame_codec`] (16 MiB).
pub const MAX_FRAME_LENGTH: usize = crate::decoder::MAX_BUFFER_LIMIT;

/// Codec framing messages on stream transports.
///
/// Peers speaking to a session over a byte stream use the same codec.
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use relink::transport::frame_codec;
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = frame_codec();
/// let mut wire = BytesMut::new();
/// codec
///     .encode(Bytes::from_static(b"hello"), &mut wire)
///     .expect("encode");
/// assert_eq!(&wire[..4], &[0, 0, 0, 5]);
///
/// let frame = codec.decode(&mut wire).expect("decode").expect("whole frame");
/// assert_eq!(&frame[..], b"hello");
/// ```
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Write half of an established connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Write one message to the peer.
    async fn send(&mut self, message: Bytes) -> io::Result<()>;

    /// Flush and close the write direction.
    async fn close(&mut self) -> io::Result<()>;
}

/// Read half of an established connection.
#[async_trait]
pub trait TransportSource: Send {
    /// Wait for the next message. `None` means the peer closed the
    /// connection.
    async fn recv(&mut self) -> Option<io::Result<Bytes>>;
}

/// Both halves of an established connection.
pub struct TransportParts {
    /// Write half, owned by the session.
    pub sink: Box<dyn TransportSink>,
    /// Read half, owned by the session's reader task.
    pub source: Box<dyn TransportSource>,
}

impl std::fmt::Debug for TransportParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportParts").finish_non_exhaustive()
    }
}

impl TransportParts {
    /// Combine a sink and a source.
    #[must_use]
    pub fn new(
        sink: impl TransportSink + 'static,
        source: impl TransportSource + 'static,
    ) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }

    /// Split any async byte stream into framed transport halves.
    ///
    /// ```
    /// use futures::StreamExt;
    /// use relink::transport::{TransportParts, frame_codec};
    /// use tokio_util::codec::Framed;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> std::io::Result<()> {
    /// let (local, remote) = tokio::io::duplex(64);
    /// let mut parts = TransportParts::from_stream(local);
    /// parts.sink.send(bytes::Bytes::from_static(b"ping")).await?;
    ///
    /// let mut peer = Framed::new(remote, frame_codec());
    /// let frame = peer.next().await.expect("frame")?;
    /// assert_eq!(&frame[..], b"ping");
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::new(FramedSink::new(write), FramedSource::new(read))
    }
}

/// Establishes transport connections.
///
/// Implementations must be cancellation-safe: dropping a pending `connect()`
/// future must release any half-open connection.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    /// Open a connection to `address`.
    async fn connect(&self, address: SocketAddr) -> io::Result<TransportParts>;
}

/// [`TransportSink`] writing length-delimited frames to an async writer.
#[derive(Debug)]
pub struct FramedSink<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite> FramedSink<W> {
    /// Wrap a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, frame_codec()),
        }
    }
}

#[async_trait]
impl<W> TransportSink for FramedSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, message: Bytes) -> io::Result<()> { self.inner.send(message).await }

    async fn close(&mut self) -> io::Result<()> { SinkExt::<Bytes>::close(&mut self.inner).await }
}

/// [`TransportSource`] reading length-delimited frames from an async reader.
#[derive(Debug)]
pub struct FramedSource<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead> FramedSource<R> {
    /// Wrap a reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, frame_codec()),
        }
    }
}

#[async_trait]
impl<R> TransportSource for FramedSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn recv(&mut self) -> Option<io::Result<Bytes>> {
        self.inner
            .next()
            .await
            .map(|frame| frame.map(BytesMut::freeze))
    }
}

/// Default [`Connector`] opening TCP connections with `TCP_NODELAY` set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: SocketAddr) -> io::Result<TransportParts> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(TransportParts::from_stream(stream))
    }
}

/// Returns true for errors meaning the connection is gone and a fresh one
/// may succeed.
///
/// ```
/// use std::io;
///
/// use relink::transport::is_broken_pipe;
///
/// assert!(is_broken_pipe(&io::Error::from(io::ErrorKind::BrokenPipe)));
/// assert!(!is_broken_pipe(&io::Error::from(io::ErrorKind::InvalidInput)));
/// ```
#[must_use]
pub fn is_broken_pipe(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
