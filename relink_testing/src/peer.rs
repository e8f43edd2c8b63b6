//! Remote end of an in-memory connection.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relink::transport::frame_codec;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::EVENT_TIMEOUT;

/// Server side of a connection accepted by [`ScriptedConnector`].
///
/// Speaks the session's framing, so each [`send`](Self::send) arrives as one
/// message and each [`recv`](Self::recv) returns one whole `send` from the
/// session. Dropping the peer closes the connection.
///
/// [`ScriptedConnector`]: crate::ScriptedConnector
#[derive(Debug)]
pub struct Peer {
    framed: Framed<DuplexStream, LengthDelimitedCodec>,
}

impl Peer {
    pub(crate) fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, frame_codec()),
        }
    }

    /// Send one message to the session.
    ///
    /// # Panics
    ///
    /// Panics if the session side has gone away.
    pub async fn send(&mut self, message: impl AsRef<[u8]>) {
        self.framed
            .send(Bytes::copy_from_slice(message.as_ref()))
            .await
            .expect("peer send");
    }

    /// Write raw bytes, bypassing the framing.
    ///
    /// # Panics
    ///
    /// Panics if the session side has gone away.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("peer write");
        stream.flush().await.expect("peer flush");
    }

    /// Receive the next message from the session.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`EVENT_TIMEOUT`] or the session
    /// closed the connection.
    pub async fn recv(&mut self) -> Bytes {
        tokio::time::timeout(EVENT_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("read frame")
            .freeze()
    }

    /// Receive the next message as UTF-8 text.
    ///
    /// # Panics
    ///
    /// Panics as [`recv`](Self::recv) does, or if the message is not UTF-8.
    pub async fn recv_text(&mut self) -> String {
        String::from_utf8(self.recv().await.to_vec()).expect("utf-8 message")
    }
}

/// Encode `message` exactly as the session's framing puts it on the wire.
///
/// # Panics
///
/// Panics if `message` is longer than `u32::MAX` bytes.
#[must_use]
pub fn encode_frame(message: &[u8]) -> Vec<u8> {
    let length = u32::try_from(message.len()).expect("frame length fits in u32");
    [&length.to_be_bytes()[..], message].concat()
}
