//! Decoder forwarding each transport chunk as one message.

use bytes::Bytes;

use super::{DecodeError, Decoded, FrameDecoder};
use crate::message::Message;

/// Decoder for endpoints whose transport already preserves message
/// boundaries.
///
/// Each non-empty chunk becomes one [`Message::Text`] when it is valid UTF-8
/// and one [`Message::Binary`] otherwise. Nothing is ever retained.
///
/// ```
/// use relink::{
///     decoder::{FrameDecoder, PassthroughDecoder},
///     message::Message,
/// };
///
/// let mut decoder = PassthroughDecoder;
/// let items = decoder.feed(b"hello").expect("feed");
/// assert_eq!(items[0].as_message(), Some(&Message::Text("hello".into())));
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, DecodeError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let message = match std::str::from_utf8(chunk) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(Bytes::copy_from_slice(chunk)),
        };
        Ok(vec![Decoded::Message(message)])
    }

    fn reset(&mut self) {}

    fn buffered(&self) -> usize { 0 }
}
