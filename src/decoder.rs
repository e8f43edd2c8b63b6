//! Pluggable stream framing for inbound transport data.
//!
//! Each transport message is handed to the session's decoder as one chunk.
//! Chunk boundaries need not match application message boundaries: a JSON
//! value may span several chunks and one chunk may carry several values. A
//! [`FrameDecoder`] accumulates chunks and yields each message once it is
//! complete.
//!
//! # Error Handling
//!
//! Malformed input never tears down the stream. Decoders report it as a
//! [`Decoded::Diagnostic`] alongside any messages from the same chunk and
//! discard only the malformed portion. The one fatal condition is
//! [`DecodeError::BufferOverflow`], raised when a peer keeps sending data
//! that never completes a frame.
//!
//! Two decoders are provided:
//!
//! - [`JsonFrameDecoder`]: reassembles self-describing JSON values.
//! - [`PassthroughDecoder`]: treats each chunk as one message.

pub mod error;
mod json;
mod passthrough;

pub use error::{DecodeDiagnostic, DecodeError, RecoveryPolicy};
pub use json::JsonFrameDecoder;
pub use passthrough::PassthroughDecoder;

use crate::message::Message;

/// Minimum decoder buffer limit in bytes.
///
/// Limits passed to decoder constructors are clamped to at least this value.
pub const MIN_BUFFER_LIMIT: usize = 64;

/// Maximum decoder buffer limit in bytes (16 MiB).
pub const MAX_BUFFER_LIMIT: usize = 16 * 1024 * 1024;

/// Default decoder buffer limit in bytes (1 MiB).
pub const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;

pub(crate) fn clamp_buffer_limit(value: usize) -> usize {
    value.clamp(MIN_BUFFER_LIMIT, MAX_BUFFER_LIMIT)
}

/// Result of decoding part of a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// A complete message.
    Message(Message),
    /// A non-fatal report describing input that was discarded.
    Diagnostic(DecodeDiagnostic),
}

impl Decoded {
    /// Borrow the message, if this item carries one.
    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Diagnostic(_) => None,
        }
    }

    /// Borrow the diagnostic, if this item carries one.
    #[must_use]
    pub fn as_diagnostic(&self) -> Option<&DecodeDiagnostic> {
        match self {
            Self::Diagnostic(diagnostic) => Some(diagnostic),
            Self::Message(_) => None,
        }
    }
}

/// Stateful accumulator turning transport chunks into messages.
///
/// Implementations are owned by a single session and fed chunks in arrival
/// order. They must not correlate data across [`reset`](Self::reset) calls:
/// the session resets its decoder whenever the physical connection changes.
pub trait FrameDecoder: Send + 'static {
    /// Consume `chunk` and return every item it completes, in stream order.
    ///
    /// Incomplete trailing data is retained and prefixed to the next call.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::BufferOverflow`] when retained data exceeds the
    /// decoder's limit. The buffer is cleared before the error is returned.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, DecodeError>;

    /// Discard any retained partial data.
    fn reset(&mut self);

    /// Number of bytes currently retained.
    fn buffered(&self) -> usize;
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, DecodeError> {
        (**self).feed(chunk)
    }

    fn reset(&mut self) { (**self).reset(); }

    fn buffered(&self) -> usize { (**self).buffered() }
}
