//! Error types for session operations.

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::decoder::DecodeError;

/// Errors emitted by [`Session`](super::Session) operations and events.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A single transport operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// One handshake exceeded its deadline.
    #[error("connection attempt timed out after {timeout:?}")]
    ConnectionTimeout {
        /// The deadline that expired.
        timeout: Duration,
    },

    /// Every permitted handshake failed.
    #[error("failed to connect to {endpoint} after {attempts} attempts")]
    ConnectionExhausted {
        /// Logical endpoint name.
        endpoint: String,
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last_error: Arc<SessionError>,
    },

    /// Inbound data could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The operation was interrupted by `disconnect()`.
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// An outbound payload could not be serialized.
    #[error("failed to serialize payload")]
    Serialize(#[source] serde_json::Error),
}

impl SessionError {
    /// Returns true if the attempt ceiling was reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool { matches!(self, Self::ConnectionExhausted { .. }) }

    /// Returns true if the operation was interrupted by `disconnect()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled) }

    /// Returns true if the error forced the connection closed.
    ///
    /// ```
    /// use relink::{decoder::DecodeError, session::SessionError};
    ///
    /// let err = SessionError::from(DecodeError::BufferOverflow {
    ///     buffered: 2048,
    ///     max: 1024,
    /// });
    /// assert!(err.is_fatal_decode());
    /// ```
    #[must_use]
    pub fn is_fatal_decode(&self) -> bool {
        matches!(self, Self::Decode(decode) if decode.is_fatal())
    }
}
