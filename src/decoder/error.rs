//! Error types for the decoder layer.
//!
//! Decoding failures come in two severities. A [`DecodeDiagnostic`] describes
//! malformed input that was dropped while the stream carried on; a
//! [`DecodeError::BufferOverflow`] means the decoder can no longer make
//! progress and the connection must be closed.

use std::fmt;

use thiserror::Error;

/// Human-readable report of input discarded by a decoder.
///
/// # Examples
///
/// ```
/// use relink::decoder::{FrameDecoder, JsonFrameDecoder};
///
/// let mut decoder = JsonFrameDecoder::default();
/// let items = decoder.feed(b"malformed{json").expect("not fatal");
/// let diagnostic = items[0].as_diagnostic().expect("diagnostic");
/// assert!(diagnostic.message().contains("expected value"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeDiagnostic {
    message: String,
    discarded: usize,
}

impl DecodeDiagnostic {
    /// Build a diagnostic from a description and the number of bytes dropped.
    #[must_use]
    pub fn new(message: impl Into<String>, discarded: usize) -> Self {
        Self {
            message: message.into(),
            discarded,
        }
    }

    /// Description of why the input could not be decoded.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    /// Number of bytes discarded from the stream.
    #[must_use]
    pub const fn discarded(&self) -> usize { self.discarded }
}

impl fmt::Display for DecodeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes discarded)", self.message, self.discarded)
    }
}

/// How a session responds to a decode failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Discard the malformed input and keep the connection open.
    Drop,
    /// Close the connection.
    Disconnect,
}

impl RecoveryPolicy {
    /// Returns the policy name as a static string for logging.
    ///
    /// ```
    /// use relink::decoder::RecoveryPolicy;
    ///
    /// assert_eq!(RecoveryPolicy::Drop.as_str(), "drop");
    /// assert_eq!(RecoveryPolicy::Disconnect.as_str(), "disconnect");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Decode failures surfaced to session consumers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input was malformed and has been discarded.
    #[error("malformed frame: {0}")]
    Malformed(DecodeDiagnostic),

    /// Retained partial data exceeded the configured limit.
    #[error("decoder buffer overflow: {buffered} bytes exceeds limit of {max}")]
    BufferOverflow {
        /// Bytes that would have been retained.
        buffered: usize,
        /// Configured buffer limit.
        max: usize,
    },
}

impl DecodeError {
    /// Returns the policy a session applies for this error.
    ///
    /// ```
    /// use relink::decoder::{DecodeDiagnostic, DecodeError, RecoveryPolicy};
    ///
    /// let err = DecodeError::Malformed(DecodeDiagnostic::new("bad", 3));
    /// assert_eq!(err.recovery_policy(), RecoveryPolicy::Drop);
    ///
    /// let err = DecodeError::BufferOverflow {
    ///     buffered: 2048,
    ///     max: 1024,
    /// };
    /// assert_eq!(err.recovery_policy(), RecoveryPolicy::Disconnect);
    /// ```
    #[must_use]
    pub const fn recovery_policy(&self) -> RecoveryPolicy {
        match self {
            Self::Malformed(_) => RecoveryPolicy::Drop,
            Self::BufferOverflow { .. } => RecoveryPolicy::Disconnect,
        }
    }

    /// Returns true if the connection must be closed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.recovery_policy(), RecoveryPolicy::Disconnect)
    }
}

impl From<DecodeDiagnostic> for DecodeError {
    fn from(value: DecodeDiagnostic) -> Self { Self::Malformed(value) }
}
