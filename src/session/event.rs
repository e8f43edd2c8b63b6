//! Signals published by a session.

use std::sync::Arc;

use super::SessionError;
use crate::{health::HealthSnapshot, message::Message};

/// Notification delivered to every [`Session::subscribe`] receiver.
///
/// For one session, `Connected` always precedes `Data` from that connection
/// and `Disconnected` always precedes the next `Connected`.
///
/// [`Session::subscribe`]: super::Session::subscribe
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A handshake succeeded.
    Connected,
    /// The connection closed, by the peer or by `disconnect()`.
    Disconnected,
    /// A decoded inbound message.
    Data(Message),
    /// A non-terminal failure: socket, decode or write error.
    Error(Arc<SessionError>),
    /// One handshake attempt failed.
    ConnectionFailed(Arc<SessionError>),
    /// The attempt ceiling was reached.
    MaxRetriesExceeded(Arc<SessionError>),
    /// The error count is at or beyond the threshold.
    ErrorThreshold(HealthSnapshot),
}

impl SessionEvent {
    /// Signal name for logging.
    ///
    /// ```
    /// use relink::session::SessionEvent;
    ///
    /// assert_eq!(SessionEvent::Connected.name(), "connected");
    /// ```
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Data(_) => "data",
            Self::Error(_) => "error",
            Self::ConnectionFailed(_) => "connectionFailed",
            Self::MaxRetriesExceeded(_) => "maxRetriesExceeded",
            Self::ErrorThreshold(_) => "errorThreshold",
        }
    }
}
