//! Reconnecting sessions to named upstream endpoints.
//!
//! A [`Session`] owns at most one transport connection at a time. It connects
//! lazily on the first [`send`](Session::send), retries failed handshakes
//! with exponential back-off, reconnects once automatically when the peer
//! closes the connection, and feeds inbound chunks through its
//! [`FrameDecoder`](crate::decoder::FrameDecoder). Everything it observes is
//! published as a [`SessionEvent`].
//!
//! Sessions are independent of one another; each has its own health monitor
//! and event channel.

mod builder;
mod error;
mod event;
mod inbound;
mod runtime;

pub use builder::SessionBuilder;
pub use error::SessionError;
pub use event::SessionEvent;
pub use runtime::Session;

/// Connection lifecycle phase of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no connect sequence in flight.
    #[default]
    Disconnected,
    /// A connect sequence is in flight.
    Connecting,
    /// A connection is established.
    Connected,
    /// The most recent connect sequence ran out of attempts.
    Exhausted,
}

#[cfg(test)]
mod tests;
