#![doc(html_root_url = "https://docs.rs/relink/latest")]
//! Public API for the `relink` library.
//!
//! This crate maintains resilient client connections to named local
//! services. A [`Session`] connects lazily, retries failed handshakes with
//! exponential back-off, reconnects after the peer goes away, reassembles
//! JSON messages split across reads, and tracks error health. Everything it
//! observes is published as a [`SessionEvent`].

pub mod config;
pub mod decoder;
pub mod endpoint;
pub mod health;
pub mod message;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{LogLevel, SessionConfig};
pub use decoder::{DecodeError, Decoded, FrameDecoder, JsonFrameDecoder, PassthroughDecoder};
pub use endpoint::{Endpoint, EndpointEntry, EndpointTable, Framing};
pub use health::{ERROR_THRESHOLD, HealthMonitor, HealthSnapshot};
pub use message::{Message, Outbound};
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use session::{Session, SessionBuilder, SessionError, SessionEvent, SessionState};
pub use transport::{Connector, TcpConnector, TransportParts, TransportSink, TransportSource};
