//! Utilities for exercising [`relink`] sessions without real sockets.
//!
//! [`ScriptedConnector`] answers each handshake according to a queue of
//! [`Script`] steps and hands the [`Peer`] side of accepted connections back
//! to the test. The event helpers wait on a session's broadcast receiver with
//! a deadline so a missing event fails the test instead of hanging it.
//!
//! ```rust
//! use relink::Session;
//! use relink_testing::{Script, ScriptedConnector};
//!
//! # async fn example() {
//! let connector = ScriptedConnector::new([Script::Refuse, Script::Accept]);
//! let session = Session::builder("fetch").connector(connector.clone()).build();
//! session.send("ping").await.expect("second attempt succeeds");
//! let mut peer = connector.next_peer().await;
//! assert_eq!(peer.recv_text().await, "ping");
//! # }
//! ```

pub mod events;
pub mod logging;
pub mod peer;
pub mod scripted;

pub use events::{EVENT_TIMEOUT, drain_events, next_event, wait_for_event};
pub use logging::{LoggerHandle, logger};
pub use peer::{Peer, encode_frame};
pub use scripted::{Script, ScriptedConnector, connector};
