//! Reader task and connection teardown.

use std::{
    ops::ControlFlow,
    sync::{Arc, Weak, atomic::Ordering},
};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    SessionError,
    SessionEvent,
    SessionState,
    runtime::{Inner, Session},
};
use crate::{decoder::Decoded, transport::TransportSource};

/// What to do once a connection has been torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum AfterClose {
    /// Schedule one background reconnect.
    Reconnect,
    /// Leave the session disconnected.
    Stay,
}

/// Drain `source` until the peer closes, the connection fails, or the
/// session is disconnected or dropped.
///
/// Boxed because the reader can schedule a reconnect, which spawns a new
/// reader.
pub(super) fn read_loop(
    inner: Weak<Inner>,
    mut source: Box<dyn TransportSource>,
    generation: u64,
    token: CancellationToken,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        loop {
            let received = tokio::select! {
                biased;

                () = token.cancelled() => return,
                received = source.recv() => received,
            };
            let Some(session) = Session::upgrade(&inner) else {
                return;
            };
            match received {
                Some(Ok(chunk)) => {
                    if session.handle_chunk(generation, &chunk).is_break() {
                        session.close_connection(generation, AfterClose::Stay).await;
                        return;
                    }
                }
                Some(Err(error)) => {
                    let error = Arc::new(SessionError::Transport(error));
                    session.inner.record_error("Socket error", &error);
                    session
                        .inner
                        .emit_if_current(generation, SessionEvent::Error(error));
                    session
                        .close_connection(generation, AfterClose::Reconnect)
                        .await;
                    return;
                }
                None => {
                    debug!(endpoint = %session.endpoint().name(), generation, "peer closed connection");
                    session
                        .close_connection(generation, AfterClose::Reconnect)
                        .await;
                    return;
                }
            }
        }
    })
}

impl Session {
    /// Feed one inbound chunk to the decoder and publish the results.
    ///
    /// Breaks when the decoder reports a fatal error.
    fn handle_chunk(&self, generation: u64, chunk: &Bytes) -> ControlFlow<()> {
        let outcome = {
            let state = self.inner.state();
            if !state.is_current(generation) {
                return ControlFlow::Continue(());
            }
            self.inner.decoder().feed(chunk)
        };

        let decoded = match outcome {
            Ok(decoded) => decoded,
            Err(error) => {
                let policy = error.recovery_policy();
                let fatal = error.is_fatal();
                let error = Arc::new(SessionError::Decode(error));
                self.inner.record_error("Message handling error", &error);
                self.inner
                    .emit_if_current(generation, SessionEvent::Error(error));
                if fatal {
                    warn!(
                        endpoint = %self.endpoint().name(),
                        generation,
                        policy = policy.as_str(),
                        "inbound buffer limit exceeded, closing connection"
                    );
                    return ControlFlow::Break(());
                }
                return ControlFlow::Continue(());
            }
        };

        for item in decoded {
            match item {
                Decoded::Message(message) => {
                    self.inner
                        .emit_if_current(generation, SessionEvent::Data(message));
                }
                Decoded::Diagnostic(diagnostic) => {
                    let error = Arc::new(SessionError::Decode(diagnostic.into()));
                    self.inner.record_error("Message handling error", &error);
                    self.inner
                        .emit_if_current(generation, SessionEvent::Error(error));
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Tear down connection `generation` if it is still the live one.
    ///
    /// A stale generation is ignored, so concurrent closes of the same
    /// connection emit one `Disconnected` and schedule at most one reconnect.
    pub(super) async fn close_connection(&self, generation: u64, after: AfterClose) {
        let token = {
            let mut state = self.inner.state();
            if !state.is_current(generation) {
                return;
            }
            state.phase = SessionState::Disconnected;
            state.generation += 1;
            state.connection.cancel();
            self.inner.decoder().reset();
            self.inner.emit(SessionEvent::Disconnected);
            state.shutdown.clone()
        };

        let active = {
            let mut slot = self.inner.sink.lock().await;
            if slot.as_ref().is_some_and(|active| active.generation == generation) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(active) = active {
            active.shutdown(self.endpoint()).await;
        }
        info!(endpoint = %self.endpoint().name(), generation, "connection closed");

        if after == AfterClose::Reconnect {
            self.spawn_reconnect(token);
        }
    }

    /// Start one background connect sequence unless one is already running.
    ///
    /// The sequence is bound to `token`, so a `disconnect()` issued after the
    /// close cancels it.
    pub(super) fn spawn_reconnect(&self, token: CancellationToken) {
        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.endpoint().name(), "reconnect already in progress");
            return;
        }
        info!(endpoint = %self.endpoint().name(), "reconnecting");
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(error) = session.connect_with(&token).await
                && !error.is_cancelled()
            {
                session.inner.record_error("Reconnection failed", &error);
            }
            session.inner.reconnecting.store(false, Ordering::Release);
        });
    }
}
