//! Session runtime: connection lifecycle and outbound writes.

use std::{
    fmt,
    io,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        Weak,
        atomic::AtomicBool,
    },
    time::Duration,
};

use bytes::Bytes;
use serde::Serialize;
use tokio::{
    sync::broadcast,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    SessionBuilder,
    SessionError,
    SessionEvent,
    SessionState,
    inbound::{AfterClose, read_loop},
};
use crate::{
    decoder::FrameDecoder,
    endpoint::Endpoint,
    health::{HealthMonitor, HealthSnapshot},
    message::Outbound,
    retry::{RetryController, RetryDecision},
    transport::{Connector, TransportParts, TransportSink, is_broken_pipe},
};

pub(super) struct State {
    pub(super) phase: SessionState,
    pub(super) retry: RetryController,
    /// Bumped whenever a connection is established or torn down.
    pub(super) generation: u64,
    /// Cancelled and replaced by every `disconnect()`.
    pub(super) shutdown: CancellationToken,
    /// Cancelled when the current connection is torn down. A child of
    /// `shutdown`.
    pub(super) connection: CancellationToken,
}

impl State {
    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.phase == SessionState::Connected && self.generation == generation
    }
}

pub(super) struct ActiveSink {
    pub(super) generation: u64,
    pub(super) sink: Box<dyn TransportSink>,
    /// Stops the reader task of this connection.
    pub(super) reader: CancellationToken,
}

/// Upper bound on flushing a closing sink. A peer that stopped reading must
/// not hold up teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

impl ActiveSink {
    /// Stop the reader and close the write direction.
    pub(super) async fn shutdown(mut self, endpoint: &Endpoint) {
        self.reader.cancel();
        match timeout(CLOSE_TIMEOUT, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(endpoint = %endpoint.name(), %error, "error closing transport");
            }
            Err(_) => debug!(endpoint = %endpoint.name(), "transport close timed out"),
        }
    }
}

pub(super) struct Inner {
    pub(super) endpoint: Endpoint,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) state: Mutex<State>,
    pub(super) decoder: Mutex<Box<dyn FrameDecoder>>,
    pub(super) sink: tokio::sync::Mutex<Option<ActiveSink>>,
    pub(super) connect_lock: tokio::sync::Mutex<()>,
    pub(super) reconnecting: AtomicBool,
    pub(super) health: HealthMonitor,
    pub(super) events: broadcast::Sender<SessionEvent>,
}

impl Inner {
    pub(super) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn decoder(&self) -> MutexGuard<'_, Box<dyn FrameDecoder>> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        // Having no subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Emit `event` only while connection `generation` is still live.
    pub(super) fn emit_if_current(&self, generation: u64, event: SessionEvent) {
        let state = self.state();
        if state.is_current(generation) {
            self.emit(event);
        }
    }

    pub(super) fn snapshot(&self) -> HealthSnapshot {
        let (connected, attempt) = {
            let state = self.state();
            (state.phase == SessionState::Connected, state.retry.attempt())
        };
        HealthSnapshot {
            endpoint_name: self.endpoint.name().to_owned(),
            connected,
            attempt,
            error_count: self.health.error_count(),
            last_error_at: self.health.last_error_at(),
        }
    }

    /// Record `error` with the health monitor and raise the threshold signal
    /// when due. Must not be called with the state lock held.
    pub(super) fn record_error(&self, context: &str, error: &SessionError) {
        let record = self.health.record(context, error);
        if record.threshold_crossed {
            warn!(
                endpoint = %self.endpoint.name(),
                error_count = record.error_count,
                "error threshold reached"
            );
            self.emit(SessionEvent::ErrorThreshold(self.snapshot()));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown
            .cancel();
    }
}

enum WriteFailure {
    /// `disconnect()` interrupted the write.
    Cancelled,
    Io {
        generation: Option<u64>,
        error: io::Error,
    },
}

/// Reconnecting session with one upstream endpoint.
///
/// `Session` is a cheap handle; clones share the same connection, state and
/// event channel.
///
/// # Examples
///
/// ```no_run
/// use relink::session::{Session, SessionEvent};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), relink::session::SessionError> {
/// let session = Session::builder("mysql-mcp-server").build();
/// let mut events = session.subscribe();
/// session.send(json!({"query": "select 1"})).await?;
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::Data(message) = event {
///         println!("{message:?}");
///         break;
///     }
/// }
/// session.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    pub(super) inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start building a session for the endpoint called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SessionBuilder { SessionBuilder::new(name) }

    /// Create a session for `name` with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self { SessionBuilder::new(name).build() }

    pub(super) fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// The resolved endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint { &self.inner.endpoint }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> SessionState { self.inner.state().phase }

    /// Returns true while a connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == SessionState::Connected }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> { self.inner.events.subscribe() }

    /// Point-in-time copy of the session's health.
    #[must_use]
    pub fn status(&self) -> HealthSnapshot { self.inner.snapshot() }

    /// Zero the error count and clear the last error time.
    pub fn reset_errors(&self) { self.inner.health.reset(); }

    /// Connect if not already connected.
    ///
    /// Makes up to `max_attempts` handshakes, each bounded by
    /// `connect_timeout`, sleeping for the back-off delay between them.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionExhausted`] when every attempt fails
    /// and [`SessionError::Cancelled`] when [`disconnect`](Self::disconnect)
    /// interrupts the sequence.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let token = self.inner.state().shutdown.clone();
        self.connect_with(&token).await
    }

    /// Send `payload`, connecting first if necessary.
    ///
    /// Structured payloads are serialized to compact JSON. If the connection
    /// turns out to be broken, the session reconnects and sends once more.
    ///
    /// # Errors
    ///
    /// Returns the connect error if no connection can be established,
    /// [`SessionError::Cancelled`] if [`disconnect`](Self::disconnect) is
    /// called meanwhile, or [`SessionError::Transport`] if the write fails.
    pub async fn send(&self, payload: impl Into<Outbound>) -> Result<(), SessionError> {
        let token = self.inner.state().shutdown.clone();
        let chunk = Bytes::from(payload.into().into_text());
        let mut resent = false;
        loop {
            self.connect_with(&token).await?;
            let (generation, error) = match self.write(chunk.clone(), &token).await {
                Ok(()) => return Ok(()),
                Err(WriteFailure::Cancelled) => return Err(SessionError::Cancelled),
                Err(WriteFailure::Io { generation, error }) => (generation, error),
            };
            let resend = !resent && is_broken_pipe(&error);
            let error = SessionError::Transport(error);
            self.inner.record_error("Send error", &error);
            if !resend {
                return Err(error);
            }
            resent = true;
            info!(endpoint = %self.inner.endpoint.name(), "connection broken, resending");
            if let Some(generation) = generation {
                self.close_connection(generation, AfterClose::Stay).await;
            }
        }
    }

    /// Serialize `value` as JSON and send it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialize`] if `value` cannot be represented
    /// as JSON, otherwise as [`send`](Self::send).
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SessionError> {
        let payload = Outbound::json(value).map_err(SessionError::Serialize)?;
        self.send(payload).await
    }

    /// Close the connection and cancel any connect sequence in flight.
    ///
    /// Pending [`connect`](Self::connect) and [`send`](Self::send) calls fail
    /// with [`SessionError::Cancelled`], including writes stalled on a peer
    /// that stopped reading. Calling this on a disconnected
    /// session has no effect beyond the cancellation.
    pub async fn disconnect(&self) {
        let was_connected = {
            let mut state = self.inner.state();
            state.shutdown.cancel();
            state.shutdown = CancellationToken::new();
            let was_connected = state.phase == SessionState::Connected;
            state.phase = SessionState::Disconnected;
            state.generation += 1;
            self.inner.decoder().reset();
            if was_connected {
                self.inner.emit(SessionEvent::Disconnected);
            }
            was_connected
        };

        let active = self.inner.sink.lock().await.take();
        if let Some(active) = active {
            active.shutdown(&self.inner.endpoint).await;
        }
        if was_connected {
            info!(endpoint = %self.inner.endpoint.name(), "disconnected");
        }
    }

    pub(super) async fn connect_with(&self, token: &CancellationToken) -> Result<(), SessionError> {
        if token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.is_connected() {
            return Ok(());
        }
        let _guard = tokio::select! {
            biased;

            () = token.cancelled() => return Err(SessionError::Cancelled),
            guard = self.inner.connect_lock.lock() => guard,
        };
        {
            let mut state = self.inner.state();
            if token.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if state.phase == SessionState::Connected {
                return Ok(());
            }
            state.phase = SessionState::Connecting;
            state.retry.reset();
        }
        self.run_attempts(token).await
    }

    async fn run_attempts(&self, token: &CancellationToken) -> Result<(), SessionError> {
        let policy = *self.inner.state().retry.policy();
        let address = self.inner.endpoint.address();
        loop {
            debug!(endpoint = %self.inner.endpoint.name(), %address, "opening connection");
            let handshake = timeout(policy.connect_timeout, self.inner.connector.connect(address));
            let outcome = tokio::select! {
                biased;

                () = token.cancelled() => return Err(SessionError::Cancelled),
                outcome = handshake => outcome,
            };
            let error = match outcome {
                Ok(Ok(parts)) => return self.establish(parts, token).await,
                Ok(Err(error)) => SessionError::Transport(error),
                Err(_) => SessionError::ConnectionTimeout {
                    timeout: policy.connect_timeout,
                },
            };

            let decision = self.inner.state().retry.record_failure();
            let error = Arc::new(error);
            self.inner.record_error("Connection failed", &error);
            self.inner
                .emit(SessionEvent::ConnectionFailed(Arc::clone(&error)));

            match decision {
                RetryDecision::Retry(delay) => {
                    debug!(
                        endpoint = %self.inner.endpoint.name(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying after back-off"
                    );
                    tokio::select! {
                        biased;

                        () = token.cancelled() => return Err(SessionError::Cancelled),
                        () = sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => return Err(self.give_up(&error)),
            }
        }
    }

    fn give_up(&self, last_error: &Arc<SessionError>) -> SessionError {
        let attempts = {
            let mut state = self.inner.state();
            state.phase = SessionState::Exhausted;
            state.retry.attempt()
        };
        let exhausted = || SessionError::ConnectionExhausted {
            endpoint: self.inner.endpoint.name().to_owned(),
            attempts,
            last_error: Arc::clone(last_error),
        };
        warn!(endpoint = %self.inner.endpoint.name(), attempts, "giving up on connection");
        self.inner
            .emit(SessionEvent::MaxRetriesExceeded(Arc::new(exhausted())));
        exhausted()
    }

    async fn establish(
        &self,
        parts: TransportParts,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        let TransportParts { sink, source } = parts;
        let reader = token.child_token();
        let mut slot = self.inner.sink.lock().await;
        let generation = {
            let mut state = self.inner.state();
            if token.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            state.generation += 1;
            state.phase = SessionState::Connected;
            state.connection = reader.clone();
            state.retry.reset();
            self.inner.decoder().reset();
            self.inner.emit(SessionEvent::Connected);
            state.generation
        };
        let stale = slot.replace(ActiveSink {
            generation,
            sink,
            reader: reader.clone(),
        });
        drop(slot);
        if let Some(stale) = stale {
            stale.shutdown(&self.inner.endpoint).await;
        }

        info!(endpoint = %self.inner.endpoint.name(), generation, "connected");
        tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            source,
            generation,
            reader,
        ));
        Ok(())
    }

    /// Write `chunk` through the live sink.
    ///
    /// Gives up as soon as `token` is cancelled or the connection is torn
    /// down, releasing the sink for the teardown.
    async fn write(&self, chunk: Bytes, token: &CancellationToken) -> Result<(), WriteFailure> {
        let mut slot = tokio::select! {
            biased;

            () = token.cancelled() => return Err(WriteFailure::Cancelled),
            slot = self.inner.sink.lock() => slot,
        };
        let Some(active) = slot.as_mut() else {
            return Err(WriteFailure::Io {
                generation: None,
                error: io::ErrorKind::NotConnected.into(),
            });
        };
        let generation = active.generation;
        let connection = active.reader.clone();
        let written = tokio::select! {
            biased;

            () = connection.cancelled() => None,
            written = active.sink.send(chunk) => Some(written),
        };
        match written {
            Some(Ok(())) => Ok(()),
            Some(Err(error)) => Err(WriteFailure::Io {
                generation: Some(generation),
                error,
            }),
            None if token.is_cancelled() => Err(WriteFailure::Cancelled),
            None => Err(WriteFailure::Io {
                generation: Some(generation),
                error: io::ErrorKind::NotConnected.into(),
            }),
        }
    }
}
