//! Scripted in-memory [`Connector`].

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use relink::transport::{Connector, FramedSource, TransportParts, TransportSink};
use rstest::fixture;
use tokio::{
    io::DuplexStream,
    sync::{Mutex as AsyncMutex, mpsc},
};

use crate::Peer;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Outcome of one handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Script {
    /// Fail with `ConnectionRefused`.
    Refuse,
    /// Never complete; only a timeout or cancellation ends the attempt.
    Hang,
    /// Succeed over an in-memory duplex stream using the session framing.
    Accept,
    /// Succeed, but fail every write with the given error kind. Reads still
    /// come from the peer stream.
    FailWrites(io::ErrorKind),
}

struct Shared {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    calls: AtomicUsize,
    addresses: Mutex<Vec<SocketAddr>>,
    peers_tx: mpsc::UnboundedSender<Peer>,
    peers_rx: AsyncMutex<mpsc::UnboundedReceiver<Peer>>,
}

/// [`Connector`] replaying a queue of [`Script`] steps.
///
/// Once the queue is empty every further handshake follows the fallback
/// step, [`Script::Refuse`] unless set with [`with_fallback`].
///
/// [`with_fallback`]: ScriptedConnector::with_fallback
#[derive(Clone)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    /// Create a connector replaying `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = Script>) -> Self {
        Self::build(steps.into_iter().collect(), Script::Refuse)
    }

    /// Connector whose every handshake follows `step`.
    pub fn always(step: Script) -> Self { Self::build(VecDeque::new(), step) }

    /// Replace the step used once the queue runs out.
    #[must_use]
    pub fn with_fallback(self, step: Script) -> Self {
        let script = self
            .shared
            .script
            .lock()
            .expect("script lock")
            .drain(..)
            .collect();
        Self::build(script, step)
    }

    fn build(script: VecDeque<Script>, fallback: Script) -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(script),
                fallback,
                calls: AtomicUsize::new(0),
                addresses: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: AsyncMutex::new(peers_rx),
            }),
        }
    }

    /// Append a step to the queue.
    pub fn push(&self, step: Script) {
        self.shared
            .script
            .lock()
            .expect("script lock")
            .push_back(step);
    }

    /// Number of handshakes started so far.
    pub fn calls(&self) -> usize { self.shared.calls.load(Ordering::SeqCst) }

    /// Addresses passed to every handshake so far.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.shared.addresses.lock().expect("address lock").clone()
    }

    /// Wait for the peer side of the next accepted connection.
    ///
    /// # Panics
    ///
    /// Panics if no connection is accepted within [`EVENT_TIMEOUT`].
    ///
    /// [`EVENT_TIMEOUT`]: crate::EVENT_TIMEOUT
    pub async fn next_peer(&self) -> Peer {
        let mut peers = self.shared.peers_rx.lock().await;
        tokio::time::timeout(crate::EVENT_TIMEOUT, peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    fn next_step(&self) -> Script {
        self.shared
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(self.shared.fallback)
    }

    fn accept(&self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        // The receiver lives as long as `shared`, so sending cannot fail.
        let _ = self.shared.peers_tx.send(Peer::new(remote));
        local
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, address: SocketAddr) -> io::Result<TransportParts> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        self.shared
            .addresses
            .lock()
            .expect("address lock")
            .push(address);
        match self.next_step() {
            Script::Refuse => Err(io::ErrorKind::ConnectionRefused.into()),
            Script::Hang => std::future::pending().await,
            Script::Accept => Ok(TransportParts::from_stream(self.accept())),
            Script::FailWrites(kind) => {
                let (read, _write) = tokio::io::split(self.accept());
                Ok(TransportParts::new(
                    FailingSink { kind },
                    FramedSource::new(read),
                ))
            }
        }
    }
}

/// Sink failing every write with one error kind.
#[derive(Clone, Copy, Debug)]
pub struct FailingSink {
    kind: io::ErrorKind,
}

#[async_trait]
impl TransportSink for FailingSink {
    async fn send(&mut self, _message: Bytes) -> io::Result<()> { Err(self.kind.into()) }

    async fn close(&mut self) -> io::Result<()> { Ok(()) }
}

/// Connector refusing every handshake until steps are pushed.
#[fixture]
pub fn connector() -> ScriptedConnector { ScriptedConnector::new([]) }
