//! Builder for configuring a session.

use std::{
    sync::{Arc, Mutex, atomic::AtomicBool},
    time::Duration,
};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{
    Session,
    SessionState,
    runtime::{Inner, State},
};
use crate::{
    config::{DEFAULT_EVENT_CAPACITY, SessionConfig},
    decoder::{DEFAULT_BUFFER_LIMIT, FrameDecoder},
    endpoint::EndpointTable,
    health::HealthMonitor,
    retry::{RetryController, RetryPolicy},
    transport::{Connector, TcpConnector},
};

/// Builder for [`Session`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use relink::{retry::RetryPolicy, session::Session};
///
/// let session = Session::builder("mysql-mcp-server")
///     .retry_policy(RetryPolicy {
///         max_attempts: 3,
///         base_delay: Duration::from_millis(100),
///         ..RetryPolicy::default()
///     })
///     .build();
/// assert_eq!(session.endpoint().address().port(), 3306);
/// assert!(!session.is_connected());
/// ```
pub struct SessionBuilder {
    name: String,
    endpoints: EndpointTable,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    decoder: Option<Box<dyn FrameDecoder>>,
    max_buffer: usize,
    event_capacity: usize,
}

impl SessionBuilder {
    /// Start configuring a session for the endpoint called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: EndpointTable::default(),
            policy: RetryPolicy::default(),
            connector: Arc::new(TcpConnector),
            decoder: None,
            max_buffer: DEFAULT_BUFFER_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Apply every setting from `config`.
    #[must_use]
    pub fn config(mut self, config: &SessionConfig) -> Self {
        self.policy = config.retry_policy();
        self.max_buffer = config.max_buffer;
        self.event_capacity = config.event_capacity;
        self
    }

    /// Set the retry policy. The policy is normalized on build.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.policy.connect_timeout = timeout;
        self
    }

    /// Resolve the endpoint name against `table` instead of the default
    /// table.
    #[must_use]
    pub fn endpoints(mut self, table: EndpointTable) -> Self {
        self.endpoints = table;
        self
    }

    /// Open connections with `connector` instead of plain TCP.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Decode inbound data with `decoder` instead of the endpoint's framing.
    #[must_use]
    pub fn decoder(mut self, decoder: impl FrameDecoder) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Limit on partial input retained by the endpoint's default decoder.
    ///
    /// Ignored when a decoder is supplied with [`decoder`](Self::decoder).
    #[must_use]
    pub fn max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = bytes;
        self
    }

    /// Events buffered per subscriber. Clamped to at least one.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Resolve the endpoint and create the session.
    ///
    /// No connection is opened until [`Session::connect`] or
    /// [`Session::send`] is called.
    #[must_use]
    pub fn build(self) -> Session {
        let endpoint = self.endpoints.resolve(&self.name);
        let decoder = self
            .decoder
            .unwrap_or_else(|| endpoint.framing().decoder(self.max_buffer));
        let (events, _) = broadcast::channel(self.event_capacity.max(1));
        let inner = Inner {
            health: HealthMonitor::new(endpoint.name()),
            endpoint,
            connector: self.connector,
            state: Mutex::new(State {
                phase: SessionState::Disconnected,
                retry: RetryController::new(self.policy),
                generation: 0,
                shutdown: CancellationToken::new(),
                connection: CancellationToken::new(),
            }),
            decoder: Mutex::new(decoder),
            sink: tokio::sync::Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            reconnecting: AtomicBool::new(false),
            events,
        };
        Session {
            inner: Arc::new(inner),
        }
    }
}
